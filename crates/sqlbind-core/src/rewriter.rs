//! Named parameter rewriting.
//!
//! Turns `select * from t where id = :id` into
//! `select * from t where id = ?` plus the ordered list of parameter slots.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock},
};

use miette::Diagnostic;
use thiserror::Error;
use tracing::trace;

#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum RewriteError {
    #[error("Unterminated quoted text starting at offset {0}")]
    #[diagnostic(code(sqlbind::rewrite::quote))]
    UnterminatedQuote(usize),

    #[error("Unterminated block comment starting at offset {0}")]
    #[diagnostic(code(sqlbind::rewrite::comment))]
    UnterminatedComment(usize),
}

/// One `?` in rewritten SQL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    Positional,
    Named(String),
}

/// Canonical SQL with `?` placeholders and the slot each one stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStatement {
    sql: String,
    slots: Vec<Slot>,
}

impl ParsedStatement {
    pub fn new(sql: String, slots: Vec<Slot>) -> Self {
        Self {
            sql,
            slots,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn is_positional_only(&self) -> bool {
        self.slots.iter().all(|s| matches!(s, Slot::Positional))
    }

    /// Parameter names in slot order, repeated names included.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().filter_map(|s| {
            match s {
                Slot::Named(name) => Some(name.as_str()),
                Slot::Positional => None,
            }
        })
    }

    /// 1-based positions of every slot bound to `name`.
    pub fn positions_of(&self, name: &str) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, Slot::Named(n) if n == name))
            .map(|(i, _)| i + 1)
            .collect()
    }
}

/// Parses SQL templates into [`ParsedStatement`]s.
pub trait StatementRewriter: Send + Sync + fmt::Debug {
    fn rewrite(&self, sql: &str) -> Result<Arc<ParsedStatement>, RewriteError>;
}

/// Rewriter for `:name` style parameters, with a configurable prefix.
///
/// Quoted text and comments are copied untouched. A doubled prefix (`::`)
/// or a backslash-escaped prefix (`\:`) yields one literal prefix character.
#[derive(Debug)]
pub struct ColonPrefixRewriter {
    prefix: char,
    cache: RwLock<HashMap<String, Arc<ParsedStatement>>>,
}

impl Default for ColonPrefixRewriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ColonPrefixRewriter {
    pub fn new() -> Self {
        Self::with_prefix(':')
    }

    pub fn with_prefix(prefix: char) -> Self {
        Self {
            prefix,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn prefix(&self) -> char {
        self.prefix
    }

    pub fn cached_len(&self) -> usize {
        match self.cache.read() {
            Ok(cache) => cache.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl StatementRewriter for ColonPrefixRewriter {
    fn rewrite(&self, sql: &str) -> Result<Arc<ParsedStatement>, RewriteError> {
        if let Ok(cache) = self.cache.read() {
            if let Some(parsed) = cache.get(sql) {
                trace!("rewrite cache hit: {}", sql);
                return Ok(parsed.clone());
            }
        }

        let parsed = Arc::new(scan(sql, Some(self.prefix))?);

        // Racing writers compute the same value, so last write wins.
        match self.cache.write() {
            Ok(mut cache) => {
                cache.insert(sql.to_string(), parsed.clone());
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(sql.to_string(), parsed.clone());
            }
        }

        Ok(parsed)
    }
}

/// Rewriter that leaves SQL untouched; every `?` is positional.
#[derive(Debug, Default)]
pub struct NoOpRewriter;

impl StatementRewriter for NoOpRewriter {
    fn rewrite(&self, sql: &str) -> Result<Arc<ParsedStatement>, RewriteError> {
        Ok(Arc::new(scan(sql, None)?))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_ident_part(c: char) -> bool {
    is_ident_start(c) || c == '.'
}

/// Copies a quoted run starting at `start`, returning the index after the
/// closing quote. A doubled quote inside is handled as close-then-reopen.
fn copy_quoted(chars: &[char], start: usize, out: &mut String) -> Result<usize, RewriteError> {
    let quote = chars[start];
    out.push(quote);
    let mut i = start + 1;
    while i < chars.len() {
        out.push(chars[i]);
        if chars[i] == quote {
            return Ok(i + 1);
        }
        i += 1;
    }
    Err(RewriteError::UnterminatedQuote(start))
}

fn copy_line_comment(chars: &[char], start: usize, out: &mut String) -> usize {
    let mut i = start;
    while i < chars.len() {
        out.push(chars[i]);
        i += 1;
        if chars[i - 1] == '\n' {
            break;
        }
    }
    i
}

fn copy_block_comment(chars: &[char], start: usize, out: &mut String) -> Result<usize, RewriteError> {
    out.push_str("/*");
    let mut i = start + 2;
    while i < chars.len() {
        if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
            out.push_str("*/");
            return Ok(i + 2);
        }
        out.push(chars[i]);
        i += 1;
    }
    Err(RewriteError::UnterminatedComment(start))
}

pub(crate) fn scan(sql: &str, prefix: Option<char>) -> Result<ParsedStatement, RewriteError> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut slots = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            '\'' | '"' => i = copy_quoted(&chars, i, &mut out)?,
            '-' if next == Some('-') => i = copy_line_comment(&chars, i, &mut out),
            '/' if next == Some('*') => i = copy_block_comment(&chars, i, &mut out)?,
            '?' => {
                out.push('?');
                slots.push(Slot::Positional);
                i += 1;
            }
            '\\' if next.is_some() && next == prefix => {
                out.push(chars[i + 1]);
                i += 2;
            }
            c if Some(c) == prefix => {
                if next == prefix {
                    out.push(c);
                    i += 2;
                } else if next.is_some_and(is_ident_start) {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && is_ident_part(chars[end]) {
                        end += 1;
                    }
                    while end > start + 1 && chars[end - 1] == '.' {
                        end -= 1;
                    }
                    let name: String = chars[start..end].iter().collect();
                    out.push('?');
                    slots.push(Slot::Named(name));
                    i = end;
                } else {
                    out.push(c);
                    i += 1;
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok(ParsedStatement::new(out, slots))
}

/// Splits a script into statements on `;` outside quotes and comments.
/// Empty statements are dropped.
pub(crate) fn split_statements(script: &str) -> Result<Vec<String>, RewriteError> {
    let chars: Vec<char> = script.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '\'' | '"' => i = copy_quoted(&chars, i, &mut current)?,
            '-' if next == Some('-') => i = copy_line_comment(&chars, i, &mut current),
            '/' if next == Some('*') => i = copy_block_comment(&chars, i, &mut current)?,
            ';' => {
                push_statement(&mut statements, &mut current);
                i += 1;
            }
            c => {
                current.push(c);
                i += 1;
            }
        }
    }
    push_statement(&mut statements, &mut current);

    Ok(statements)
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim();
    if !statement.is_empty() && !is_comment_only(statement) {
        statements.push(statement.to_string());
    }
    current.clear();
}

fn is_comment_only(statement: &str) -> bool {
    statement
        .lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(sql: &str) -> ParsedStatement {
        scan(sql, Some(':')).unwrap()
    }

    #[test]
    fn test_named_parameters() {
        let parsed = rewrite("select * from t where id = :id and name = :name");
        assert_eq!(parsed.sql(), "select * from t where id = ? and name = ?");
        assert_eq!(parsed.names().collect::<Vec<_>>(), vec!["id", "name"]);
        assert!(!parsed.is_positional_only());
    }

    #[test]
    fn test_repeated_names_keep_every_occurrence() {
        let parsed = rewrite("select :a, :b, :a");
        assert_eq!(parsed.sql(), "select ?, ?, ?");
        assert_eq!(parsed.names().collect::<Vec<_>>(), vec!["a", "b", "a"]);
        assert_eq!(parsed.positions_of("a"), vec![1, 3]);
    }

    #[test]
    fn test_positional_only() {
        let parsed = rewrite("insert into t values (?, ?)");
        assert_eq!(parsed.sql(), "insert into t values (?, ?)");
        assert_eq!(parsed.slots(), &[Slot::Positional, Slot::Positional]);
        assert!(parsed.is_positional_only());
    }

    #[test]
    fn test_mixed_slots() {
        let parsed = rewrite("select ? where a = :a");
        assert_eq!(
            parsed.slots(),
            &[Slot::Positional, Slot::Named("a".into())]
        );
    }

    #[test]
    fn test_escaped_prefix_is_literal() {
        let parsed = rewrite("select '1' ::text, x \\:y from t");
        assert_eq!(parsed.sql(), "select '1' :text, x :y from t");
        assert!(parsed.slots().is_empty());
    }

    #[test]
    fn test_quotes_and_comments_are_opaque() {
        let sql = "select ':a', \"b:c\", 'it''s :x' -- :y ?\n/* :z ? */ from t where v = :v";
        let parsed = rewrite(sql);
        assert_eq!(
            parsed.sql(),
            "select ':a', \"b:c\", 'it''s :x' -- :y ?\n/* :z ? */ from t where v = ?"
        );
        assert_eq!(parsed.slots(), &[Slot::Named("v".into())]);
    }

    #[test]
    fn test_prefix_without_identifier_is_literal() {
        let parsed = rewrite("select a : b, c:");
        assert_eq!(parsed.sql(), "select a : b, c:");
        assert!(parsed.slots().is_empty());
    }

    #[test]
    fn test_dotted_names_drop_trailing_dot() {
        let parsed = rewrite("select :user.name, :total.");
        assert_eq!(parsed.sql(), "select ?, ?.");
        assert_eq!(
            parsed.names().collect::<Vec<_>>(),
            vec!["user.name", "total"]
        );
    }

    #[test]
    fn test_hash_prefix() {
        let parsed = scan("select * from t where id = #id and c = ':x'", Some('#')).unwrap();
        assert_eq!(parsed.sql(), "select * from t where id = ? and c = ':x'");
        assert_eq!(parsed.names().collect::<Vec<_>>(), vec!["id"]);
    }

    #[test]
    fn test_unterminated_quote() {
        assert_eq!(
            scan("select 'abc", Some(':')),
            Err(RewriteError::UnterminatedQuote(7))
        );
    }

    #[test]
    fn test_unterminated_comment() {
        assert_eq!(
            scan("select 1 /* oops", Some(':')),
            Err(RewriteError::UnterminatedComment(9))
        );
    }

    #[test]
    fn test_rewriter_caches_per_sql() {
        let rewriter = ColonPrefixRewriter::new();
        let first = rewriter.rewrite("select :a").unwrap();
        let second = rewriter.rewrite("select :a").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(rewriter.cached_len(), 1);

        rewriter.rewrite("select :b").unwrap();
        assert_eq!(rewriter.cached_len(), 2);
    }

    #[test]
    fn test_rewriter_shared_across_threads() {
        let rewriter = Arc::new(ColonPrefixRewriter::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let rewriter = rewriter.clone();
                std::thread::spawn(move || {
                    let sql = format!("select :p{}", i % 2);
                    rewriter.rewrite(&sql).unwrap().sql().to_string()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), "select ?");
        }
        assert_eq!(rewriter.cached_len(), 2);
    }

    #[test]
    fn test_noop_rewriter() {
        let parsed = NoOpRewriter.rewrite("select ':a', ? from t where x = :b").unwrap();
        assert_eq!(parsed.sql(), "select ':a', ? from t where x = :b");
        assert_eq!(parsed.slots(), &[Slot::Positional]);
    }

    #[test]
    fn test_split_statements() {
        let statements = split_statements(
            "create table a (x text default ';');\n-- comment;\ninsert into a values ('b;c');;\n",
        )
        .unwrap();
        assert_eq!(
            statements,
            vec![
                "create table a (x text default ';')".to_string(),
                "-- comment;\ninsert into a values ('b;c')".to_string(),
            ]
        );
    }
}
