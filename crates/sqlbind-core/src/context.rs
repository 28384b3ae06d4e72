//! Per-statement attribute bag.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    driver::GeneratedKeys,
    error::ContextSnapshot,
    registry::Registries,
    rewriter::ParsedStatement,
    value::Value,
};

/// The SQL object method a statement runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodInfo {
    pub object: String,
    pub method: String,
}

impl MethodInfo {
    pub fn new<O: Into<String>, M: Into<String>>(object: O, method: M) -> Self {
        Self {
            object: object.into(),
            method: method.into(),
        }
    }
}

impl fmt::Display for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.object, self.method)
    }
}

/// State of one statement, filled in as it moves through the pipeline.
///
/// A fresh context is created for every query, update, call or batch and
/// inherits the defined attributes of its handle.
#[derive(Debug, Clone)]
pub struct StatementContext {
    raw_sql: String,
    located_sql: Option<String>,
    parsed: Option<Arc<ParsedStatement>>,
    attributes: HashMap<String, Value>,
    method: Option<MethodInfo>,
    generated_keys: GeneratedKeys,
    registries: Arc<Registries>,
}

impl StatementContext {
    pub fn new<S: Into<String>>(raw_sql: S, registries: Arc<Registries>) -> Self {
        Self {
            raw_sql: raw_sql.into(),
            located_sql: None,
            parsed: None,
            attributes: HashMap::new(),
            method: None,
            generated_keys: GeneratedKeys::None,
            registries,
        }
    }

    pub fn raw_sql(&self) -> &str {
        &self.raw_sql
    }

    pub fn located_sql(&self) -> Option<&str> {
        self.located_sql.as_deref()
    }

    pub fn rewritten_sql(&self) -> Option<&str> {
        self.parsed.as_deref().map(ParsedStatement::sql)
    }

    pub fn parsed(&self) -> Option<&Arc<ParsedStatement>> {
        self.parsed.as_ref()
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    pub fn method(&self) -> Option<&MethodInfo> {
        self.method.as_ref()
    }

    pub fn generated_keys(&self) -> &GeneratedKeys {
        &self.generated_keys
    }

    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    pub fn define<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn define_all(&mut self, attributes: &HashMap<String, Value>) {
        self.attributes
            .extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    pub fn set_method(&mut self, method: MethodInfo) {
        self.method = Some(method);
    }

    pub fn set_generated_keys(&mut self, keys: GeneratedKeys) {
        self.generated_keys = keys;
    }

    pub(crate) fn set_located_sql(&mut self, sql: String) {
        self.located_sql = Some(sql);
    }

    pub(crate) fn set_parsed(&mut self, parsed: Arc<ParsedStatement>) {
        self.parsed = Some(parsed);
    }

    /// Captures the SQL at each stage plus a rendering of the arguments.
    pub fn snapshot(&self, arguments: Vec<String>) -> ContextSnapshot {
        ContextSnapshot {
            raw_sql: Some(self.raw_sql.clone()),
            located_sql: self.located_sql.clone(),
            rewritten_sql: self.rewritten_sql().map(str::to_string),
            arguments,
            method: self.method.as_ref().map(ToString::to_string),
        }
    }
}
