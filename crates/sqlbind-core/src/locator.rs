//! Resolving statement names to SQL text.

use std::{
    collections::HashMap,
    fmt,
    fs,
    io,
    path::{Path, PathBuf},
    sync::{Arc, LazyLock, RwLock},
};

use regex::Regex;
use thiserror::Error;
use tracing::trace;

use crate::{
    context::StatementContext,
    registry::{read, write},
};

static LITERAL_SQL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(select|insert|update|delete|call|create|alter|merge|replace|drop)\s")
        .expect("literal sql pattern is valid")
});

/// Whether `sql` reads as a statement rather than a statement name.
pub fn is_literal_sql(sql: &str) -> bool {
    LITERAL_SQL.is_match(sql)
}

#[derive(Error, Debug)]
pub enum LocateError {
    #[error("Unable to read statement '{name}' from {path}")]
    Io {
        name: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Finds the SQL text for a statement name.
///
/// `Ok(None)` means this locator does not know the name.
pub trait StatementLocator: Send + Sync + fmt::Debug {
    fn locate(&self, name: &str, ctx: &StatementContext) -> Result<Option<String>, LocateError>;
}

/// Passes every input through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiteralLocator;

impl StatementLocator for LiteralLocator {
    fn locate(&self, name: &str, _ctx: &StatementContext) -> Result<Option<String>, LocateError> {
        Ok(Some(name.to_string()))
    }
}

/// Named statements from an in-memory table.
#[derive(Debug, Default, Clone)]
pub struct MapLocator {
    statements: HashMap<String, String>,
}

impl MapLocator {
    pub fn new<I, K, V>(statements: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            statements: statements
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, name: K, sql: V) {
        self.statements.insert(name.into(), sql.into());
    }
}

impl StatementLocator for MapLocator {
    fn locate(&self, name: &str, _ctx: &StatementContext) -> Result<Option<String>, LocateError> {
        Ok(self.statements.get(name).cloned())
    }
}

/// Loads `<dir>/<name>.sql` from the first directory that has it.
///
/// When the statement runs on behalf of a SQL object method,
/// `<dir>/<object>/<name>.sql` is tried first. Loaded files are cached.
#[derive(Debug, Default)]
pub struct FileLocator {
    dirs: Vec<PathBuf>,
    cache: RwLock<HashMap<PathBuf, Arc<str>>>,
}

impl FileLocator {
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    fn candidates(&self, name: &str, ctx: &StatementContext) -> Vec<PathBuf> {
        let file = format!("{name}.sql");
        let mut paths = Vec::new();
        for dir in &self.dirs {
            if let Some(method) = ctx.method() {
                paths.push(dir.join(&method.object).join(&file));
            }
            paths.push(dir.join(&file));
        }
        paths
    }

    fn load(&self, name: &str, path: &Path) -> Result<Option<Arc<str>>, LocateError> {
        if let Some(sql) = read(&self.cache).get(path) {
            trace!("statement cache hit: {}", path.display());
            return Ok(Some(sql.clone()));
        }

        let sql: Arc<str> = match fs::read_to_string(path) {
            Ok(sql) => Arc::from(sql.trim()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(LocateError::Io {
                    name: name.to_string(),
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        };
        write(&self.cache).insert(path.to_path_buf(), sql.clone());
        Ok(Some(sql))
    }
}

impl StatementLocator for FileLocator {
    fn locate(&self, name: &str, ctx: &StatementContext) -> Result<Option<String>, LocateError> {
        if is_literal_sql(name) {
            return Ok(None);
        }
        for path in self.candidates(name, ctx) {
            if let Some(sql) = self.load(name, &path)? {
                return Ok(Some(sql.to_string()));
            }
        }
        Ok(None)
    }
}

/// Asks each locator in turn. Literal SQL is never looked up and is
/// returned as is.
#[derive(Debug, Default)]
pub struct ChainLocator {
    locators: Vec<Arc<dyn StatementLocator>>,
}

impl ChainLocator {
    pub fn new(locators: Vec<Arc<dyn StatementLocator>>) -> Self {
        Self {
            locators,
        }
    }

    pub fn push(&mut self, locator: Arc<dyn StatementLocator>) {
        self.locators.push(locator);
    }
}

impl StatementLocator for ChainLocator {
    fn locate(&self, name: &str, ctx: &StatementContext) -> Result<Option<String>, LocateError> {
        if is_literal_sql(name) {
            return Ok(Some(name.to_string()));
        }
        for locator in &self.locators {
            if let Some(sql) = locator.locate(name, ctx)? {
                return Ok(Some(sql));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::MethodInfo, registry::Registries};

    fn ctx() -> StatementContext {
        StatementContext::new("test", Arc::new(Registries::new()))
    }

    #[test]
    fn test_literal_sql_detection() {
        assert!(is_literal_sql("select 1 "));
        assert!(is_literal_sql("  INSERT into t values (1)"));
        assert!(is_literal_sql("drop\ttable t"));
        assert!(!is_literal_sql("find_user"));
        assert!(!is_literal_sql("selection"));
        assert!(!is_literal_sql("select"));
    }

    #[test]
    fn test_map_locator() {
        let locator = MapLocator::new([("find", "select * from t")]);
        assert_eq!(
            locator.locate("find", &ctx()).unwrap().as_deref(),
            Some("select * from t")
        );
        assert!(locator.locate("other", &ctx()).unwrap().is_none());
    }

    #[test]
    fn test_file_locator_prefers_object_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("UserDao")).unwrap();
        fs::write(dir.path().join("find.sql"), "select 'shared'\n").unwrap();
        fs::write(dir.path().join("UserDao").join("find.sql"), "select 'dao'").unwrap();

        let locator = FileLocator::new([dir.path()]);
        let mut scoped = ctx();
        scoped.set_method(MethodInfo::new("UserDao", "find"));

        assert_eq!(
            locator.locate("find", &scoped).unwrap().as_deref(),
            Some("select 'dao'")
        );
        assert_eq!(
            locator.locate("find", &ctx()).unwrap().as_deref(),
            Some("select 'shared'")
        );
        assert!(locator.locate("missing", &ctx()).unwrap().is_none());
    }

    #[test]
    fn test_file_locator_caches_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("count.sql");
        fs::write(&path, "select count(*) from t").unwrap();

        let locator = FileLocator::new([dir.path()]);
        locator.locate("count", &ctx()).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(
            locator.locate("count", &ctx()).unwrap().as_deref(),
            Some("select count(*) from t")
        );
    }

    #[test]
    fn test_chain_passes_literal_sql_through() {
        let chain = ChainLocator::new(vec![Arc::new(MapLocator::new([(
            "select 1 ",
            "select 2",
        )]))]);
        assert_eq!(
            chain.locate("select 1 ", &ctx()).unwrap().as_deref(),
            Some("select 1 ")
        );
        assert!(chain.locate("unknown", &ctx()).unwrap().is_none());
    }
}
