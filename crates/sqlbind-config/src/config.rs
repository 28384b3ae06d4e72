use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{LazyLock, RwLock},
    time::Duration,
};

use documented::{Documented, DocumentedFields};
use serde::{Deserialize, Serialize};
use toml_edit::DocumentMut;
use tracing::{debug, info};

use crate::{
    annotations::annotate_toml_table,
    duration::parse_duration,
    error::{ConfigError, Result},
};

/// sqlbind configuration
#[derive(Clone, Debug, Deserialize, Serialize, Documented, DocumentedFields)]
pub struct Config {
    /// Path to the SQLite database opened by the command line tool.
    /// Default: sqlbind.db
    pub database: Option<String>,

    /// Named parameter prefix used by the statement rewriter, ':' or '#'.
    /// Default: ':'
    pub placeholder_prefix: Option<char>,

    /// If true, prepared statements are cached per handle.
    /// Default: true
    pub statement_cache: Option<bool>,

    /// Number of prepared statements kept by each handle's cache.
    /// Default: 16
    pub statement_cache_capacity: Option<usize>,

    /// Fetch size hint applied to every statement.
    pub fetch_size: Option<u32>,

    /// Maximum number of rows any query reads.
    pub max_rows: Option<u64>,

    /// Statement timeout handed to the driver, e.g. "30s" or "1m30s".
    pub query_timeout: Option<String>,

    /// Default chunk size for prepared batches. Unbounded when omitted.
    pub batch_chunk_size: Option<usize>,

    /// Directories searched for `<name>.sql` files when a statement is
    /// referenced by name.
    /// Default: ["sql"]
    pub sql_paths: Option<Vec<String>>,

    /// If true, every executed statement is logged with its timing.
    /// Default: false
    pub log_sql: Option<bool>,

    /// Named statements, referenced by name instead of literal SQL.
    pub statements: Option<HashMap<String, String>>,
}

pub static CONFIG_PATH: LazyLock<RwLock<PathBuf>> = LazyLock::new(|| {
    RwLock::new(match std::env::var("SQLBIND_CONFIG") {
        Ok(path_str) => PathBuf::from(path_str),
        Err(_) => PathBuf::from("sqlbind.toml"),
    })
});

/// Current configuration file location.
pub fn config_path() -> PathBuf {
    match CONFIG_PATH.read() {
        Ok(path) => path.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Overrides the configuration file location.
pub fn set_config_path<P: Into<PathBuf>>(path: P) {
    match CONFIG_PATH.write() {
        Ok(mut current) => *current = path.into(),
        Err(poisoned) => *poisoned.into_inner() = path.into(),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Config {
    pub fn default_config() -> Self {
        Self {
            database: Some("sqlbind.db".to_string()),
            placeholder_prefix: Some(':'),
            statement_cache: Some(true),
            statement_cache_capacity: Some(16),
            fetch_size: None,
            max_rows: None,
            query_timeout: None,
            batch_chunk_size: None,
            sql_paths: Some(vec!["sql".to_string()]),
            log_sql: Some(false),
            statements: Some(HashMap::new()),
        }
    }

    /// Loads the configuration from [`CONFIG_PATH`].
    /// If the configuration file is not found, the default configuration is used.
    pub fn new() -> Result<Self> {
        Self::load(config_path())
    }

    /// Loads and resolves the configuration at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut config = match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no config at {}, using defaults", path.display());
                Self::default_config()
            }
            Err(err) => return Err(ConfigError::IoError(err)),
        };

        config.resolve()?;

        Ok(config)
    }

    /// Validates the configuration and fills unset fields with defaults.
    pub fn resolve(&mut self) -> Result<()> {
        let prefix = *self.placeholder_prefix.get_or_insert(':');
        if prefix != ':' && prefix != '#' {
            return Err(ConfigError::InvalidPlaceholderPrefix(prefix));
        }

        if let Some(size) = self.batch_chunk_size {
            if size == 0 {
                return Err(ConfigError::InvalidChunkSize(size));
            }
        }

        if let Some(ref timeout) = self.query_timeout {
            if parse_duration(timeout).is_none() {
                return Err(ConfigError::InvalidDuration(timeout.clone()));
            }
        }

        self.database.get_or_insert_with(|| "sqlbind.db".to_string());
        self.statement_cache.get_or_insert(true);
        self.statement_cache_capacity.get_or_insert(16);
        self.sql_paths.get_or_insert_with(|| vec!["sql".to_string()]);
        self.log_sql.get_or_insert(false);
        self.statements.get_or_insert_with(HashMap::new);

        Ok(())
    }

    pub fn database(&self) -> &str {
        self.database.as_deref().unwrap_or("sqlbind.db")
    }

    pub fn placeholder_prefix(&self) -> char {
        self.placeholder_prefix.unwrap_or(':')
    }

    pub fn statement_cache(&self) -> bool {
        self.statement_cache.unwrap_or(true)
    }

    pub fn statement_cache_capacity(&self) -> usize {
        self.statement_cache_capacity.unwrap_or(16)
    }

    pub fn query_timeout(&self) -> Result<Option<Duration>> {
        match self.query_timeout {
            Some(ref timeout) => {
                parse_duration(timeout)
                    .map(Some)
                    .ok_or_else(|| ConfigError::InvalidDuration(timeout.clone()))
            }
            None => Ok(None),
        }
    }

    pub fn sql_paths(&self) -> Vec<PathBuf> {
        self.sql_paths
            .as_ref()
            .map(|paths| paths.iter().map(PathBuf::from).collect())
            .unwrap_or_default()
    }

    pub fn log_sql(&self) -> bool {
        self.log_sql.unwrap_or(false)
    }

    pub fn statements(&self) -> HashMap<String, String> {
        self.statements.clone().unwrap_or_default()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let serialized = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serialized)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    pub fn to_annotated_document(&self) -> Result<DocumentMut> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut doc = toml_string.parse::<DocumentMut>()?;

        annotate_toml_table::<Config>(doc.as_table_mut(), true)?;

        Ok(doc)
    }
}

/// Writes the documented default configuration to `path`.
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();

    if path.exists() {
        return Err(ConfigError::ConfigAlreadyExists);
    }

    let annotated_doc = Config::default_config().to_annotated_document()?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    fs::write(path, annotated_doc.to_string())?;
    info!(
        "Default configuration file generated with documentation at: {}",
        path.display()
    );
    Ok(())
}
