use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("TOML serialization error: {0}")]
    #[diagnostic(
        code(sqlbind_config::toml_serialize),
        help("Check your configuration structure for invalid values")
    )]
    TomlSerError(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    #[diagnostic(
        code(sqlbind_config::toml_deserialize),
        help("Check your sqlbind.toml syntax and structure")
    )]
    TomlDeError(#[from] toml::de::Error),

    #[error("Configuration file already exists")]
    #[diagnostic(
        code(sqlbind_config::already_exists),
        help("Remove the existing config file or use a different location")
    )]
    ConfigAlreadyExists,

    #[error("Invalid placeholder prefix: {0:?}")]
    #[diagnostic(
        code(sqlbind_config::invalid_prefix),
        help("Use ':' or '#' as the named parameter prefix")
    )]
    InvalidPlaceholderPrefix(char),

    #[error("Invalid batch chunk size: {0}")]
    #[diagnostic(
        code(sqlbind_config::invalid_chunk_size),
        help("Batch chunk size must be greater than zero, or omitted for unbounded batches")
    )]
    InvalidChunkSize(usize),

    #[error("Invalid duration: {0}")]
    #[diagnostic(
        code(sqlbind_config::invalid_duration),
        help("Durations look like '500ms', '30s', '1m30s' or '1h'")
    )]
    InvalidDuration(String),

    #[error("IO error: {0}")]
    #[diagnostic(code(sqlbind_config::io))]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    #[diagnostic(code(sqlbind_config::toml))]
    Toml(#[from] toml_edit::TomlError),

    #[error("Encountered unexpected TOML item: {0}")]
    #[diagnostic(code(sqlbind_config::unexpected_toml_item))]
    UnexpectedTomlItem(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
