use miette::Diagnostic;
use sqlbind_config::ConfigError;
use sqlbind_core::DbiError;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum CliError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Dbi(#[from] DbiError),

    #[error("Invalid parameter '{0}'")]
    #[diagnostic(
        code(sqlbind::cli::invalid_param),
        help("Pass named parameters as name=value, e.g. -p id=42")
    )]
    InvalidParam(String),

    #[error("Invalid batch input: {0}")]
    #[diagnostic(
        code(sqlbind::cli::invalid_batch),
        help("Batch input must be a JSON array of objects")
    )]
    InvalidBatch(String),

    #[error("IO error while {action}: {source}")]
    #[diagnostic(code(sqlbind::cli::io))]
    Io {
        action: String,
        source: std::io::Error,
    },
}

pub type CliResult<T> = std::result::Result<T, CliError>;

pub trait ErrorContext<T> {
    fn with_context<C>(self, context: C) -> CliResult<T>
    where
        C: FnOnce() -> String;
}

impl<T> ErrorContext<T> for std::io::Result<T> {
    fn with_context<C>(self, context: C) -> CliResult<T>
    where
        C: FnOnce() -> String,
    {
        self.map_err(|err| {
            CliError::Io {
                action: context(),
                source: err,
            }
        })
    }
}
