//! Error types for sqlbind-core.

use std::fmt;

use miette::Diagnostic;
use thiserror::Error;
use tracing::warn;

use crate::driver::DriverError;

/// Underlying cause carried by statement errors.
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The statement state captured when an error is raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSnapshot {
    pub raw_sql: Option<String>,
    pub located_sql: Option<String>,
    pub rewritten_sql: Option<String>,
    pub arguments: Vec<String>,
    pub method: Option<String>,
}

impl fmt::Display for ContextSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "<none>".into());
        write!(
            f,
            "[statement:\"{}\", located:\"{}\", rewritten:\"{}\", arguments:{{{}}}",
            show(&self.raw_sql),
            show(&self.located_sql),
            show(&self.rewritten_sql),
            self.arguments.join(", ")
        )?;
        if let Some(ref method) = self.method {
            write!(f, ", method:{method}")?;
        }
        write!(f, "]")
    }
}

/// Failures collected while releasing resources. The first entry is the
/// primary cause.
#[derive(Debug, Default)]
pub struct CleanupErrors(Vec<DriverError>);

impl CleanupErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: DriverError) {
        self.0.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn primary(&self) -> Option<&DriverError> {
        self.0.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DriverError> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<DriverError> {
        self.0
    }

    pub fn extend(&mut self, other: CleanupErrors) {
        self.0.extend(other.0);
    }
}

impl fmt::Display for CleanupErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.first() {
            Some(first) if self.0.len() == 1 => write!(f, "{first}"),
            Some(first) => write!(f, "{first} (and {} more)", self.0.len() - 1),
            None => write!(f, "no cleanup failures"),
        }
    }
}

impl std::error::Error for CleanupErrors {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.first().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

#[derive(Error, Diagnostic, Debug)]
pub enum DbiError {
    #[error("Unable to create statement: {message} {context}")]
    #[diagnostic(
        code(sqlbind::statement_creation),
        help("Check the SQL text, its named parameters and the statement locator")
    )]
    StatementCreation {
        message: String,
        context: Box<ContextSnapshot>,
        #[source]
        cause: Option<Cause>,
        suppressed: Vec<DriverError>,
    },

    #[error("Unable to execute statement: {message} {context}")]
    #[diagnostic(
        code(sqlbind::statement_execution),
        help("Check that every parameter is bound and the driver accepts the statement")
    )]
    StatementExecution {
        message: String,
        context: Box<ContextSnapshot>,
        #[source]
        cause: Option<Cause>,
        suppressed: Vec<DriverError>,
    },

    #[error("Unable to read results: {message} {context}")]
    #[diagnostic(
        code(sqlbind::result_set),
        help("Check that the row mapper matches the selected columns")
    )]
    ResultSet {
        message: String,
        context: Box<ContextSnapshot>,
        #[source]
        cause: Option<Cause>,
        suppressed: Vec<DriverError>,
    },

    #[error("Transaction failed: {message}")]
    #[diagnostic(code(sqlbind::transaction))]
    Transaction {
        message: String,
        #[source]
        cause: Option<DriverError>,
    },

    #[error("Unable to release resources: {errors} {context}")]
    #[diagnostic(code(sqlbind::resource_cleanup))]
    ResourceCleanup {
        #[source]
        errors: CleanupErrors,
        context: Box<ContextSnapshot>,
    },

    #[error("Configuration error: {0}")]
    #[diagnostic(code(sqlbind::configuration))]
    Configuration(String),

    #[error("Unable to open connection")]
    #[diagnostic(
        code(sqlbind::connection),
        help("Check that the database exists and is accessible")
    )]
    Connection(#[source] DriverError),

    #[error("Handle is closed")]
    #[diagnostic(code(sqlbind::closed))]
    Closed,
}

impl DbiError {
    pub fn creation<M: Into<String>>(message: M, context: ContextSnapshot, cause: Option<Cause>) -> Self {
        DbiError::StatementCreation {
            message: message.into(),
            context: Box::new(context),
            cause,
            suppressed: Vec::new(),
        }
    }

    pub fn execution<M: Into<String>>(message: M, context: ContextSnapshot, cause: Option<Cause>) -> Self {
        DbiError::StatementExecution {
            message: message.into(),
            context: Box::new(context),
            cause,
            suppressed: Vec::new(),
        }
    }

    pub fn result_set<M: Into<String>>(message: M, context: ContextSnapshot, cause: Option<Cause>) -> Self {
        DbiError::ResultSet {
            message: message.into(),
            context: Box::new(context),
            cause,
            suppressed: Vec::new(),
        }
    }

    pub fn transaction<M: Into<String>>(message: M, cause: Option<DriverError>) -> Self {
        DbiError::Transaction {
            message: message.into(),
            cause,
        }
    }

    pub fn configuration<M: Into<String>>(message: M) -> Self {
        DbiError::Configuration(message.into())
    }

    /// Statement state captured with the error, if any.
    pub fn context(&self) -> Option<&ContextSnapshot> {
        match self {
            DbiError::StatementCreation { context, .. }
            | DbiError::StatementExecution { context, .. }
            | DbiError::ResultSet { context, .. }
            | DbiError::ResourceCleanup { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Cleanup failures suppressed in favor of this error.
    pub fn suppressed(&self) -> &[DriverError] {
        match self {
            DbiError::StatementCreation { suppressed, .. }
            | DbiError::StatementExecution { suppressed, .. }
            | DbiError::ResultSet { suppressed, .. } => suppressed,
            _ => &[],
        }
    }

    /// Attaches cleanup failures that happened while this error propagated.
    ///
    /// Each failure is logged, since errors without a suppressed list would
    /// otherwise drop them.
    pub fn with_suppressed(mut self, errors: CleanupErrors) -> Self {
        if errors.is_empty() {
            return self;
        }
        for err in errors.iter() {
            warn!("suppressed cleanup failure: {}", err);
        }
        match self {
            DbiError::StatementCreation {
                ref mut suppressed, ..
            }
            | DbiError::StatementExecution {
                ref mut suppressed, ..
            }
            | DbiError::ResultSet {
                ref mut suppressed, ..
            } => suppressed.extend(errors.into_vec()),
            _ => {}
        }
        self
    }

    pub fn is_statement_creation(&self) -> bool {
        matches!(self, DbiError::StatementCreation { .. })
    }

    pub fn is_statement_execution(&self) -> bool {
        matches!(self, DbiError::StatementExecution { .. })
    }

    pub fn is_result_set(&self) -> bool {
        matches!(self, DbiError::ResultSet { .. })
    }

    pub fn is_transaction(&self) -> bool {
        matches!(self, DbiError::Transaction { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, DbiError::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, DbiError>;

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    fn snapshot() -> ContextSnapshot {
        ContextSnapshot {
            raw_sql: Some("select * from t where id = :id".into()),
            located_sql: Some("select * from t where id = :id".into()),
            rewritten_sql: Some("select * from t where id = ?".into()),
            arguments: vec!["id=5".into()],
            method: None,
        }
    }

    #[test]
    fn test_snapshot_display() {
        let rendered = snapshot().to_string();
        assert!(rendered.contains("rewritten:\"select * from t where id = ?\""));
        assert!(rendered.contains("arguments:{id=5}"));
    }

    #[test]
    fn test_execution_error_carries_cause_and_context() {
        let err = DbiError::execution(
            "boom",
            snapshot(),
            Some(Box::new(DriverError::Failure("driver said no".into()))),
        );
        assert!(err.is_statement_execution());
        assert_eq!(err.context().unwrap().arguments, vec!["id=5".to_string()]);
        assert_eq!(err.source().unwrap().to_string(), "driver said no");
    }

    #[test]
    fn test_suppressed_cleanup_errors_are_attached() {
        let mut cleanup = CleanupErrors::new();
        cleanup.push(DriverError::Failure("close result set".into()));
        cleanup.push(DriverError::Failure("close statement".into()));

        let err = DbiError::result_set("mapping failed", snapshot(), None).with_suppressed(cleanup);
        assert_eq!(err.suppressed().len(), 2);
        assert_eq!(err.suppressed()[0].to_string(), "close result set");
    }

    #[test]
    fn test_cleanup_errors_primary() {
        let mut cleanup = CleanupErrors::new();
        assert!(cleanup.is_empty());
        cleanup.push(DriverError::Failure("first".into()));
        cleanup.push(DriverError::Failure("second".into()));

        assert_eq!(cleanup.primary().unwrap().to_string(), "first");
        assert_eq!(cleanup.to_string(), "first (and 1 more)");
        assert_eq!(cleanup.source().unwrap().to_string(), "first");
    }
}
