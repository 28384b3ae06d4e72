//! Driver abstraction consumed by the execution core.
//!
//! The core never talks to a database directly. It opens a [`Connection`]
//! through a connection factory, asks it for [`PreparedStatement`]s and
//! reads rows from [`ResultSet`]s. A SQLite implementation lives in
//! [`sqlite`].

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use crate::value::{SqlType, Value};

pub mod sqlite;

/// Error raised by a driver.
#[derive(Error, Diagnostic, Debug)]
pub enum DriverError {
    #[error(transparent)]
    #[diagnostic(code(sqlbind::driver::sqlite))]
    Sqlite(#[from] rusqlite::Error),

    #[error("Operation not supported by driver: {0}")]
    #[diagnostic(
        code(sqlbind::driver::unsupported),
        help("The selected driver cannot perform this operation")
    )]
    Unsupported(String),

    #[error("Statement exceeded its query timeout of {0:?}")]
    #[diagnostic(
        code(sqlbind::driver::timeout),
        help("Raise the query timeout or narrow the statement")
    )]
    Timeout(Duration),

    #[error("Connection is closed")]
    #[diagnostic(code(sqlbind::driver::closed))]
    Closed,

    #[error("{0}")]
    #[diagnostic(code(sqlbind::driver::failure))]
    Failure(String),
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        };
        f.write_str(name)
    }
}

/// Direction hint for result traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchDirection {
    #[default]
    Forward,
    Reverse,
    Unknown,
}

/// Generated keys requested from an insert or update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GeneratedKeys {
    #[default]
    None,
    /// Driver-defined keys, usually the last inserted row id.
    Generic,
    /// Named key columns.
    Columns(Vec<String>),
}

impl GeneratedKeys {
    pub fn columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            GeneratedKeys::Generic
        } else {
            GeneratedKeys::Columns(columns)
        }
    }

    pub fn is_requested(&self) -> bool {
        !matches!(self, GeneratedKeys::None)
    }
}

/// Options passed to [`Connection::prepare`].
#[derive(Debug, Clone, Default)]
pub struct PrepareOptions {
    pub keys: GeneratedKeys,
    /// Reuse a driver-side cached statement when available.
    pub cached: bool,
}

/// A live database connection.
pub trait Connection: Send {
    fn prepare<'c>(
        &'c self,
        sql: &str,
        options: &PrepareOptions,
    ) -> DriverResult<Box<dyn PreparedStatement + 'c>>;

    /// Prepares a stored procedure call.
    fn prepare_call<'c>(&'c self, sql: &str) -> DriverResult<Box<dyn PreparedStatement + 'c>> {
        let _ = sql;
        Err(DriverError::Unsupported("callable statements".into()))
    }

    /// Runs each statement in order and returns their update counts.
    fn execute_script(&self, statements: &[String]) -> DriverResult<Vec<i64>> {
        let mut counts = Vec::with_capacity(statements.len());
        for sql in statements {
            let mut stmt = self.prepare(sql, &PrepareOptions::default())?;
            stmt.execute()?;
            counts.push(stmt.update_count().unwrap_or(0) as i64);
            stmt.close()?;
        }
        Ok(counts)
    }

    fn begin(&self) -> DriverResult<()>;
    fn commit(&self) -> DriverResult<()>;
    fn rollback(&self) -> DriverResult<()>;

    fn savepoint(&self, name: &str) -> DriverResult<()>;
    fn release_savepoint(&self, name: &str) -> DriverResult<()>;
    fn rollback_to_savepoint(&self, name: &str) -> DriverResult<()>;

    /// `false` while a transaction is open.
    fn is_autocommit(&self) -> bool;

    fn transaction_isolation(&self) -> DriverResult<IsolationLevel>;
    fn set_transaction_isolation(&self, level: IsolationLevel) -> DriverResult<()>;

    fn is_valid(&self) -> bool;
    fn close(&mut self) -> DriverResult<()>;
}

/// A statement prepared on a [`Connection`].
///
/// Parameter positions are 1-based, column indexes of result sets are 0-based.
pub trait PreparedStatement {
    fn set_value(&mut self, position: usize, value: &Value) -> DriverResult<()>;
    fn set_null(&mut self, position: usize, sql_type: SqlType) -> DriverResult<()>;
    fn clear_parameters(&mut self) -> DriverResult<()>;

    /// Snapshots the current parameters as one batch entry.
    fn add_batch(&mut self) -> DriverResult<()>;
    fn execute_batch(&mut self) -> DriverResult<Vec<i64>>;

    /// Executes the statement, returning `true` when it produced a result set.
    fn execute(&mut self) -> DriverResult<bool>;

    /// Hands over the result set of the last execution.
    fn result_set(&mut self) -> DriverResult<Option<Box<dyn ResultSet>>>;

    /// Rows of the last execution, read in place as the cursor advances.
    ///
    /// Drivers that hand their rows over through
    /// [`result_set`](PreparedStatement::result_set) return `None`.
    fn cursor(&mut self) -> Option<&mut dyn ResultSet> {
        None
    }
    fn update_count(&self) -> Option<u64>;
    fn generated_keys(&mut self) -> DriverResult<Option<Box<dyn ResultSet>>>;

    fn set_fetch_size(&mut self, rows: u32) -> DriverResult<()>;
    fn set_max_rows(&mut self, rows: u64) -> DriverResult<()>;
    /// Bounds the time spent inside the database per call. Zero disables
    /// the limit.
    fn set_query_timeout(&mut self, timeout: Duration) -> DriverResult<()>;
    fn set_fetch_direction(&mut self, direction: FetchDirection) -> DriverResult<()>;

    fn register_out_parameter(&mut self, position: usize, sql_type: SqlType) -> DriverResult<()> {
        let _ = (position, sql_type);
        Err(DriverError::Unsupported("output parameters".into()))
    }

    fn out_parameter(&mut self, position: usize) -> DriverResult<Value> {
        let _ = position;
        Err(DriverError::Unsupported("output parameters".into()))
    }

    fn close(&mut self) -> DriverResult<()>;
}

/// A forward-only cursor over rows.
pub trait ResultSet {
    fn columns(&self) -> &[String];

    /// Advances to the next row, returning `false` once exhausted.
    fn next(&mut self) -> DriverResult<bool>;

    /// Column value of the current row.
    fn get(&self, index: usize) -> DriverResult<&Value>;

    fn close(&mut self) -> DriverResult<()> {
        Ok(())
    }
}

/// Result set over rows that are already in memory.
#[derive(Debug, Clone, Default)]
pub struct VecResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    cursor: Option<usize>,
}

impl VecResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            cursor: None,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }
}

impl ResultSet for VecResultSet {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next(&mut self) -> DriverResult<bool> {
        let next = self.cursor.map_or(0, |c| c + 1);
        self.cursor = Some(next.min(self.rows.len()));
        Ok(next < self.rows.len())
    }

    fn get(&self, index: usize) -> DriverResult<&Value> {
        let row = self
            .cursor
            .and_then(|c| self.rows.get(c))
            .ok_or_else(|| DriverError::Failure("result set is not positioned on a row".into()))?;
        row.get(index).ok_or_else(|| {
            DriverError::Failure(format!(
                "column index {index} out of range for {} columns",
                self.columns.len()
            ))
        })
    }
}
