//! SQLite driver built on `rusqlite`.
//!
//! Query rows are stepped out of the statement as the cursor advances, so
//! only the current row is held in memory. Generated keys are small and are
//! read eagerly.

use std::{
    cell::Cell,
    os::raw::c_int,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use rusqlite::{
    types::{ToSqlOutput, ValueRef},
    CachedStatement, ErrorCode, Statement, ToSql,
};
use tracing::trace;

use super::{
    Connection, DriverError, DriverResult, FetchDirection, GeneratedKeys, IsolationLevel,
    PrepareOptions, PreparedStatement, ResultSet, VecResultSet,
};
use crate::{
    dbi::ConnectionFactory,
    value::{SqlType, Value},
};

const DEFAULT_CACHE_CAPACITY: usize = 16;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let output = match self {
            Value::Null(_) => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Bool(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(i64::from(*v))),
            Value::Int(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*v)),
            Value::Double(v) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*v)),
            Value::Decimal(v) | Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Bytes(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            Value::Date(_) | Value::Time(_) | Value::Timestamp(_) => {
                ToSqlOutput::Owned(rusqlite::types::Value::Text(self.to_string()))
            }
        };
        Ok(output)
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::NULL,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Double(v),
        ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => Value::Bytes(v.to_vec()),
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A SQLite connection.
pub struct SqliteConnection {
    conn: Option<rusqlite::Connection>,
    isolation: Cell<IsolationLevel>,
}

impl SqliteConnection {
    pub fn open<P: AsRef<Path>>(path: P) -> DriverResult<Self> {
        Ok(Self::from_raw(rusqlite::Connection::open(path)?))
    }

    pub fn open_in_memory() -> DriverResult<Self> {
        Ok(Self::from_raw(rusqlite::Connection::open_in_memory()?))
    }

    pub fn from_raw(conn: rusqlite::Connection) -> Self {
        conn.set_prepared_statement_cache_capacity(DEFAULT_CACHE_CAPACITY);
        Self {
            conn: Some(conn),
            isolation: Cell::new(IsolationLevel::Serializable),
        }
    }

    pub fn set_statement_cache_capacity(&self, capacity: usize) -> DriverResult<()> {
        self.raw()?.set_prepared_statement_cache_capacity(capacity);
        Ok(())
    }

    pub fn set_busy_timeout(&self, timeout: Duration) -> DriverResult<()> {
        self.raw()?.busy_timeout(timeout)?;
        Ok(())
    }

    fn raw(&self) -> DriverResult<&rusqlite::Connection> {
        self.conn.as_ref().ok_or(DriverError::Closed)
    }
}

impl Connection for SqliteConnection {
    fn prepare<'c>(
        &'c self,
        sql: &str,
        options: &PrepareOptions,
    ) -> DriverResult<Box<dyn PreparedStatement + 'c>> {
        let conn = self.raw()?;
        let sql = match options.keys {
            GeneratedKeys::Columns(ref columns) => {
                let columns: Vec<String> = columns.iter().map(|c| quote_identifier(c)).collect();
                format!(
                    "{} RETURNING {}",
                    sql.trim_end().trim_end_matches(';'),
                    columns.join(", ")
                )
            }
            _ => sql.to_string(),
        };

        let inner = if options.cached {
            trace!("preparing cached statement: {}", sql);
            Inner::Cached(conn.prepare_cached(&sql)?)
        } else {
            Inner::Fresh(conn.prepare(&sql)?)
        };

        Ok(Box::new(SqliteStatement::new(conn, inner, options.keys.clone())))
    }

    fn execute_script(&self, statements: &[String]) -> DriverResult<Vec<i64>> {
        let conn = self.raw()?;
        let mut counts = Vec::with_capacity(statements.len());
        for sql in statements {
            conn.execute_batch(sql)?;
            counts.push(conn.changes() as i64);
        }
        Ok(counts)
    }

    fn begin(&self) -> DriverResult<()> {
        self.raw()?.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&self) -> DriverResult<()> {
        self.raw()?.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&self) -> DriverResult<()> {
        self.raw()?.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn savepoint(&self, name: &str) -> DriverResult<()> {
        self.raw()?
            .execute_batch(&format!("SAVEPOINT {}", quote_identifier(name)))?;
        Ok(())
    }

    fn release_savepoint(&self, name: &str) -> DriverResult<()> {
        self.raw()?
            .execute_batch(&format!("RELEASE SAVEPOINT {}", quote_identifier(name)))?;
        Ok(())
    }

    fn rollback_to_savepoint(&self, name: &str) -> DriverResult<()> {
        self.raw()?
            .execute_batch(&format!("ROLLBACK TO SAVEPOINT {}", quote_identifier(name)))?;
        Ok(())
    }

    fn is_autocommit(&self) -> bool {
        self.conn.as_ref().is_none_or(|c| c.is_autocommit())
    }

    fn transaction_isolation(&self) -> DriverResult<IsolationLevel> {
        self.raw()?;
        Ok(self.isolation.get())
    }

    fn set_transaction_isolation(&self, level: IsolationLevel) -> DriverResult<()> {
        let read_uncommitted = matches!(level, IsolationLevel::ReadUncommitted);
        self.raw()?
            .pragma_update(None, "read_uncommitted", read_uncommitted)?;
        self.isolation.set(level);
        Ok(())
    }

    fn is_valid(&self) -> bool {
        self.conn
            .as_ref()
            .is_some_and(|c| c.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok())
    }

    fn close(&mut self) -> DriverResult<()> {
        match self.conn.take() {
            Some(conn) => {
                conn.close().map_err(|(conn, err)| {
                    self.conn = Some(conn);
                    DriverError::Sqlite(err)
                })
            }
            None => Ok(()),
        }
    }
}

enum Inner<'c> {
    Fresh(Statement<'c>),
    Cached(CachedStatement<'c>),
}

impl<'c> Inner<'c> {
    fn stmt(&mut self) -> &mut Statement<'c> {
        match self {
            Inner::Fresh(stmt) => stmt,
            Inner::Cached(stmt) => &mut **stmt,
        }
    }
}

/// SQLite VM instructions between two query timeout checks.
const PROGRESS_INTERVAL: c_int = 1000;

/// Runs `call` with the connection interrupted once `timeout` elapses.
fn with_timeout<T>(
    conn: &rusqlite::Connection,
    timeout: Option<Duration>,
    call: impl FnOnce() -> rusqlite::Result<T>,
) -> DriverResult<T> {
    let Some(timeout) = timeout else {
        return Ok(call()?);
    };
    let deadline = Instant::now() + timeout;
    conn.progress_handler(PROGRESS_INTERVAL, Some(move || Instant::now() >= deadline));
    let outcome = call();
    conn.progress_handler(0, None::<fn() -> bool>);
    outcome.map_err(|err| {
        match err {
            rusqlite::Error::SqliteFailure(ref failure, _)
                if failure.code == ErrorCode::OperationInterrupted =>
            {
                DriverError::Timeout(timeout)
            }
            err => DriverError::Sqlite(err),
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// No query has run since the last reset.
    Idle,
    /// The first row was read while executing and is not handed out yet.
    Primed,
    Open,
    /// The query ran out of rows, failed or hit the row limit.
    Done,
}

/// Rows of the running query, stepped out of the statement one at a time.
struct StatementRows<'c> {
    conn: &'c rusqlite::Connection,
    inner: Option<Inner<'c>>,
    columns: Vec<String>,
    row: Vec<Value>,
    state: CursorState,
    read: u64,
    max_rows: Option<u64>,
    timeout: Option<Duration>,
}

impl<'c> StatementRows<'c> {
    fn stmt(&mut self) -> DriverResult<&mut Statement<'c>> {
        self.inner
            .as_mut()
            .map(Inner::stmt)
            .ok_or_else(|| DriverError::Failure("statement is closed".into()))
    }

    fn is_running(&self) -> bool {
        matches!(self.state, CursorState::Primed | CursorState::Open)
    }

    /// Starts the bound query and reads its first row.
    fn start(&mut self) -> DriverResult<()> {
        let columns: Vec<String> = self
            .stmt()?
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        self.columns = columns;
        self.read = 0;
        self.state = CursorState::Primed;
        if let Err(err) = self.step() {
            self.state = CursorState::Idle;
            return Err(err);
        }
        Ok(())
    }

    /// Reads the next row into `row`, leaving the statement positioned on it.
    fn step(&mut self) -> DriverResult<bool> {
        let conn = self.conn;
        let width = self.columns.len();
        let StatementRows {
            inner,
            row,
            timeout,
            ..
        } = self;
        let Some(inner) = inner.as_mut() else {
            return Err(DriverError::Failure("statement is closed".into()));
        };

        let fetched = with_timeout(conn, *timeout, || {
            let mut rows = inner.stmt().raw_query();
            let fetched = match rows.next()? {
                Some(current) => {
                    row.clear();
                    for index in 0..width {
                        row.push(from_value_ref(current.get_ref(index)?));
                    }
                    true
                }
                None => false,
            };
            // Dropping `Rows` resets the statement, which would lose the position.
            std::mem::forget(rows);
            Ok(fetched)
        });

        match fetched {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.stop();
                Ok(false)
            }
            Err(err) => {
                self.stop();
                Err(err)
            }
        }
    }

    /// Ends the running query and resets the statement for the next run.
    fn stop(&mut self) {
        if self.is_running() {
            if let Some(inner) = self.inner.as_mut() {
                // A fresh `Rows` resets its statement when dropped.
                drop(inner.stmt().raw_query());
            }
        }
        self.row.clear();
        if self.state != CursorState::Idle {
            self.state = CursorState::Done;
        }
    }

    fn reset(&mut self) {
        self.stop();
        self.state = CursorState::Idle;
    }
}

impl Drop for StatementRows<'_> {
    fn drop(&mut self) {
        // Cached statements go back to the cache without a reset.
        self.reset();
    }
}

impl ResultSet for StatementRows<'_> {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next(&mut self) -> DriverResult<bool> {
        match self.state {
            CursorState::Idle | CursorState::Done => Ok(false),
            CursorState::Primed => {
                self.state = CursorState::Open;
                self.read = 1;
                Ok(true)
            }
            CursorState::Open => {
                if self.max_rows.is_some_and(|max| self.read >= max) {
                    trace!("row limit of {} reached", self.read);
                    self.stop();
                    return Ok(false);
                }
                let advanced = self.step()?;
                if advanced {
                    self.read += 1;
                }
                Ok(advanced)
            }
        }
    }

    fn get(&self, index: usize) -> DriverResult<&Value> {
        if self.state != CursorState::Open {
            return Err(DriverError::Failure("result set is not positioned on a row".into()));
        }
        self.row.get(index).ok_or_else(|| {
            DriverError::Failure(format!(
                "column index {index} out of range for {} columns",
                self.columns.len()
            ))
        })
    }

    fn close(&mut self) -> DriverResult<()> {
        self.reset();
        Ok(())
    }
}

/// A statement prepared on a [`SqliteConnection`].
pub struct SqliteStatement<'c> {
    conn: &'c rusqlite::Connection,
    rows: StatementRows<'c>,
    keys: GeneratedKeys,
    params: Vec<Option<Value>>,
    batch: Vec<Vec<Option<Value>>>,
    keys_result: Option<VecResultSet>,
    update_count: Option<u64>,
    fetch_size: Option<u32>,
    direction: FetchDirection,
}

enum Outcome {
    Rows,
    Keys(VecResultSet, u64),
    Count(u64),
}

impl<'c> SqliteStatement<'c> {
    fn new(conn: &'c rusqlite::Connection, inner: Inner<'c>, keys: GeneratedKeys) -> Self {
        Self {
            conn,
            rows: StatementRows {
                conn,
                inner: Some(inner),
                columns: Vec::new(),
                row: Vec::new(),
                state: CursorState::Idle,
                read: 0,
                max_rows: None,
                timeout: None,
            },
            keys,
            params: Vec::new(),
            batch: Vec::new(),
            keys_result: None,
            update_count: None,
            fetch_size: None,
            direction: FetchDirection::Forward,
        }
    }

    fn run(&mut self, params: &[Option<Value>], batch: bool) -> DriverResult<Outcome> {
        self.rows.reset();
        let conn = self.conn;
        let timeout = self.rows.timeout;
        let keys = self.keys.clone();
        let stmt = self.rows.stmt()?;

        bind_all(stmt, params)?;

        match keys {
            GeneratedKeys::Columns(_) => {
                let rows = with_timeout(conn, timeout, || collect_rows(stmt))?;
                Ok(Outcome::Keys(rows, conn.changes() as u64))
            }
            _ if stmt.column_count() > 0 => {
                if batch {
                    return Err(DriverError::Failure(
                        "batch entry produced a result set".into(),
                    ));
                }
                self.rows.start()?;
                Ok(Outcome::Rows)
            }
            GeneratedKeys::Generic => {
                let count = with_timeout(conn, timeout, || stmt.raw_execute())? as u64;
                let keys = VecResultSet::new(
                    vec!["last_insert_rowid".into()],
                    vec![vec![Value::Int(conn.last_insert_rowid())]],
                );
                Ok(Outcome::Keys(keys, count))
            }
            GeneratedKeys::None => {
                let count = with_timeout(conn, timeout, || stmt.raw_execute())?;
                Ok(Outcome::Count(count as u64))
            }
        }
    }

    /// Rows per round trip requested by the caller. SQLite steps one row at
    /// a time, so this is only a hint.
    pub fn fetch_size(&self) -> Option<u32> {
        self.fetch_size
    }

    pub fn fetch_direction(&self) -> FetchDirection {
        self.direction
    }
}

fn bind_all(stmt: &mut Statement<'_>, params: &[Option<Value>]) -> DriverResult<()> {
    let count = stmt.parameter_count();
    if params.len() > count {
        return Err(DriverError::Failure(format!(
            "{} parameters bound but the statement declares {}",
            params.len(),
            count
        )));
    }
    for position in 1..=count {
        match params.get(position - 1) {
            Some(Some(value)) => stmt.raw_bind_parameter(position, value)?,
            _ => {
                return Err(DriverError::Failure(format!(
                    "parameter {position} of {count} was never bound"
                )))
            }
        }
    }
    Ok(())
}

fn collect_rows(stmt: &mut Statement<'_>) -> rusqlite::Result<VecResultSet> {
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut out = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for index in 0..width {
            values.push(from_value_ref(row.get_ref(index)?));
        }
        out.push(values);
    }

    Ok(VecResultSet::new(columns, out))
}

impl PreparedStatement for SqliteStatement<'_> {
    fn set_value(&mut self, position: usize, value: &Value) -> DriverResult<()> {
        if position == 0 {
            return Err(DriverError::Failure("parameter positions start at 1".into()));
        }
        if self.params.len() < position {
            self.params.resize(position, None);
        }
        self.params[position - 1] = Some(value.clone());
        Ok(())
    }

    fn set_null(&mut self, position: usize, sql_type: SqlType) -> DriverResult<()> {
        self.set_value(position, &Value::Null(sql_type))
    }

    fn clear_parameters(&mut self) -> DriverResult<()> {
        self.params.clear();
        Ok(())
    }

    fn add_batch(&mut self) -> DriverResult<()> {
        let params = std::mem::take(&mut self.params);
        self.batch.push(params);
        Ok(())
    }

    fn execute_batch(&mut self) -> DriverResult<Vec<i64>> {
        let batch = std::mem::take(&mut self.batch);
        let mut counts = Vec::with_capacity(batch.len());
        let mut key_columns = Vec::new();
        let mut key_rows = Vec::new();

        for params in &batch {
            match self.run(params, true)? {
                Outcome::Keys(keys, count) => {
                    key_columns = keys.columns().to_vec();
                    key_rows.extend(keys.into_rows());
                    counts.push(count as i64);
                }
                Outcome::Count(count) => counts.push(count as i64),
                Outcome::Rows => {
                    self.rows.reset();
                    return Err(DriverError::Failure(
                        "batch entry produced a result set".into(),
                    ));
                }
            }
        }

        if self.keys.is_requested() {
            self.keys_result = Some(VecResultSet::new(key_columns, key_rows));
        }
        self.update_count = Some(counts.iter().map(|c| *c as u64).sum());
        Ok(counts)
    }

    fn execute(&mut self) -> DriverResult<bool> {
        let params = std::mem::take(&mut self.params);
        let outcome = self.run(&params, false);
        self.params = params;

        match outcome? {
            Outcome::Rows => {
                self.update_count = None;
                Ok(true)
            }
            Outcome::Keys(keys, count) => {
                self.keys_result = Some(keys);
                self.update_count = Some(count);
                Ok(false)
            }
            Outcome::Count(count) => {
                self.update_count = Some(count);
                Ok(false)
            }
        }
    }

    fn result_set(&mut self) -> DriverResult<Option<Box<dyn ResultSet>>> {
        Ok(None)
    }

    fn cursor(&mut self) -> Option<&mut dyn ResultSet> {
        if self.rows.state == CursorState::Idle {
            return None;
        }
        Some(&mut self.rows)
    }

    fn update_count(&self) -> Option<u64> {
        self.update_count
    }

    fn generated_keys(&mut self) -> DriverResult<Option<Box<dyn ResultSet>>> {
        Ok(self
            .keys_result
            .take()
            .map(|rs| Box::new(rs) as Box<dyn ResultSet>))
    }

    fn set_fetch_size(&mut self, rows: u32) -> DriverResult<()> {
        self.fetch_size = Some(rows);
        Ok(())
    }

    fn set_max_rows(&mut self, rows: u64) -> DriverResult<()> {
        self.rows.max_rows = if rows == 0 { None } else { Some(rows) };
        Ok(())
    }

    fn set_query_timeout(&mut self, timeout: Duration) -> DriverResult<()> {
        self.rows.timeout = if timeout.is_zero() { None } else { Some(timeout) };
        Ok(())
    }

    fn set_fetch_direction(&mut self, direction: FetchDirection) -> DriverResult<()> {
        self.direction = direction;
        Ok(())
    }

    fn close(&mut self) -> DriverResult<()> {
        self.rows.reset();
        self.rows.inner = None;
        self.keys_result = None;
        Ok(())
    }
}

/// Where a [`SqliteConnectionFactory`] opens its connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteTarget {
    File(PathBuf),
    /// A private in-memory database per connection.
    Memory,
}

/// Opens SQLite connections for a `Dbi`.
#[derive(Debug, Clone)]
pub struct SqliteConnectionFactory {
    target: SqliteTarget,
    cache_capacity: usize,
    busy_timeout: Option<Duration>,
}

impl SqliteConnectionFactory {
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            target: SqliteTarget::File(path.into()),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            busy_timeout: None,
        }
    }

    pub fn memory() -> Self {
        Self {
            target: SqliteTarget::Memory,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            busy_timeout: None,
        }
    }

    /// Parses a database location, where `:memory:` selects an in-memory database.
    pub fn from_location(location: &str) -> Self {
        if location == ":memory:" {
            Self::memory()
        } else {
            Self::file(location)
        }
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    pub fn target(&self) -> &SqliteTarget {
        &self.target
    }
}

impl ConnectionFactory for SqliteConnectionFactory {
    fn open(&self) -> DriverResult<Box<dyn Connection>> {
        let conn = match self.target {
            SqliteTarget::File(ref path) => SqliteConnection::open(path)?,
            SqliteTarget::Memory => SqliteConnection::open_in_memory()?,
        };
        conn.set_statement_cache_capacity(self.cache_capacity)?;
        if let Some(timeout) = self.busy_timeout {
            conn.set_busy_timeout(timeout)?;
        }
        Ok(Box::new(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SqliteConnection {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute_script(&[
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL)".into(),
        ])
        .unwrap();
        conn
    }

    fn insert(conn: &SqliteConnection, name: &str) {
        let mut stmt = conn
            .prepare(
                "INSERT INTO users (name) VALUES (?)",
                &PrepareOptions::default(),
            )
            .unwrap();
        stmt.set_value(1, &Value::Text(name.into())).unwrap();
        assert!(!stmt.execute().unwrap());
        assert_eq!(stmt.update_count(), Some(1));
        stmt.close().unwrap();
    }

    #[test]
    fn test_query_reads_rows_through_cursor() {
        let conn = setup();
        insert(&conn, "alice");
        insert(&conn, "bob");

        let mut stmt = conn
            .prepare("SELECT id, name FROM users ORDER BY id", &PrepareOptions::default())
            .unwrap();
        assert!(stmt.execute().unwrap());
        assert!(stmt.result_set().unwrap().is_none());

        let rs = stmt.cursor().unwrap();
        assert_eq!(rs.columns(), &["id".to_string(), "name".to_string()]);
        assert!(rs.get(0).is_err());
        assert!(rs.next().unwrap());
        assert_eq!(rs.get(1).unwrap(), &Value::Text("alice".into()));
        assert!(rs.next().unwrap());
        assert!(!rs.next().unwrap());
        assert!(rs.get(0).is_err());

        stmt.close().unwrap();
        assert!(stmt.cursor().is_none());
    }

    #[test]
    fn test_rows_are_stepped_on_demand() {
        let conn = setup();
        let mut stmt = conn
            .prepare(
                "WITH t(x) AS (VALUES (1), (2))
                 SELECT x, CASE WHEN x = 2 THEN abs(x - 9223372036854775807 - 3) ELSE x END AS y
                 FROM t",
                &PrepareOptions::default(),
            )
            .unwrap();
        assert!(stmt.execute().unwrap());

        let rs = stmt.cursor().unwrap();
        assert!(rs.next().unwrap());
        assert_eq!(rs.get(1).unwrap(), &Value::Int(1));
        assert!(rs.next().unwrap_err().to_string().contains("integer overflow"));
        assert!(!rs.next().unwrap());
    }

    #[test]
    fn test_abandoned_cursor_resets_statement() {
        let conn = setup();
        for name in ["a", "b", "c"] {
            insert(&conn, name);
        }
        let options = PrepareOptions {
            keys: GeneratedKeys::None,
            cached: true,
        };
        let sql = "SELECT name FROM users ORDER BY id";

        let mut stmt = conn.prepare(sql, &options).unwrap();
        assert!(stmt.execute().unwrap());
        let rs = stmt.cursor().unwrap();
        assert!(rs.next().unwrap());
        assert_eq!(rs.get(0).unwrap(), &Value::Text("a".into()));
        stmt.close().unwrap();

        let mut stmt = conn.prepare(sql, &options).unwrap();
        assert!(stmt.execute().unwrap());
        let rs = stmt.cursor().unwrap();
        assert!(rs.next().unwrap());
        assert_eq!(rs.get(0).unwrap(), &Value::Text("a".into()));
    }

    #[test]
    fn test_max_rows_limits_result() {
        let conn = setup();
        for name in ["a", "b", "c"] {
            insert(&conn, name);
        }

        let mut stmt = conn
            .prepare("SELECT name FROM users", &PrepareOptions::default())
            .unwrap();
        stmt.set_max_rows(2).unwrap();
        stmt.execute().unwrap();
        let rs = stmt.cursor().unwrap();
        let mut count = 0;
        while rs.next().unwrap() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn test_generated_keys_by_column() {
        let conn = setup();
        let options = PrepareOptions {
            keys: GeneratedKeys::columns(["id"]),
            cached: false,
        };
        let mut stmt = conn
            .prepare("INSERT INTO users (name) VALUES (?);", &options)
            .unwrap();
        stmt.set_value(1, &Value::Text("carol".into())).unwrap();
        assert!(!stmt.execute().unwrap());
        assert_eq!(stmt.update_count(), Some(1));

        let mut keys = stmt.generated_keys().unwrap().unwrap();
        assert_eq!(keys.columns(), &["id".to_string()]);
        assert!(keys.next().unwrap());
        assert_eq!(keys.get(0).unwrap(), &Value::Int(1));
    }

    #[test]
    fn test_generic_generated_keys() {
        let conn = setup();
        insert(&conn, "first");
        let options = PrepareOptions {
            keys: GeneratedKeys::Generic,
            cached: true,
        };
        let mut stmt = conn
            .prepare("INSERT INTO users (name) VALUES (?)", &options)
            .unwrap();
        stmt.set_value(1, &Value::Text("second".into())).unwrap();
        stmt.execute().unwrap();

        let mut keys = stmt.generated_keys().unwrap().unwrap();
        assert!(keys.next().unwrap());
        assert_eq!(keys.get(0).unwrap(), &Value::Int(2));
    }

    #[test]
    fn test_batch_execution() {
        let conn = setup();
        let mut stmt = conn
            .prepare(
                "INSERT INTO users (name, score) VALUES (?, ?)",
                &PrepareOptions::default(),
            )
            .unwrap();
        for (name, score) in [("a", 1.0), ("b", 2.5)] {
            stmt.set_value(1, &Value::Text(name.into())).unwrap();
            stmt.set_value(2, &Value::Double(score)).unwrap();
            stmt.add_batch().unwrap();
        }
        assert_eq!(stmt.execute_batch().unwrap(), vec![1, 1]);
        assert_eq!(stmt.update_count(), Some(2));
    }

    #[test]
    fn test_too_many_parameters() {
        let conn = setup();
        let mut stmt = conn
            .prepare("SELECT * FROM users WHERE id = ?", &PrepareOptions::default())
            .unwrap();
        stmt.set_value(2, &Value::Int(1)).unwrap();
        assert!(stmt.execute().is_err());
    }

    #[test]
    fn test_unbound_parameters_are_rejected() {
        let conn = setup();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM users WHERE id = ? AND name = ?",
                &PrepareOptions::default(),
            )
            .unwrap();

        stmt.set_value(1, &Value::Int(1)).unwrap();
        let err = stmt.execute().unwrap_err();
        assert!(err.to_string().contains("parameter 2 of 2 was never bound"));

        stmt.clear_parameters().unwrap();
        stmt.set_value(2, &Value::Text("a".into())).unwrap();
        let err = stmt.execute().unwrap_err();
        assert!(err.to_string().contains("parameter 1 of 2 was never bound"));

        stmt.set_null(1, SqlType::Integer).unwrap();
        assert!(stmt.execute().unwrap());
    }

    const COUNT_TO_FIVE_MILLION: &str = "WITH RECURSIVE c(x) AS (
            SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 5000000
        )
        SELECT count(*) AS n FROM c";

    #[test]
    fn test_query_timeout_interrupts_statement() {
        let conn = setup();
        let timeout = Duration::from_millis(10);

        let mut stmt = conn
            .prepare(COUNT_TO_FIVE_MILLION, &PrepareOptions::default())
            .unwrap();
        stmt.set_query_timeout(timeout).unwrap();
        let started = Instant::now();
        let err = stmt.execute().unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(err, DriverError::Timeout(limit) if limit == timeout));
        stmt.close().unwrap();

        std::thread::sleep(Duration::from_millis(20));
        let mut stmt = conn
            .prepare("SELECT count(*) FROM users", &PrepareOptions::default())
            .unwrap();
        assert!(stmt.execute().unwrap());
        assert!(stmt.cursor().unwrap().next().unwrap());
    }

    #[test]
    fn test_generous_query_timeout_completes() {
        let conn = setup();
        insert(&conn, "alice");
        let mut stmt = conn
            .prepare("SELECT name FROM users", &PrepareOptions::default())
            .unwrap();
        stmt.set_query_timeout(Duration::from_secs(30)).unwrap();
        assert!(stmt.execute().unwrap());
        let rs = stmt.cursor().unwrap();
        assert!(rs.next().unwrap());
        assert_eq!(rs.get(0).unwrap(), &Value::Text("alice".into()));
        assert!(!rs.next().unwrap());
    }

    #[test]
    fn test_transactions_and_savepoints() {
        let conn = setup();
        assert!(conn.is_autocommit());

        conn.begin().unwrap();
        assert!(!conn.is_autocommit());
        insert(&conn, "kept");
        conn.savepoint("sp 1").unwrap();
        insert(&conn, "dropped");
        conn.rollback_to_savepoint("sp 1").unwrap();
        conn.release_savepoint("sp 1").unwrap();
        conn.commit().unwrap();
        assert!(conn.is_autocommit());

        let mut stmt = conn
            .prepare("SELECT count(*) FROM users", &PrepareOptions::default())
            .unwrap();
        stmt.execute().unwrap();
        let rs = stmt.cursor().unwrap();
        rs.next().unwrap();
        assert_eq!(rs.get(0).unwrap(), &Value::Int(1));
    }

    #[test]
    fn test_isolation_level_round_trip() {
        let conn = setup();
        assert_eq!(
            conn.transaction_isolation().unwrap(),
            IsolationLevel::Serializable
        );
        conn.set_transaction_isolation(IsolationLevel::ReadUncommitted)
            .unwrap();
        assert_eq!(
            conn.transaction_isolation().unwrap(),
            IsolationLevel::ReadUncommitted
        );
    }

    #[test]
    fn test_closed_connection() {
        let mut conn = setup();
        assert!(conn.is_valid());
        conn.close().unwrap();
        assert!(!conn.is_valid());
        assert!(matches!(
            conn.prepare("SELECT 1", &PrepareOptions::default()),
            Err(DriverError::Closed)
        ));
    }

    #[test]
    fn test_prepare_call_unsupported() {
        let conn = setup();
        assert!(matches!(
            conn.prepare_call("CALL proc()"),
            Err(DriverError::Unsupported(_))
        ));
    }

    #[test]
    fn test_factory_opens_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let factory = SqliteConnectionFactory::file(dir.path().join("test.db"));
        let conn = factory.open().unwrap();
        assert!(conn.is_valid());
        assert_eq!(
            SqliteConnectionFactory::from_location(":memory:").target(),
            &SqliteTarget::Memory
        );
    }
}
