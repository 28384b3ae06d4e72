#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use sqlbind_core::{
    builder::{DefaultStatementBuilder, StatementBuilder},
    driver::{
        sqlite::SqliteConnectionFactory, Connection, DriverError, DriverResult, FetchDirection,
        IsolationLevel, PrepareOptions, PreparedStatement, ResultSet, VecResultSet,
    },
    rewriter::ParsedStatement,
    Dbi, SqlType, StatementContext, Value,
};

/// What the mock driver does when asked.
#[derive(Debug, Clone)]
pub struct Behavior {
    pub fail_prepare: bool,
    pub fail_execute: bool,
    pub fail_close: bool,
    pub rows: Option<(Vec<String>, Vec<Vec<Value>>)>,
    pub outs: HashMap<usize, Value>,
    pub isolation: IsolationLevel,
    pub in_transaction: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            fail_prepare: false,
            fail_execute: false,
            fail_close: false,
            rows: None,
            outs: HashMap::new(),
            isolation: IsolationLevel::ReadCommitted,
            in_transaction: false,
        }
    }
}

/// A driver that records every call it receives.
#[derive(Clone, Default)]
pub struct MockDriver {
    calls: Arc<Mutex<Vec<String>>>,
    behavior: Arc<Mutex<Behavior>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure<F: FnOnce(&mut Behavior)>(&self, f: F) {
        f(&mut self.behavior.lock().unwrap());
    }

    pub fn behavior(&self) -> Behavior {
        self.behavior.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record<S: Into<String>>(&self, call: S) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn connection(&self) -> Box<dyn Connection> {
        Box::new(MockConnection {
            driver: self.clone(),
        })
    }

    pub fn dbi(&self) -> Dbi {
        let driver = self.clone();
        Dbi::new(move || -> DriverResult<Box<dyn Connection>> { Ok(driver.connection()) })
    }
}

fn failure(what: &str) -> DriverError {
    DriverError::Failure(format!("{what} failed"))
}

pub struct MockConnection {
    driver: MockDriver,
}

impl MockConnection {
    fn statement(&self) -> Box<dyn PreparedStatement> {
        Box::new(MockStatement {
            driver: self.driver.clone(),
            pending_batch: 0,
            result: None,
        })
    }
}

impl Connection for MockConnection {
    fn prepare<'c>(
        &'c self,
        sql: &str,
        options: &PrepareOptions,
    ) -> DriverResult<Box<dyn PreparedStatement + 'c>> {
        if self.driver.behavior().fail_prepare {
            return Err(failure("prepare"));
        }
        if options.cached {
            self.driver.record(format!("prepare_cached {sql}"));
        } else {
            self.driver.record(format!("prepare {sql}"));
        }
        Ok(self.statement())
    }

    fn prepare_call<'c>(&'c self, sql: &str) -> DriverResult<Box<dyn PreparedStatement + 'c>> {
        self.driver.record(format!("prepare_call {sql}"));
        Ok(self.statement())
    }

    fn begin(&self) -> DriverResult<()> {
        self.driver.record("begin");
        self.driver.configure(|b| b.in_transaction = true);
        Ok(())
    }

    fn commit(&self) -> DriverResult<()> {
        self.driver.record("commit");
        self.driver.configure(|b| b.in_transaction = false);
        Ok(())
    }

    fn rollback(&self) -> DriverResult<()> {
        self.driver.record("rollback");
        self.driver.configure(|b| b.in_transaction = false);
        Ok(())
    }

    fn savepoint(&self, name: &str) -> DriverResult<()> {
        self.driver.record(format!("savepoint {name}"));
        Ok(())
    }

    fn release_savepoint(&self, name: &str) -> DriverResult<()> {
        self.driver.record(format!("release {name}"));
        Ok(())
    }

    fn rollback_to_savepoint(&self, name: &str) -> DriverResult<()> {
        self.driver.record(format!("rollback_to {name}"));
        Ok(())
    }

    fn is_autocommit(&self) -> bool {
        !self.driver.behavior().in_transaction
    }

    fn transaction_isolation(&self) -> DriverResult<IsolationLevel> {
        Ok(self.driver.behavior().isolation)
    }

    fn set_transaction_isolation(&self, level: IsolationLevel) -> DriverResult<()> {
        self.driver.record(format!("isolation {level}"));
        self.driver.configure(|b| b.isolation = level);
        Ok(())
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn close(&mut self) -> DriverResult<()> {
        self.driver.record("disconnect");
        Ok(())
    }
}

pub struct MockStatement {
    driver: MockDriver,
    pending_batch: usize,
    result: Option<VecResultSet>,
}

impl PreparedStatement for MockStatement {
    fn set_value(&mut self, position: usize, value: &Value) -> DriverResult<()> {
        self.driver.record(format!("set {position}={value}"));
        Ok(())
    }

    fn set_null(&mut self, position: usize, sql_type: SqlType) -> DriverResult<()> {
        self.driver.record(format!("null {position} {sql_type:?}"));
        Ok(())
    }

    fn clear_parameters(&mut self) -> DriverResult<()> {
        self.driver.record("clear");
        Ok(())
    }

    fn add_batch(&mut self) -> DriverResult<()> {
        self.driver.record("add_batch");
        self.pending_batch += 1;
        Ok(())
    }

    fn execute_batch(&mut self) -> DriverResult<Vec<i64>> {
        self.driver.record(format!("execute_batch {}", self.pending_batch));
        if self.driver.behavior().fail_execute {
            return Err(failure("execute_batch"));
        }
        let counts = vec![1; self.pending_batch];
        self.pending_batch = 0;
        Ok(counts)
    }

    fn execute(&mut self) -> DriverResult<bool> {
        self.driver.record("execute");
        let behavior = self.driver.behavior();
        if behavior.fail_execute {
            return Err(failure("execute"));
        }
        match behavior.rows {
            Some((columns, rows)) => {
                self.result = Some(VecResultSet::new(columns, rows));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn result_set(&mut self) -> DriverResult<Option<Box<dyn ResultSet>>> {
        Ok(self
            .result
            .take()
            .map(|rs| Box::new(rs) as Box<dyn ResultSet>))
    }

    fn update_count(&self) -> Option<u64> {
        Some(1)
    }

    fn generated_keys(&mut self) -> DriverResult<Option<Box<dyn ResultSet>>> {
        Ok(None)
    }

    fn set_fetch_size(&mut self, rows: u32) -> DriverResult<()> {
        self.driver.record(format!("fetch_size {rows}"));
        Ok(())
    }

    fn set_max_rows(&mut self, rows: u64) -> DriverResult<()> {
        self.driver.record(format!("max_rows {rows}"));
        Ok(())
    }

    fn set_query_timeout(&mut self, timeout: Duration) -> DriverResult<()> {
        self.driver.record(format!("timeout {}", timeout.as_secs()));
        Ok(())
    }

    fn set_fetch_direction(&mut self, direction: FetchDirection) -> DriverResult<()> {
        self.driver.record(format!("direction {direction:?}"));
        Ok(())
    }

    fn register_out_parameter(&mut self, position: usize, sql_type: SqlType) -> DriverResult<()> {
        self.driver.record(format!("out {position} {sql_type:?}"));
        Ok(())
    }

    fn out_parameter(&mut self, position: usize) -> DriverResult<Value> {
        Ok(self
            .driver
            .behavior()
            .outs
            .get(&position)
            .cloned()
            .unwrap_or(Value::NULL))
    }

    fn close(&mut self) -> DriverResult<()> {
        self.driver.record("close");
        if self.driver.behavior().fail_close {
            return Err(failure("close"));
        }
        Ok(())
    }
}

/// Counts statements created and closed through the builder.
#[derive(Debug, Clone, Default)]
pub struct SpyBuilder {
    pub created: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl SpyBuilder {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl StatementBuilder for SpyBuilder {
    fn create<'c>(
        &self,
        conn: &'c dyn Connection,
        parsed: &ParsedStatement,
        ctx: &StatementContext,
    ) -> DriverResult<Box<dyn PreparedStatement + 'c>> {
        let stmt = DefaultStatementBuilder.create(conn, parsed, ctx)?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(stmt)
    }

    fn create_call<'c>(
        &self,
        conn: &'c dyn Connection,
        parsed: &ParsedStatement,
        _ctx: &StatementContext,
    ) -> DriverResult<Box<dyn PreparedStatement + 'c>> {
        let stmt = conn.prepare_call(parsed.sql())?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(stmt)
    }

    fn close(&self, stmt: &mut dyn PreparedStatement, _ctx: &StatementContext) -> DriverResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        stmt.close()
    }
}

/// A `Dbi` over a fresh in-memory SQLite database per handle.
pub fn sqlite() -> Dbi {
    Dbi::new(SqliteConnectionFactory::memory())
}

pub const USERS: &str = "CREATE TABLE users (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    score REAL,
    tenant INTEGER
)";
