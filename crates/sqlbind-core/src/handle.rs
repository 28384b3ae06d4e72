//! A single connection with statement factories and transaction control.

use std::{cell::RefCell, collections::HashMap, fmt, sync::Arc};

use sqlbind_events::{EventSinkHandle, NullSink, SqlEvent};
use tracing::{debug, warn};

use crate::{
    batch::PreparedBatch,
    builder::{DefaultStatementBuilder, StatementBuilder},
    call::Call,
    context::StatementContext,
    customizer::StatementCustomizer,
    driver::{Connection, DriverError, IsolationLevel},
    error::{CleanupErrors, ContextSnapshot, DbiError, Result},
    locator::{ChainLocator, StatementLocator},
    mapper::RowMap,
    query::Query,
    registry::Registries,
    rewriter::{ColonPrefixRewriter, StatementRewriter},
    script::Script,
    statement::Bindable,
    transaction::{LocalTransactionHandler, TransactionHandler},
    update::Update,
    value::Value,
};

/// Collaborators a [`Dbi`](crate::Dbi) hands to every handle it opens.
#[derive(Clone)]
pub(crate) struct HandleSettings {
    pub rewriter: Arc<dyn StatementRewriter>,
    pub locator: Arc<dyn StatementLocator>,
    pub builder: Arc<dyn StatementBuilder>,
    pub transactions: Arc<dyn TransactionHandler>,
    pub sink: EventSinkHandle,
    pub customizers: Vec<Arc<dyn StatementCustomizer>>,
    pub batch_chunk_size: Option<usize>,
    pub log_sql: bool,
}

impl Default for HandleSettings {
    fn default() -> Self {
        Self {
            rewriter: Arc::new(ColonPrefixRewriter::new()),
            locator: Arc::new(ChainLocator::default()),
            builder: Arc::new(DefaultStatementBuilder),
            transactions: Arc::new(LocalTransactionHandler),
            sink: Arc::new(NullSink),
            customizers: Vec::new(),
            batch_chunk_size: None,
            log_sql: true,
        }
    }
}

/// One open connection.
///
/// Statements borrow the handle and must be finished before it is closed.
/// Dropping a handle closes it; an open transaction is rolled back.
pub struct Handle {
    conn: Option<Box<dyn Connection>>,
    settings: HandleSettings,
    registries: Arc<Registries>,
    attributes: RefCell<HashMap<String, Value>>,
}

impl Handle {
    pub(crate) fn new(
        conn: Box<dyn Connection>,
        settings: HandleSettings,
        registries: Arc<Registries>,
        attributes: HashMap<String, Value>,
    ) -> Self {
        settings.sink.emit(SqlEvent::HandleOpened);
        Self {
            conn: Some(conn),
            settings,
            registries,
            attributes: RefCell::new(attributes),
        }
    }

    /// Wraps a connection with default settings and fresh registries.
    pub fn from_connection(conn: Box<dyn Connection>) -> Self {
        Self::new(
            conn,
            HandleSettings::default(),
            Arc::new(Registries::new()),
            HashMap::new(),
        )
    }

    /// This handle's registries, forked from its `Dbi` when opened.
    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    /// Defines an attribute inherited by every statement created afterwards.
    pub fn define<K: Into<String>, V: Into<Value>>(&self, key: K, value: V) {
        self.attributes.borrow_mut().insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.attributes.borrow().get(key).cloned()
    }

    pub(crate) fn new_context(&self, sql: &str) -> StatementContext {
        let mut ctx = StatementContext::new(sql, self.registries.clone());
        ctx.define_all(&self.attributes.borrow());
        ctx
    }

    pub(crate) fn connection(&self) -> Result<&dyn Connection> {
        self.conn.as_deref().ok_or(DbiError::Closed)
    }

    pub(crate) fn locator(&self) -> &Arc<dyn StatementLocator> {
        &self.settings.locator
    }

    pub(crate) fn rewriter(&self) -> &Arc<dyn StatementRewriter> {
        &self.settings.rewriter
    }

    pub(crate) fn builder(&self) -> &Arc<dyn StatementBuilder> {
        &self.settings.builder
    }

    pub(crate) fn sink(&self) -> &EventSinkHandle {
        &self.settings.sink
    }

    pub(crate) fn default_customizers(&self) -> &[Arc<dyn StatementCustomizer>] {
        &self.settings.customizers
    }

    pub(crate) fn batch_chunk_size(&self) -> Option<usize> {
        self.settings.batch_chunk_size
    }

    pub(crate) fn log_sql(&self) -> bool {
        self.settings.log_sql
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    pub fn is_valid(&self) -> bool {
        self.conn.as_deref().is_some_and(|conn| conn.is_valid())
    }

    pub fn create_query(&self, sql: &str) -> Query<'_, RowMap> {
        Query::new(self, sql)
    }

    pub fn create_update(&self, sql: &str) -> Update<'_> {
        Update::new(self, sql)
    }

    pub fn create_call(&self, sql: &str) -> Call<'_> {
        Call::new(self, sql)
    }

    pub fn prepare_batch(&self, sql: &str) -> PreparedBatch<'_> {
        PreparedBatch::new(self, sql)
    }

    pub fn create_script(&self, sql: &str) -> Script<'_> {
        Script::new(self, sql)
    }

    /// Runs an update with positional arguments.
    pub fn execute(&self, sql: &str, args: &[Value]) -> Result<u64> {
        self.create_update(sql)
            .bind_values(args.iter().cloned())
            .execute()
    }

    /// Runs a query with positional arguments and returns every row.
    pub fn select(&self, sql: &str, args: &[Value]) -> Result<Vec<RowMap>> {
        self.create_query(sql)
            .bind_values(args.iter().cloned())
            .list()
    }

    fn transaction_error(message: &str, cause: DriverError) -> DbiError {
        DbiError::transaction(message, Some(cause))
    }

    pub fn is_in_transaction(&self) -> bool {
        self.conn
            .as_deref()
            .is_some_and(|conn| self.settings.transactions.is_in_transaction(conn))
    }

    pub fn begin(&self) -> Result<()> {
        let conn = self.connection()?;
        if self.settings.transactions.is_in_transaction(conn) {
            return Err(DbiError::transaction("A transaction is already open", None));
        }
        self.settings
            .transactions
            .begin(conn)
            .map_err(|e| Self::transaction_error("Unable to begin transaction", e))?;
        self.sink().emit(SqlEvent::TransactionBegun);
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        let conn = self.connection()?;
        self.settings
            .transactions
            .commit(conn)
            .map_err(|e| Self::transaction_error("Unable to commit transaction", e))?;
        self.sink().emit(SqlEvent::TransactionCommitted);
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        let conn = self.connection()?;
        self.settings
            .transactions
            .rollback(conn)
            .map_err(|e| Self::transaction_error("Unable to rollback transaction", e))?;
        self.sink().emit(SqlEvent::TransactionRolledBack);
        Ok(())
    }

    /// Creates a named savepoint in the open transaction.
    pub fn checkpoint(&self, name: &str) -> Result<()> {
        let conn = self.connection()?;
        self.settings
            .transactions
            .savepoint(conn, name)
            .map_err(|e| Self::transaction_error("Unable to create savepoint", e))?;
        self.sink().emit(SqlEvent::CheckpointCreated {
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn release(&self, name: &str) -> Result<()> {
        let conn = self.connection()?;
        self.settings
            .transactions
            .release_savepoint(conn, name)
            .map_err(|e| Self::transaction_error("Unable to release savepoint", e))?;
        self.sink().emit(SqlEvent::CheckpointReleased {
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn rollback_to(&self, name: &str) -> Result<()> {
        let conn = self.connection()?;
        self.settings
            .transactions
            .rollback_to_savepoint(conn, name)
            .map_err(|e| Self::transaction_error("Unable to rollback to savepoint", e))?;
        self.sink().emit(SqlEvent::RolledBackToCheckpoint {
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn transaction_isolation(&self) -> Result<IsolationLevel> {
        self.connection()?
            .transaction_isolation()
            .map_err(|e| Self::transaction_error("Unable to read isolation level", e))
    }

    pub fn set_transaction_isolation(&self, level: IsolationLevel) -> Result<()> {
        self.connection()?
            .set_transaction_isolation(level)
            .map_err(|e| Self::transaction_error("Unable to set isolation level", e))
    }

    /// Runs `f` in a transaction, committing on success and rolling back on
    /// error. Inside an open transaction `f` simply participates in it.
    pub fn in_transaction<R, E, F>(&self, f: F) -> std::result::Result<R, E>
    where
        E: From<DbiError>,
        F: FnOnce(&Handle) -> std::result::Result<R, E>,
    {
        self.in_transaction_with(None, f)
    }

    /// Like [`in_transaction`](Handle::in_transaction) at the given isolation
    /// level.
    ///
    /// Joining an open transaction that runs at a different level fails
    /// without calling `f`. A level changed for a new transaction is
    /// restored afterwards.
    pub fn in_transaction_with<R, E, F>(
        &self,
        isolation: Option<IsolationLevel>,
        f: F,
    ) -> std::result::Result<R, E>
    where
        E: From<DbiError>,
        F: FnOnce(&Handle) -> std::result::Result<R, E>,
    {
        if self.is_in_transaction() {
            if let Some(level) = isolation {
                let current = self.transaction_isolation()?;
                if current != level {
                    return Err(DbiError::transaction(
                        format!(
                            "Tried to enter a transaction at isolation {level}, but the open transaction runs at {current}"
                        ),
                        None,
                    )
                    .into());
                }
            }
            return f(self);
        }

        let restore = match isolation {
            Some(level) => {
                let current = self.transaction_isolation()?;
                if current != level {
                    self.set_transaction_isolation(level)?;
                    Some(current)
                } else {
                    None
                }
            }
            None => None,
        };

        let outcome = self.run_in_transaction(f);

        if let Some(previous) = restore {
            if let Err(err) = self.set_transaction_isolation(previous) {
                if outcome.is_ok() {
                    return Err(err.into());
                }
                warn!("unable to restore isolation level {}: {}", previous, err);
            }
        }
        outcome
    }

    fn run_in_transaction<R, E, F>(&self, f: F) -> std::result::Result<R, E>
    where
        E: From<DbiError>,
        F: FnOnce(&Handle) -> std::result::Result<R, E>,
    {
        self.begin()?;
        match f(self) {
            Ok(value) => {
                if self.is_in_transaction() {
                    if let Err(err) = self.commit() {
                        if let Err(rollback) = self.rollback() {
                            warn!("rollback after failed commit also failed: {}", rollback);
                        }
                        return Err(err.into());
                    }
                }
                Ok(value)
            }
            Err(err) => {
                if self.is_in_transaction() {
                    if let Err(rollback) = self.rollback() {
                        warn!("rollback after failed transaction body also failed: {}", rollback);
                    }
                }
                Err(err)
            }
        }
    }

    fn release_connection(&mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let mut outcome = Ok(());
        if self.settings.transactions.is_in_transaction(conn.as_ref()) {
            warn!("handle closed with an open transaction; rolling back");
            let rollback = self.settings.transactions.rollback(conn.as_ref());
            if rollback.is_ok() {
                self.sink().emit(SqlEvent::TransactionRolledBack);
            }
            outcome = Err(DbiError::transaction(
                "Improperly closed handle: the open transaction was rolled back",
                rollback.err(),
            ));
        }

        if let Err(err) = conn.close() {
            match outcome {
                Ok(()) => {
                    let mut errors = CleanupErrors::new();
                    errors.push(err);
                    outcome = Err(DbiError::ResourceCleanup {
                        errors,
                        context: Box::new(ContextSnapshot::default()),
                    });
                }
                Err(_) => warn!("unable to close connection: {}", err),
            }
        }

        debug!("handle closed");
        self.sink().emit(SqlEvent::HandleClosed);
        outcome
    }

    /// Closes the connection. An open transaction is rolled back and
    /// reported as an error.
    pub fn close(mut self) -> Result<()> {
        self.release_connection()
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Err(err) = self.release_connection() {
            warn!("{}", err);
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("closed", &self.is_closed())
            .field("registries", &self.registries)
            .finish()
    }
}
