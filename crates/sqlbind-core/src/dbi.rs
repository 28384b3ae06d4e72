//! Connection source and shared configuration for handles.

use std::{collections::HashMap, fmt, sync::Arc, sync::RwLock};

use sqlbind_config::Config;
use sqlbind_events::{EventSink, EventSinkHandle};
use tracing::debug;

use crate::{
    argument::ArgumentFactory,
    builder::{CachingStatementBuilder, DefaultStatementBuilder, StatementBuilder},
    customizer::{FetchSize, MaxRows, QueryTimeout, StatementCustomizer},
    driver::{sqlite::SqliteConnectionFactory, Connection, DriverResult, IsolationLevel},
    error::{DbiError, Result},
    handle::{Handle, HandleSettings},
    locator::{ChainLocator, FileLocator, MapLocator, StatementLocator},
    mapper::{ColumnMapper, FromRow, MapperFactory, RowMapper},
    registry::{self, Registries},
    rewriter::{ColonPrefixRewriter, StatementRewriter},
    transaction::TransactionHandler,
    value::Value,
};

/// Opens driver connections.
pub trait ConnectionFactory: Send + Sync {
    fn open(&self) -> DriverResult<Box<dyn Connection>>;
}

impl<F> ConnectionFactory for F
where
    F: Fn() -> DriverResult<Box<dyn Connection>> + Send + Sync,
{
    fn open(&self) -> DriverResult<Box<dyn Connection>> {
        self()
    }
}

/// Entry point: opens [`Handle`]s and holds the configuration they inherit.
///
/// Registries and attributes set here are copied into each handle when it
/// opens. Changes made through a handle stay local to it.
pub struct Dbi {
    factory: Arc<dyn ConnectionFactory>,
    settings: HandleSettings,
    registries: Arc<Registries>,
    attributes: RwLock<HashMap<String, Value>>,
}

impl Dbi {
    pub fn new<F: ConnectionFactory + 'static>(factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
            settings: HandleSettings::default(),
            registries: Arc::new(Registries::new()),
            attributes: RwLock::new(HashMap::new()),
        }
    }

    /// Builds a SQLite-backed `Dbi` from a resolved configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let factory = SqliteConnectionFactory::from_location(config.database())
            .with_cache_capacity(config.statement_cache_capacity());
        let mut dbi = Dbi::new(factory);

        dbi.set_rewriter(ColonPrefixRewriter::with_prefix(config.placeholder_prefix()));
        if config.statement_cache() {
            dbi.set_builder(CachingStatementBuilder);
        } else {
            dbi.set_builder(DefaultStatementBuilder);
        }

        if let Some(rows) = config.fetch_size {
            dbi.add_customizer(FetchSize(rows));
        }
        if let Some(rows) = config.max_rows {
            dbi.add_customizer(MaxRows(rows));
        }
        let timeout = config
            .query_timeout()
            .map_err(|err| DbiError::configuration(err.to_string()))?;
        if let Some(timeout) = timeout {
            dbi.add_customizer(QueryTimeout(timeout));
        }

        let mut locator = ChainLocator::default();
        locator.push(Arc::new(MapLocator::new(config.statements())));
        let sql_paths = config.sql_paths();
        if !sql_paths.is_empty() {
            locator.push(Arc::new(FileLocator::new(sql_paths)));
        }
        dbi.set_locator(locator);

        if let Some(size) = config.batch_chunk_size {
            dbi.set_batch_chunk_size(size)?;
        }
        dbi.set_log_sql(config.log_sql());

        debug!("configured dbi for database {}", config.database());
        Ok(dbi)
    }

    pub fn set_rewriter<R: StatementRewriter + 'static>(&mut self, rewriter: R) -> &mut Self {
        self.settings.rewriter = Arc::new(rewriter);
        self
    }

    pub fn set_locator<L: StatementLocator + 'static>(&mut self, locator: L) -> &mut Self {
        self.settings.locator = Arc::new(locator);
        self
    }

    pub fn set_builder<B: StatementBuilder + 'static>(&mut self, builder: B) -> &mut Self {
        self.settings.builder = Arc::new(builder);
        self
    }

    pub fn set_transaction_handler<T: TransactionHandler + 'static>(&mut self, handler: T) -> &mut Self {
        self.settings.transactions = Arc::new(handler);
        self
    }

    pub fn set_event_sink<S: EventSink + 'static>(&mut self, sink: S) -> &mut Self {
        self.settings.sink = Arc::new(sink);
        self
    }

    pub fn set_event_sink_handle(&mut self, sink: EventSinkHandle) -> &mut Self {
        self.settings.sink = sink;
        self
    }

    /// Adds a customizer applied to every statement, before the statement's
    /// own customizers.
    pub fn add_customizer<C: StatementCustomizer + 'static>(&mut self, customizer: C) -> &mut Self {
        self.settings.customizers.push(Arc::new(customizer));
        self
    }

    /// Default upper bound on parts per driver batch.
    pub fn set_batch_chunk_size(&mut self, size: usize) -> Result<&mut Self> {
        if size == 0 {
            return Err(DbiError::configuration("batch chunk size must be greater than 0"));
        }
        self.settings.batch_chunk_size = Some(size);
        Ok(self)
    }

    pub fn batch_chunk_size(&self) -> Option<usize> {
        self.settings.batch_chunk_size
    }

    pub fn set_log_sql(&mut self, enabled: bool) -> &mut Self {
        self.settings.log_sql = enabled;
        self
    }

    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    pub fn register_argument<F: ArgumentFactory + 'static>(&self, factory: F) -> &Self {
        self.registries.arguments.register(factory);
        self
    }

    /// Registers a conversion from `T` to a bindable value.
    pub fn register_argument_for<T, F>(&self, convert: F) -> &Self
    where
        T: 'static,
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        self.registries.arguments.register_for::<T, F>(convert);
        self
    }

    pub fn register_row_mapper<T: 'static, M: RowMapper<T> + 'static>(&self, mapper: M) -> &Self {
        self.registries.row_mappers.register(mapper);
        self
    }

    pub fn register_from_row<T: FromRow + 'static>(&self) -> &Self {
        self.registries.row_mappers.register_from_row::<T>();
        self
    }

    pub fn register_row_mapper_factory<F: MapperFactory + 'static>(&self, factory: F) -> &Self {
        self.registries.row_mappers.register_factory(factory);
        self
    }

    pub fn register_column_mapper<T: 'static, M: ColumnMapper<T> + 'static>(&self, mapper: M) -> &Self {
        self.registries.column_mappers.register(mapper);
        self
    }

    pub fn register_column_mapper_factory<F: MapperFactory + 'static>(&self, factory: F) -> &Self {
        self.registries.column_mappers.register_factory(factory);
        self
    }

    /// Defines an attribute inherited by handles opened afterwards.
    pub fn define<K: Into<String>, V: Into<Value>>(&self, key: K, value: V) -> &Self {
        registry::write(&self.attributes).insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        registry::read(&self.attributes).get(key).cloned()
    }

    /// Opens a new handle.
    pub fn open(&self) -> Result<Handle> {
        let conn = self.factory.open().map_err(DbiError::Connection)?;
        let attributes = registry::read(&self.attributes).clone();
        debug!("opened handle");
        Ok(Handle::new(
            conn,
            self.settings.clone(),
            Arc::new(self.registries.fork()),
            attributes,
        ))
    }

    /// Opens a handle, runs `f` with it and closes it.
    pub fn with_handle<R, E, F>(&self, f: F) -> std::result::Result<R, E>
    where
        E: From<DbiError>,
        F: FnOnce(&Handle) -> std::result::Result<R, E>,
    {
        let handle = self.open()?;
        let outcome = f(&handle);
        let closed = handle.close();
        match outcome {
            Ok(value) => {
                closed?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }

    /// Opens a handle and runs `f` in a transaction on it.
    pub fn in_transaction<R, E, F>(&self, f: F) -> std::result::Result<R, E>
    where
        E: From<DbiError>,
        F: FnOnce(&Handle) -> std::result::Result<R, E>,
    {
        self.in_transaction_with(None, f)
    }

    pub fn in_transaction_with<R, E, F>(
        &self,
        isolation: Option<IsolationLevel>,
        f: F,
    ) -> std::result::Result<R, E>
    where
        E: From<DbiError>,
        F: FnOnce(&Handle) -> std::result::Result<R, E>,
    {
        self.with_handle(|handle| handle.in_transaction_with(isolation, f))
    }
}

impl fmt::Debug for Dbi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dbi")
            .field("registries", &self.registries)
            .field("batch_chunk_size", &self.settings.batch_chunk_size)
            .field("log_sql", &self.settings.log_sql)
            .finish()
    }
}
