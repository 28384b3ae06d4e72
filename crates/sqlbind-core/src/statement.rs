//! The statement execution pipeline shared by every result strategy.
//!
//! A statement moves through locate, rewrite, create, bind, prepare,
//! customize, execute and customize again. Each step maps its failure to
//! one error kind: anything before the driver statement exists is a
//! creation error, anything from binding through the after-execution hooks
//! is an execution error, and reading results is a result-set error. Once
//! the driver statement exists it is owned by an [`Executed`], which
//! releases result sets and the statement in reverse order on every exit
//! path.

use std::{any::Any, sync::Arc, time::Duration, time::Instant};

use serde::Serialize;
use sqlbind_events::{SqlEvent, StatementKind};
use tracing::{debug, warn};

use crate::{
    argument::{Argument, BeanArguments, MapArguments, NamedArgumentFinder, ValueArgument},
    binding::{BindFailure, Binding},
    builder::StatementBuilder,
    context::{MethodInfo, StatementContext},
    customizer::{FetchDirection, FetchSize, MaxRows, QueryTimeout, StatementCustomizer},
    driver::{self, DriverError, DriverResult, PreparedStatement, ResultSet},
    error::{Cause, CleanupErrors, ContextSnapshot, DbiError, Result},
    handle::Handle,
    mapper::{MappingError, Row, RowMapper},
    registry::Registries,
    rewriter::ParsedStatement,
    value::{SqlType, Value},
};

/// What the execute step runs, for timing and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Statement(StatementKind),
    Batch {
        parts: usize,
    },
}

/// Static inputs of one pipeline run.
pub(crate) struct Plan<'a> {
    pub step: Step,
    pub call: bool,
    pub arguments: Vec<String>,
    pub customizers: &'a [Arc<dyn StatementCustomizer>],
}

fn boxed(err: DriverError) -> Cause {
    Box::new(err)
}

/// A result set opened on an [`Executed`].
enum Results {
    /// Handed over by the driver.
    Detached(Box<dyn ResultSet>),
    /// Read in place through [`PreparedStatement::cursor`].
    Statement,
}

/// The newest open result set.
fn current<'a, 'h: 'a>(
    results: &'a mut [Results],
    stmt: Option<&'a mut (dyn PreparedStatement + 'h)>,
) -> Option<&'a mut dyn ResultSet> {
    match results.last_mut()? {
        Results::Detached(rs) => {
            let rs: &mut dyn ResultSet = rs.as_mut();
            Some(rs)
        }
        Results::Statement => stmt?.cursor(),
    }
}

/// A driver statement that has run, plus the result sets opened on it.
pub struct Executed<'h> {
    builder: Arc<dyn StatementBuilder>,
    ctx: StatementContext,
    arguments: Vec<String>,
    stmt: Option<Box<dyn PreparedStatement + 'h>>,
    results: Vec<Results>,
}

impl<'h> Executed<'h> {
    pub fn context(&self) -> &StatementContext {
        &self.ctx
    }

    pub(crate) fn snapshot(&self) -> ContextSnapshot {
        self.ctx.snapshot(self.arguments.clone())
    }

    pub(crate) fn result_error(&self, message: &str, cause: Option<Cause>) -> DbiError {
        DbiError::result_set(message, self.snapshot(), cause)
    }

    pub(crate) fn statement(&mut self) -> Result<&mut (dyn PreparedStatement + 'h)> {
        let Executed {
            stmt,
            ctx,
            arguments,
            ..
        } = self;
        match stmt.as_deref_mut() {
            Some(stmt) => Ok(stmt),
            None => {
                Err(DbiError::result_set(
                    "statement already closed",
                    ctx.snapshot(arguments.clone()),
                    None,
                ))
            }
        }
    }

    /// Opens the statement's result set, reading it in place when the
    /// driver offers a cursor. Returns `false` when it has none.
    pub(crate) fn open_results(&mut self) -> Result<bool> {
        let stmt = self.statement()?;
        if stmt.cursor().is_some() {
            self.results.push(Results::Statement);
            return Ok(true);
        }
        let taken = stmt.result_set();
        let rs = taken.map_err(|e| self.result_error("Unable to open result set", Some(boxed(e))))?;
        Ok(self.push_results(rs))
    }

    /// Takes the generated key result set. Returns `false` when it has none.
    pub(crate) fn open_generated_keys(&mut self) -> Result<bool> {
        let taken = self.statement()?.generated_keys();
        let rs =
            taken.map_err(|e| self.result_error("Unable to read generated keys", Some(boxed(e))))?;
        Ok(self.push_results(rs))
    }

    fn push_results(&mut self, rs: Option<Box<dyn ResultSet>>) -> bool {
        match rs {
            Some(rs) => {
                self.results.push(Results::Detached(rs));
                true
            }
            None => false,
        }
    }

    /// Moves the current result set to its next row.
    pub(crate) fn advance(&mut self) -> Result<bool> {
        let advanced = match current(&mut self.results, self.stmt.as_deref_mut()) {
            Some(rs) => rs.next(),
            None => return Ok(false),
        };
        advanced.map_err(|e| self.result_error("Unable to advance result set", Some(boxed(e))))
    }

    pub(crate) fn map_current<T>(&mut self, mapper: &dyn RowMapper<T>) -> Result<T> {
        let mapped = match current(&mut self.results, self.stmt.as_deref_mut()) {
            Some(rs) => mapper.map(&Row::new(rs), &self.ctx),
            None => return Err(self.result_error("no result set is open", None)),
        };
        mapped.map_err(|e| self.result_error("Unable to map row", Some(Box::new(e))))
    }

    /// Runs `step` once per row, checking the controller before each advance.
    pub(crate) fn fold<T, A, F>(&mut self, mapper: &dyn RowMapper<T>, init: A, mut step: F) -> Result<A>
    where
        F: FnMut(A, T, &mut FoldController) -> std::result::Result<A, MappingError>,
    {
        let mut acc = init;
        let mut control = FoldController::default();
        while !control.is_aborted() && self.advance()? {
            let item = self.map_current(mapper)?;
            acc = step(acc, item, &mut control)
                .map_err(|e| self.result_error("Unable to fold row", Some(Box::new(e))))?;
        }
        Ok(acc)
    }

    /// Releases result sets newest first, then the statement.
    pub(crate) fn close(&mut self) -> CleanupErrors {
        let mut errors = CleanupErrors::new();
        while let Some(results) = self.results.pop() {
            let closed = match results {
                Results::Detached(mut rs) => rs.close(),
                Results::Statement => {
                    match self.stmt.as_deref_mut().and_then(|stmt| stmt.cursor()) {
                        Some(rs) => rs.close(),
                        None => Ok(()),
                    }
                }
            };
            if let Err(err) = closed {
                errors.push(err);
            }
        }
        if let Some(mut stmt) = self.stmt.take() {
            if let Err(err) = self.builder.close(stmt.as_mut(), &self.ctx) {
                errors.push(err);
            }
        }
        errors
    }

    /// Closes everything and folds cleanup failures into `outcome`.
    ///
    /// A failed `outcome` keeps its error with the cleanup failures
    /// suppressed. A successful one turns into a resource cleanup error if
    /// anything failed to close.
    pub(crate) fn finish<T>(mut self, outcome: Result<T>) -> Result<T> {
        let errors = self.close();
        match outcome {
            Ok(value) if errors.is_empty() => Ok(value),
            Ok(_) => {
                Err(DbiError::ResourceCleanup {
                    errors,
                    context: Box::new(self.snapshot()),
                })
            }
            Err(err) => Err(err.with_suppressed(errors)),
        }
    }
}

impl Drop for Executed<'_> {
    fn drop(&mut self) {
        for err in self.close().iter() {
            warn!("failed to release statement resources: {}", err);
        }
    }
}

/// Lets a fold stop before the next row is read.
#[derive(Debug, Default, Clone, Copy)]
pub struct FoldController {
    aborted: bool,
}

impl FoldController {
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }
}

/// Resolves the statement text, recording it in `ctx`.
pub(crate) fn locate(handle: &Handle, ctx: &mut StatementContext, arguments: &[String]) -> Result<String> {
    let located = match handle.locator().locate(ctx.raw_sql(), ctx) {
        Ok(Some(sql)) => sql,
        Ok(None) => {
            let message = format!("No statement found for '{}'", ctx.raw_sql());
            return Err(DbiError::creation(message, ctx.snapshot(arguments.to_vec()), None));
        }
        Err(err) => {
            return Err(DbiError::creation(
                "Unable to locate statement",
                ctx.snapshot(arguments.to_vec()),
                Some(Box::new(err)),
            ))
        }
    };
    ctx.set_located_sql(located.clone());
    Ok(located)
}

/// Locates and rewrites the statement, recording both in `ctx`.
pub(crate) fn parse(
    handle: &Handle,
    ctx: &mut StatementContext,
    arguments: &[String],
) -> Result<Arc<ParsedStatement>> {
    let located = locate(handle, ctx, arguments)?;
    let parsed = handle.rewriter().rewrite(&located).map_err(|err| {
        DbiError::creation(
            "Unable to rewrite statement",
            ctx.snapshot(arguments.to_vec()),
            Some(Box::new(err)),
        )
    })?;
    ctx.set_parsed(parsed.clone());
    Ok(parsed)
}

/// Runs the pipeline up to and including the after-execution hooks.
///
/// `bind` writes arguments into the statement, `prep` adjusts it before
/// the customizers, and `exec` runs it. On failure everything acquired so
/// far is released and cleanup failures are attached to the error.
pub(crate) fn execute<'h, B, P, X, O>(
    handle: &'h Handle,
    mut ctx: StatementContext,
    plan: Plan<'_>,
    bind: B,
    prep: P,
    exec: X,
) -> Result<(Executed<'h>, O)>
where
    B: FnOnce(&mut dyn PreparedStatement, &ParsedStatement, &StatementContext) -> std::result::Result<(), BindFailure>,
    P: FnOnce(&mut dyn PreparedStatement, &StatementContext) -> DriverResult<()>,
    X: FnOnce(&mut dyn PreparedStatement) -> DriverResult<O>,
{
    let parsed = parse(handle, &mut ctx, &plan.arguments)?;
    let conn = handle.connection()?;

    let created = if plan.call {
        handle.builder().create_call(conn, &parsed, &ctx)
    } else {
        handle.builder().create(conn, &parsed, &ctx)
    };
    let stmt = created.map_err(|err| {
        DbiError::creation(
            "Unable to create statement",
            ctx.snapshot(plan.arguments.clone()),
            Some(boxed(err)),
        )
    })?;

    let mut executed = Executed {
        builder: handle.builder().clone(),
        ctx,
        arguments: plan.arguments,
        stmt: Some(stmt),
        results: Vec::new(),
    };

    let Executed {
        ref ctx,
        ref arguments,
        ref mut stmt,
        ..
    } = executed;
    let failed = |message: &str, cause: Option<DriverError>| {
        DbiError::execution(message, ctx.snapshot(arguments.clone()), cause.map(boxed))
    };

    let outcome = match stmt.as_mut() {
        Some(stmt) => {
            let stmt: &mut dyn PreparedStatement = stmt.as_mut();
            run_steps(stmt, &parsed, ctx, plan.customizers, bind, prep, exec, failed)
                .inspect(|(_, elapsed_ms)| report(handle, plan.step, parsed.sql(), *elapsed_ms))
        }
        None => Err(DbiError::Closed),
    };

    match outcome {
        Ok((output, _)) => Ok((executed, output)),
        Err(err) => {
            let errors = executed.close();
            Err(err.with_suppressed(errors))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_steps<B, P, X, O, E>(
    stmt: &mut dyn PreparedStatement,
    parsed: &ParsedStatement,
    ctx: &StatementContext,
    customizers: &[Arc<dyn StatementCustomizer>],
    bind: B,
    prep: P,
    exec: X,
    failed: E,
) -> Result<(O, u64)>
where
    B: FnOnce(&mut dyn PreparedStatement, &ParsedStatement, &StatementContext) -> std::result::Result<(), BindFailure>,
    P: FnOnce(&mut dyn PreparedStatement, &StatementContext) -> DriverResult<()>,
    X: FnOnce(&mut dyn PreparedStatement) -> DriverResult<O>,
    E: Fn(&str, Option<DriverError>) -> DbiError,
{
    if let Err(failure) = bind(stmt, parsed, ctx) {
        let message = failure.message();
        return Err(failed(&message, failure.into_source()));
    }

    prep(stmt, ctx).map_err(|e| failed("Unable to prepare statement", Some(e)))?;

    for customizer in customizers {
        customizer
            .before_execution(stmt, ctx)
            .map_err(|e| failed("Statement customizer failed before execution", Some(e)))?;
    }

    let started = Instant::now();
    let output = exec(stmt).map_err(|e| failed("Unable to execute statement", Some(e)))?;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    for customizer in customizers {
        customizer
            .after_execution(stmt, ctx)
            .map_err(|e| failed("Statement customizer failed after execution", Some(e)))?;
    }

    Ok((output, elapsed_ms))
}

pub(crate) fn report(handle: &Handle, step: Step, sql: &str, elapsed_ms: u64) {
    let event = match step {
        Step::Statement(kind) => {
            if handle.log_sql() {
                debug!(kind = %kind, elapsed_ms, "executed {}: {}", kind, sql);
            }
            SqlEvent::StatementExecuted {
                kind,
                sql: sql.to_string(),
                elapsed_ms,
            }
        }
        Step::Batch {
            parts,
        } => {
            if handle.log_sql() {
                debug!(parts, elapsed_ms, "executed batch of {}: {}", parts, sql);
            }
            SqlEvent::BatchExecuted {
                sql: sql.to_string(),
                parts,
                elapsed_ms,
            }
        }
    };
    handle.sink().emit(event);
}

/// Binding, attributes and customizers shared by every statement kind.
pub struct SqlStatement<'h> {
    handle: &'h Handle,
    ctx: StatementContext,
    binding: Binding,
    customizers: Vec<Arc<dyn StatementCustomizer>>,
    pending: Option<DbiError>,
}

impl<'h> SqlStatement<'h> {
    pub(crate) fn new(handle: &'h Handle, sql: &str) -> Self {
        Self {
            handle,
            ctx: handle.new_context(sql),
            binding: Binding::new(),
            customizers: Vec::new(),
            pending: None,
        }
    }

    pub fn handle(&self) -> &'h Handle {
        self.handle
    }

    pub fn context(&self) -> &StatementContext {
        &self.ctx
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub(crate) fn context_mut(&mut self) -> &mut StatementContext {
        &mut self.ctx
    }

    pub(crate) fn binding_mut(&mut self) -> &mut Binding {
        &mut self.binding
    }

    pub(crate) fn registries(&self) -> &Arc<Registries> {
        self.ctx.registries()
    }

    pub(crate) fn defer(&mut self, message: &str, cause: Cause) {
        if self.pending.is_none() {
            let snapshot = self.ctx.snapshot(self.binding.describe());
            self.pending = Some(DbiError::execution(message, snapshot, Some(cause)));
        }
    }

    /// Returns the first error recorded while the statement was configured.
    pub(crate) fn take_pending(&mut self) -> Result<()> {
        match self.pending.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// The handle's default customizers followed by this statement's own.
    pub(crate) fn all_customizers(&self) -> Vec<Arc<dyn StatementCustomizer>> {
        let mut all = self.handle.default_customizers().to_vec();
        all.extend(self.customizers.iter().cloned());
        all
    }

    pub(crate) fn add_customizer(&mut self, customizer: Arc<dyn StatementCustomizer>) {
        self.customizers.push(customizer);
    }

    /// Runs the pipeline binding this statement's arguments.
    pub(crate) fn run<P, X, O>(mut self, kind: StatementKind, prep: P, exec: X) -> Result<(Executed<'h>, O)>
    where
        P: FnOnce(&mut dyn PreparedStatement, &StatementContext) -> DriverResult<()>,
        X: FnOnce(&mut dyn PreparedStatement) -> DriverResult<O>,
    {
        self.take_pending()?;
        let customizers = self.all_customizers();
        let binding = self.binding;
        let plan = Plan {
            step: Step::Statement(kind),
            call: kind == StatementKind::Call,
            arguments: binding.describe(),
            customizers: &customizers,
        };
        execute(
            self.handle,
            self.ctx,
            plan,
            |stmt, parsed, ctx| crate::binding::bind_parsed(parsed, &binding, stmt, ctx),
            prep,
            exec,
        )
    }
}

/// Argument binding shared by statements and batch parts.
pub trait Bindable: Sized {
    #[doc(hidden)]
    fn binding_mut(&mut self) -> &mut Binding;

    #[doc(hidden)]
    fn registries(&self) -> &Arc<Registries>;

    #[doc(hidden)]
    fn defer(&mut self, message: &str, cause: Cause);

    /// Binds `value` to `:name`, converting it through the argument
    /// factories.
    fn bind<T: Any>(mut self, name: &str, value: T) -> Self {
        let argument = self.registries().arguments.build(&value);
        self.binding_mut().add_named(name, argument);
        self
    }

    /// Binds `value` to the 0-based parameter position.
    fn bind_pos<T: Any>(mut self, position: usize, value: T) -> Self {
        let argument = self.registries().arguments.build(&value);
        self.binding_mut().add_positional(position, argument);
        self
    }

    fn bind_value<V: Into<Value>>(self, name: &str, value: V) -> Self {
        self.bind_argument(name, Arc::new(ValueArgument(value.into())))
    }

    fn bind_null(self, name: &str, sql_type: SqlType) -> Self {
        self.bind_argument(name, Arc::new(ValueArgument(Value::Null(sql_type))))
    }

    fn bind_pos_null(self, position: usize, sql_type: SqlType) -> Self {
        self.bind_pos_argument(position, Arc::new(ValueArgument(Value::Null(sql_type))))
    }

    fn bind_argument(mut self, name: &str, argument: Arc<dyn Argument>) -> Self {
        self.binding_mut().add_named(name, argument);
        self
    }

    fn bind_pos_argument(mut self, position: usize, argument: Arc<dyn Argument>) -> Self {
        self.binding_mut().add_positional(position, argument);
        self
    }

    /// Binds each value to consecutive positions starting at 0.
    fn bind_values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        for (position, value) in values.into_iter().enumerate() {
            self.binding_mut()
                .add_positional(position, Arc::new(ValueArgument(value.into())));
        }
        self
    }

    /// Resolves named parameters from the serialized fields of `bean`.
    fn bind_bean<T: Serialize>(self, bean: &T) -> Self {
        match BeanArguments::new(bean) {
            Ok(finder) => self.bind_finder(Arc::new(finder)),
            Err(err) => {
                let mut this = self;
                this.defer("Unable to bind bean", Box::new(err));
                this
            }
        }
    }

    /// Like [`bind_bean`](Bindable::bind_bean), answering `:<prefix>.<field>`.
    fn bind_bean_prefixed<T: Serialize>(self, prefix: &str, bean: &T) -> Self {
        match BeanArguments::new(bean) {
            Ok(finder) => self.bind_finder(Arc::new(finder.with_prefix(prefix))),
            Err(err) => {
                let mut this = self;
                this.defer("Unable to bind bean", Box::new(err));
                this
            }
        }
    }

    fn bind_map(self, map: MapArguments) -> Self {
        self.bind_finder(Arc::new(map))
    }

    fn bind_finder(mut self, finder: Arc<dyn NamedArgumentFinder>) -> Self {
        self.binding_mut().add_finder(finder);
        self
    }
}

/// Statement-level settings shared by queries, updates, calls and batches.
pub trait Configurable<'h>: Sized {
    #[doc(hidden)]
    fn statement_mut(&mut self) -> &mut SqlStatement<'h>;

    /// Defines an attribute visible to locators, arguments and mappers.
    fn define<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.statement_mut().context_mut().define(key, value);
        self
    }

    /// Marks the statement as running on behalf of a SQL object method.
    fn on_behalf_of(mut self, method: MethodInfo) -> Self {
        self.statement_mut().context_mut().set_method(method);
        self
    }

    fn add_customizer<C: StatementCustomizer + 'static>(mut self, customizer: C) -> Self {
        self.statement_mut().add_customizer(Arc::new(customizer));
        self
    }

    fn fetch_size(self, rows: u32) -> Self {
        self.add_customizer(FetchSize(rows))
    }

    fn max_rows(self, rows: u64) -> Self {
        self.add_customizer(MaxRows(rows))
    }

    fn query_timeout(self, timeout: Duration) -> Self {
        self.add_customizer(QueryTimeout(timeout))
    }

    fn fetch_direction(self, direction: driver::FetchDirection) -> Self {
        self.add_customizer(FetchDirection(direction))
    }
}

impl Bindable for SqlStatement<'_> {
    fn binding_mut(&mut self) -> &mut Binding {
        &mut self.binding
    }

    fn registries(&self) -> &Arc<Registries> {
        self.ctx.registries()
    }

    fn defer(&mut self, message: &str, cause: Cause) {
        SqlStatement::defer(self, message, cause);
    }
}

impl<'h> Configurable<'h> for SqlStatement<'h> {
    fn statement_mut(&mut self) -> &mut SqlStatement<'h> {
        self
    }
}

/// Implements [`Bindable`] and [`Configurable`] for a type with a `base`
/// statement field.
macro_rules! delegate_statement {
    (impl<$h:lifetime $(, $t:ident)*> for $ty:ty) => {
        impl<$h $(, $t)*> $crate::statement::Bindable for $ty {
            fn binding_mut(&mut self) -> &mut $crate::binding::Binding {
                self.base.binding_mut()
            }

            fn registries(&self) -> &std::sync::Arc<$crate::registry::Registries> {
                self.base.registries()
            }

            fn defer(&mut self, message: &str, cause: $crate::error::Cause) {
                self.base.defer(message, cause);
            }
        }

        impl<$h $(, $t)*> $ty {
            /// The statement's context as configured so far.
            pub fn context(&self) -> &$crate::context::StatementContext {
                self.base.context()
            }
        }

        impl<$h $(, $t)*> $crate::statement::Configurable<$h> for $ty {
            fn statement_mut(&mut self) -> &mut $crate::statement::SqlStatement<$h> {
                &mut self.base
            }
        }
    };
}

pub(crate) use delegate_statement;
