//! Resolved SQL object types and the objects that call them.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use sqlbind_core::{Dbi, DbiError, Handle, MethodInfo, Result, Value};
use tracing::{debug, trace};

use crate::{
    args::{Arg, Args, Outcome},
    decorator::{apply_decorators, sort_decorators},
    definition::{MethodDef, ParamSpec, SqlObjectDef, SqlOp},
    handler::{BatchHandler, CallHandler, Handler, Invocation, QueryHandler, UpdateHandler},
    on_demand::OnDemand,
};

/// Methods every object answers without a handle unless it declares them.
const OBJECT_METHODS: [&str; 3] = ["to_string", "hash_code", "equals"];

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// A checked SQL object declaration: one decorated handler per method.
pub struct SqlObjectType {
    name: String,
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl fmt::Debug for SqlObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&String> = self.handlers.keys().collect();
        methods.sort();
        f.debug_struct("SqlObjectType")
            .field("name", &self.name)
            .field("methods", &methods)
            .finish()
    }
}

impl SqlObjectType {
    /// Checks `def` and builds its dispatch table.
    ///
    /// Fails with a configuration error when a method declares more than
    /// one SQL operation, neither an operation nor a default
    /// implementation, or parameters its operation cannot use.
    pub fn resolve(def: SqlObjectDef) -> Result<Arc<Self>> {
        let SqlObjectDef {
            name,
            methods,
            decorators,
            decorator_order,
            chunk_size,
        } = def;

        if chunk_size == Some(0) {
            return Err(DbiError::configuration(format!(
                "{name}: batch chunk size must be greater than 0"
            )));
        }

        let mut handlers: HashMap<String, Arc<dyn Handler>> = HashMap::new();
        for method in methods {
            let info = MethodInfo::new(&name, &method.name);
            if handlers.contains_key(&method.name) {
                return Err(DbiError::configuration(format!("{info} is declared twice")));
            }
            let Some(base) = base_handler(&info, &method, chunk_size)? else {
                trace!("{} falls through to the default object behavior", info);
                continue;
            };

            let mut all = method.decorators.clone();
            all.extend(decorators.iter().cloned());
            let order = method
                .decorator_order
                .as_deref()
                .or(decorator_order.as_deref())
                .unwrap_or(&[]);
            let sorted = sort_decorators(all, order);
            debug!(
                "resolved {} with decorators [{}]",
                info,
                sorted
                    .iter()
                    .map(|d| d.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            handlers.insert(method.name.clone(), apply_decorators(base, &sorted, &info));
        }

        Ok(Arc::new(Self {
            name,
            handlers,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `method` has a handler, as opposed to falling through.
    pub fn has_handler(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    pub(crate) fn dispatch(&self, instance: u64, handle: &Handle, method: &str, args: &Args) -> Result<Outcome> {
        match self.handlers.get(method) {
            Some(handler) => {
                let invocation = Invocation::new(self, instance, handle, MethodInfo::new(&self.name, method));
                handler.invoke(&invocation, args)
            }
            None => self
                .fallback(instance, method, args)
                .unwrap_or_else(|| Err(self.unknown(method))),
        }
    }

    /// Identity behavior of the object methods nobody declared.
    fn fallback(&self, instance: u64, method: &str, args: &Args) -> Option<Result<Outcome>> {
        let value = match method {
            "to_string" => Value::Text(format!("{}@{}", self.name, instance)),
            "hash_code" => Value::Int(instance as i64),
            "equals" => {
                let same = matches!(args.get(0), Some(Arg::Value(Value::Int(other))) if *other == instance as i64);
                Value::Bool(same)
            }
            _ => return None,
        };
        Some(Ok(Outcome::Value(value)))
    }

    fn unknown(&self, method: &str) -> DbiError {
        DbiError::configuration(format!("{} has no method named '{}'", self.name, method))
    }
}

fn base_handler(info: &MethodInfo, method: &MethodDef, type_chunk_size: Option<usize>) -> Result<Option<Arc<dyn Handler>>> {
    let op = match (method.ops.as_slice(), &method.default) {
        ([], Some(default)) => return Ok(Some(default.clone())),
        ([], None) if OBJECT_METHODS.contains(&method.name.as_str()) => return Ok(None),
        ([], None) => {
            return Err(DbiError::configuration(format!(
                "{info} must be default or declare a SQL operation"
            )))
        }
        ([_], Some(_)) => {
            return Err(DbiError::configuration(format!(
                "{info} declares both a SQL operation and a default implementation"
            )))
        }
        ([op], None) => op,
        (ops, _) => {
            let kinds: Vec<&str> = ops.iter().map(SqlOp::kind).collect();
            return Err(DbiError::configuration(format!(
                "{info} declares more than one SQL operation: {}",
                kinds.join(", ")
            )));
        }
    };

    let params = method.params.clone();
    let is_batch = matches!(op, SqlOp::Batch(_));
    if !is_batch && params.contains(&ParamSpec::ChunkSize) {
        return Err(DbiError::configuration(format!(
            "{info}: a chunk size parameter is only allowed on batch methods"
        )));
    }
    if params.iter().filter(|p| **p == ParamSpec::ChunkSize).count() > 1 {
        return Err(DbiError::configuration(format!("{info} declares more than one chunk size parameter")));
    }

    let handler: Arc<dyn Handler> = match op {
        SqlOp::Query(spec) => Arc::new(QueryHandler {
            spec: spec.clone(),
            params,
        }),
        SqlOp::Update(spec) => Arc::new(UpdateHandler {
            spec: spec.clone(),
            params,
        }),
        SqlOp::Batch(spec) => {
            let chunk_size = spec.chunk_size.or(type_chunk_size);
            if chunk_size == Some(0) {
                return Err(DbiError::configuration(format!(
                    "{info}: batch chunk size must be greater than 0"
                )));
            }
            Arc::new(BatchHandler {
                spec: spec.clone(),
                params,
                chunk_size,
            })
        }
        SqlOp::Call(spec) => Arc::new(CallHandler {
            spec: spec.clone(),
            params,
        }),
    };
    Ok(Some(handler))
}

/// Provides the handle a top-level method call runs on.
pub trait HandleSupplier {
    fn with_handle<R>(&self, method: &str, f: impl FnOnce(&Handle) -> Result<R>) -> Result<R>;
}

/// Runs every call on a handle the caller owns.
#[derive(Debug, Clone, Copy)]
pub struct Attached<'h>(&'h Handle);

impl HandleSupplier for Attached<'_> {
    fn with_handle<R>(&self, _method: &str, f: impl FnOnce(&Handle) -> Result<R>) -> Result<R> {
        f(self.0)
    }
}

/// Runs every call on a handle the object opened and owns.
#[derive(Debug)]
pub struct Owned(Handle);

impl HandleSupplier for Owned {
    fn with_handle<R>(&self, _method: &str, f: impl FnOnce(&Handle) -> Result<R>) -> Result<R> {
        f(&self.0)
    }
}

/// An instance of a [`SqlObjectType`] bound to a source of handles.
pub struct SqlObject<S> {
    object_type: Arc<SqlObjectType>,
    instance: u64,
    supplier: S,
}

impl<S> SqlObject<S> {
    fn with_supplier(object_type: Arc<SqlObjectType>, supplier: S) -> Self {
        Self {
            object_type,
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            supplier,
        }
    }

    pub fn object_type(&self) -> &Arc<SqlObjectType> {
        &self.object_type
    }

    pub fn hash_code(&self) -> i64 {
        self.instance as i64
    }

    /// Identity comparison.
    pub fn equals<T>(&self, other: &SqlObject<T>) -> bool {
        self.instance == other.instance
    }
}

impl<S: HandleSupplier> SqlObject<S> {
    /// Calls `method` with `args`.
    ///
    /// Undeclared object methods answer without touching a handle.
    pub fn call(&self, method: &str, args: Args) -> Result<Outcome> {
        if !self.object_type.has_handler(method) {
            return self
                .object_type
                .fallback(self.instance, method, &args)
                .unwrap_or_else(|| Err(self.object_type.unknown(method)));
        }
        self.supplier.with_handle(method, |handle| {
            self.object_type
                .dispatch(self.instance, handle, method, &args)
        })
    }
}

impl<'h> SqlObject<Attached<'h>> {
    pub fn attach(object_type: Arc<SqlObjectType>, handle: &'h Handle) -> Self {
        Self::with_supplier(object_type, Attached(handle))
    }

    pub fn handle(&self) -> &'h Handle {
        self.supplier.0
    }
}

impl SqlObject<Owned> {
    /// Opens a handle from `dbi` that lives as long as the object.
    pub fn open(object_type: Arc<SqlObjectType>, dbi: &Dbi) -> Result<Self> {
        let handle = dbi.open()?;
        Ok(Self::with_supplier(object_type, Owned(handle)))
    }

    pub fn handle(&self) -> &Handle {
        &self.supplier.0
    }

    pub fn close(self) -> Result<()> {
        self.supplier.0.close()
    }
}

impl SqlObject<OnDemand> {
    /// Opens a handle for each top-level call and closes it afterwards,
    /// unless a [`HandleLease`](crate::HandleLease) keeps it open.
    pub fn on_demand(object_type: Arc<SqlObjectType>, dbi: Arc<Dbi>) -> Self {
        Self::with_supplier(object_type, OnDemand::new(dbi))
    }

    /// Takes a lease on the current on-demand handle, opening one if none is
    /// open. Calls made while any lease is held share its handle.
    pub fn lease<R: Into<String>>(&self, reason: R) -> Result<crate::HandleLease> {
        self.supplier.lease(reason.into())
    }

    /// Whether a handle is currently open for this object.
    pub fn is_open(&self) -> bool {
        self.supplier.is_open()
    }
}

impl<S> fmt::Display for SqlObject<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.object_type.name, self.instance)
    }
}

impl<S> fmt::Debug for SqlObject<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlObject")
            .field("type", &self.object_type.name)
            .field("instance", &self.instance)
            .finish()
    }
}
