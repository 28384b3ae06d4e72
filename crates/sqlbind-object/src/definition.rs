//! Declarations of SQL object types and their methods.
//!
//! A declaration is plain data. It is checked and turned into a dispatch
//! table once, by [`SqlObjectType::resolve`](crate::SqlObjectType::resolve).

use std::{fmt, sync::Arc};

use sqlbind_core::{IsolationLevel, SqlType};

use crate::{
    decorator::{HandlerDecorator, Logged, Transactional},
    handler::Handler,
};

/// How a query method returns its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Returns {
    #[default]
    List,
    First,
}

#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub sql: String,
    pub returns: Returns,
    pub max_rows: Option<u64>,
    pub fetch_size: Option<u32>,
}

impl QuerySpec {
    pub fn new<S: Into<String>>(sql: S) -> Self {
        Self {
            sql: sql.into(),
            returns: Returns::List,
            max_rows: None,
            fetch_size: None,
        }
    }

    pub fn first(mut self) -> Self {
        self.returns = Returns::First;
        self
    }

    pub fn max_rows(mut self, rows: u64) -> Self {
        self.max_rows = Some(rows);
        self
    }

    pub fn fetch_size(mut self, rows: u32) -> Self {
        self.fetch_size = Some(rows);
        self
    }
}

#[derive(Debug, Clone)]
pub struct UpdateSpec {
    pub sql: String,
    /// Columns to return as generated keys. An empty list asks for the
    /// driver's default keys.
    pub generated_keys: Option<Vec<String>>,
}

impl UpdateSpec {
    pub fn new<S: Into<String>>(sql: S) -> Self {
        Self {
            sql: sql.into(),
            generated_keys: None,
        }
    }

    pub fn returning_keys<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.generated_keys = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Debug, Clone)]
pub struct BatchSpec {
    pub sql: String,
    pub chunk_size: Option<usize>,
    /// Runs each chunk in its own transaction unless one is already open.
    pub transactional: bool,
}

impl BatchSpec {
    pub fn new<S: Into<String>>(sql: S) -> Self {
        Self {
            sql: sql.into(),
            chunk_size: None,
            transactional: true,
        }
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    pub fn transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CallSpec {
    pub sql: String,
    pub outs: Vec<(String, SqlType)>,
}

impl CallSpec {
    pub fn new<S: Into<String>>(sql: S) -> Self {
        Self {
            sql: sql.into(),
            outs: Vec::new(),
        }
    }

    /// Registers the named output parameter `:name`.
    pub fn out<S: Into<String>>(mut self, name: S, sql_type: SqlType) -> Self {
        self.outs.push((name.into(), sql_type));
        self
    }
}

/// The SQL operation a method performs.
#[derive(Debug, Clone)]
pub enum SqlOp {
    Query(QuerySpec),
    Update(UpdateSpec),
    Batch(BatchSpec),
    Call(CallSpec),
}

impl SqlOp {
    pub fn kind(&self) -> &'static str {
        match self {
            SqlOp::Query(_) => "query",
            SqlOp::Update(_) => "update",
            SqlOp::Batch(_) => "batch",
            SqlOp::Call(_) => "call",
        }
    }
}

/// How one method argument reaches the statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamSpec {
    /// Binds the value to `:name`.
    Bind(String),
    /// Binds the value to the parameter position of the argument.
    Positional,
    /// Binds the fields of a bean, optionally as `:<prefix>.<field>`.
    BindBean(Option<String>),
    /// Binds entries of a map. With a non-empty key list every listed key
    /// is bound, as NULL when the map lacks it, and other entries are
    /// ignored.
    BindMap {
        keys: Vec<String>,
        prefix: Option<String>,
    },
    /// Defines a statement attribute.
    Define(String),
    /// Sets the chunk size of a batch method.
    ChunkSize,
}

/// A method implemented in code instead of SQL.
pub type DefaultMethod = Arc<dyn Handler>;

#[derive(Clone)]
pub struct MethodDef {
    pub name: String,
    pub ops: Vec<SqlOp>,
    pub params: Vec<ParamSpec>,
    pub decorators: Vec<Arc<dyn HandlerDecorator>>,
    pub decorator_order: Option<Vec<String>>,
    pub default: Option<DefaultMethod>,
}

impl fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDef")
            .field("name", &self.name)
            .field("ops", &self.ops)
            .field("params", &self.params)
            .field("decorators", &self.decorators)
            .field("decorator_order", &self.decorator_order)
            .field("default", &self.default.is_some())
            .finish()
    }
}

impl MethodDef {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ops: Vec::new(),
            params: Vec::new(),
            decorators: Vec::new(),
            decorator_order: None,
            default: None,
        }
    }

    pub fn query(mut self, spec: QuerySpec) -> Self {
        self.ops.push(SqlOp::Query(spec));
        self
    }

    pub fn update(mut self, spec: UpdateSpec) -> Self {
        self.ops.push(SqlOp::Update(spec));
        self
    }

    pub fn batch(mut self, spec: BatchSpec) -> Self {
        self.ops.push(SqlOp::Batch(spec));
        self
    }

    pub fn call(mut self, spec: CallSpec) -> Self {
        self.ops.push(SqlOp::Call(spec));
        self
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn bind<S: Into<String>>(self, name: S) -> Self {
        self.param(ParamSpec::Bind(name.into()))
    }

    pub fn positional(self) -> Self {
        self.param(ParamSpec::Positional)
    }

    pub fn bind_bean(self) -> Self {
        self.param(ParamSpec::BindBean(None))
    }

    pub fn bind_bean_prefixed<S: Into<String>>(self, prefix: S) -> Self {
        self.param(ParamSpec::BindBean(Some(prefix.into())))
    }

    pub fn bind_map<I, S>(self, keys: I, prefix: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.param(ParamSpec::BindMap {
            keys: keys.into_iter().map(Into::into).collect(),
            prefix: prefix.map(str::to_string),
        })
    }

    pub fn define<S: Into<String>>(self, name: S) -> Self {
        self.param(ParamSpec::Define(name.into()))
    }

    pub fn chunk_size_param(self) -> Self {
        self.param(ParamSpec::ChunkSize)
    }

    pub fn decorate<D: HandlerDecorator + 'static>(mut self, decorator: D) -> Self {
        self.decorators.push(Arc::new(decorator));
        self
    }

    /// Runs the method in a transaction, joining one that is already open.
    pub fn transactional(self, isolation: Option<IsolationLevel>) -> Self {
        self.decorate(Transactional::new(isolation))
    }

    pub fn logged(self) -> Self {
        self.decorate(Logged)
    }

    /// Names decorators in the order they wrap the method, outermost first.
    pub fn decorator_order<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.decorator_order = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn default_impl<H: Handler + 'static>(mut self, handler: H) -> Self {
        self.default = Some(Arc::new(handler));
        self
    }
}

/// A SQL object type: its methods plus type-level settings every method
/// inherits.
#[derive(Debug, Clone)]
pub struct SqlObjectDef {
    pub name: String,
    pub methods: Vec<MethodDef>,
    pub decorators: Vec<Arc<dyn HandlerDecorator>>,
    pub decorator_order: Option<Vec<String>>,
    pub chunk_size: Option<usize>,
}

impl SqlObjectDef {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
            decorators: Vec::new(),
            decorator_order: None,
            chunk_size: None,
        }
    }

    pub fn method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    /// Decorates every method of the type.
    pub fn decorate<D: HandlerDecorator + 'static>(mut self, decorator: D) -> Self {
        self.decorators.push(Arc::new(decorator));
        self
    }

    pub fn transactional(self, isolation: Option<IsolationLevel>) -> Self {
        self.decorate(Transactional::new(isolation))
    }

    /// Decorator order for methods that declare none of their own.
    pub fn decorator_order<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.decorator_order = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Chunk size of batch methods that set none of their own.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }
}
