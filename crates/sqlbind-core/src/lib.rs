//! Named-parameter SQL execution over a pluggable driver.
//!
//! A [`Dbi`] opens [`Handle`]s. A handle creates queries, updates, calls,
//! batches and scripts, and controls transactions on its connection.
//! Arguments and result mapping are resolved through per-handle
//! [`Registries`].

pub mod argument;
pub mod batch;
pub mod binding;
pub mod builder;
pub mod call;
pub mod context;
pub mod customizer;
pub mod dbi;
pub mod driver;
pub mod error;
pub mod handle;
pub mod locator;
pub mod mapper;
pub mod query;
pub mod registry;
pub mod rewriter;
pub mod script;
pub mod statement;
pub mod transaction;
pub mod update;
pub mod value;

pub use argument::{Argument, ArgumentFactory, BeanArguments, MapArguments, NamedArgumentFinder};
pub use batch::{PreparedBatch, PreparedBatchPart};
pub use binding::Binding;
pub use call::{Call, OutParameters};
pub use context::{MethodInfo, StatementContext};
pub use dbi::{ConnectionFactory, Dbi};
pub use driver::{DriverError, GeneratedKeys, IsolationLevel};
pub use error::{DbiError, Result};
pub use handle::Handle;
pub use mapper::{ColumnMapper, FromRow, FromValue, MappingError, Row, RowMap, RowMapper};
pub use query::{Query, ResultIter};
pub use registry::Registries;
pub use script::Script;
pub use statement::{Bindable, Configurable, FoldController};
pub use update::{GeneratedKeyRows, Update};
pub use value::{SqlType, Value};

pub use sqlbind_events as events;
