//! SQL objects: named methods backed by SQL, dispatched through decorators.
//!
//! A [`SqlObjectDef`] declares methods and how their arguments bind. It is
//! resolved once into a [`SqlObjectType`], whose instances run each call on
//! a handle that is attached, owned, or opened on demand.

pub mod args;
pub mod decorator;
pub mod definition;
pub mod handler;
pub mod object;
pub mod on_demand;

pub use args::{Arg, Args, Outcome};
pub use decorator::{HandlerDecorator, Logged, Transactional};
pub use definition::{
    BatchSpec, CallSpec, MethodDef, ParamSpec, QuerySpec, Returns, SqlObjectDef, SqlOp, UpdateSpec,
};
pub use handler::{Handler, Invocation};
pub use object::{Attached, HandleSupplier, Owned, SqlObject, SqlObjectType};
pub use on_demand::{HandleLease, OnDemand};
