//! Handler decorators and the order they wrap a method in.

use std::{fmt, sync::Arc, time::Instant};

use sqlbind_core::{IsolationLevel, MethodInfo, Result};
use tracing::{debug, warn};

use crate::{
    args::{Args, Outcome},
    handler::{Handler, Invocation},
};

/// Wraps a method handler with behavior around each call.
pub trait HandlerDecorator: Send + Sync + fmt::Debug {
    /// The name orderings refer to this decorator by.
    fn name(&self) -> &str;

    fn decorate(&self, inner: Arc<dyn Handler>, method: &MethodInfo) -> Arc<dyn Handler>;
}

/// Runs the call inside [`Handle::in_transaction_with`](sqlbind_core::Handle::in_transaction_with).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transactional {
    isolation: Option<IsolationLevel>,
}

impl Transactional {
    pub const NAME: &'static str = "transactional";

    pub fn new(isolation: Option<IsolationLevel>) -> Self {
        Self {
            isolation,
        }
    }
}

impl HandlerDecorator for Transactional {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn decorate(&self, inner: Arc<dyn Handler>, _method: &MethodInfo) -> Arc<dyn Handler> {
        let isolation = self.isolation;
        Arc::new(move |invocation: &Invocation<'_>, args: &Args| -> Result<Outcome> {
            invocation
                .handle()
                .in_transaction_with(isolation, |_| inner.invoke(invocation, args))
        })
    }
}

/// Logs entry, exit and elapsed time of each call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Logged;

impl Logged {
    pub const NAME: &'static str = "logged";
}

impl HandlerDecorator for Logged {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn decorate(&self, inner: Arc<dyn Handler>, method: &MethodInfo) -> Arc<dyn Handler> {
        let method = method.to_string();
        Arc::new(move |invocation: &Invocation<'_>, args: &Args| -> Result<Outcome> {
            debug!(method = %method, args = args.len(), "entering");
            let started = Instant::now();
            let outcome = inner.invoke(invocation, args);
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &outcome {
                Ok(_) => debug!(method = %method, elapsed_ms, "leaving"),
                Err(err) => warn!(method = %method, elapsed_ms, "failed: {}", err),
            }
            outcome
        })
    }
}

/// Sorts decorators by their position in `order`.
///
/// Unnamed decorators keep their relative order and go after the named
/// ones. The first decorator of the result is the outermost.
pub(crate) fn sort_decorators(
    mut decorators: Vec<Arc<dyn HandlerDecorator>>,
    order: &[String],
) -> Vec<Arc<dyn HandlerDecorator>> {
    decorators.sort_by_key(|d| {
        order
            .iter()
            .position(|name| name == d.name())
            .unwrap_or(order.len())
    });
    decorators
}

/// Wraps `base` so that `sorted[0]` runs first on entry and last on exit.
pub(crate) fn apply_decorators(
    base: Arc<dyn Handler>,
    sorted: &[Arc<dyn HandlerDecorator>],
    method: &MethodInfo,
) -> Arc<dyn Handler> {
    sorted
        .iter()
        .rev()
        .fold(base, |inner, decorator| decorator.decorate(inner, method))
}
