//! Multi-statement scripts.

use std::time::Instant;

use sqlbind_events::StatementKind;

use crate::{
    context::StatementContext,
    error::{DbiError, Result},
    handle::Handle,
    rewriter::split_statements,
    statement::{locate, report, Step},
    value::Value,
};

/// A located script split on `;` and run as one driver batch.
///
/// Parameters are not rewritten; each statement reaches the driver as
/// written.
pub struct Script<'h> {
    handle: &'h Handle,
    ctx: StatementContext,
}

impl<'h> Script<'h> {
    pub(crate) fn new(handle: &'h Handle, sql: &str) -> Self {
        Self {
            handle,
            ctx: handle.new_context(sql),
        }
    }

    pub fn define<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.ctx.define(key, value);
        self
    }

    /// The individual statements, after locating the script.
    pub fn statements(mut self) -> Result<Vec<String>> {
        let located = locate(self.handle, &mut self.ctx, &[])?;
        split_statements(&located).map_err(|err| {
            DbiError::creation("Unable to split script", self.ctx.snapshot(Vec::new()), Some(Box::new(err)))
        })
    }

    /// Runs every statement in order and returns their update counts.
    pub fn execute(mut self) -> Result<Vec<i64>> {
        let located = locate(self.handle, &mut self.ctx, &[])?;
        let statements = split_statements(&located).map_err(|err| {
            DbiError::creation("Unable to split script", self.ctx.snapshot(Vec::new()), Some(Box::new(err)))
        })?;
        if statements.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.handle.connection()?;
        let started = Instant::now();
        let counts = conn.execute_script(&statements).map_err(|err| {
            DbiError::execution(
                "Unable to execute script",
                self.ctx.snapshot(statements.clone()),
                Some(Box::new(err)),
            )
        })?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        report(
            self.handle,
            Step::Statement(StatementKind::Script),
            self.ctx.located_sql().unwrap_or_default(),
            elapsed_ms,
        );
        Ok(counts)
    }
}
