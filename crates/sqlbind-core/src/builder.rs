//! Producing driver statements for parsed SQL.

use std::fmt;

use crate::{
    context::StatementContext,
    driver::{Connection, DriverResult, PrepareOptions, PreparedStatement},
    rewriter::ParsedStatement,
};

/// Creates and closes the driver statements used by the execution core.
///
/// Closing goes through the builder so that a caching builder can decide
/// what closing means for its statements.
pub trait StatementBuilder: Send + Sync + fmt::Debug {
    fn create<'c>(
        &self,
        conn: &'c dyn Connection,
        parsed: &ParsedStatement,
        ctx: &StatementContext,
    ) -> DriverResult<Box<dyn PreparedStatement + 'c>>;

    fn create_call<'c>(
        &self,
        conn: &'c dyn Connection,
        parsed: &ParsedStatement,
        ctx: &StatementContext,
    ) -> DriverResult<Box<dyn PreparedStatement + 'c>> {
        let _ = ctx;
        conn.prepare_call(parsed.sql())
    }

    fn close(&self, stmt: &mut dyn PreparedStatement, ctx: &StatementContext) -> DriverResult<()> {
        let _ = ctx;
        stmt.close()
    }
}

fn options(ctx: &StatementContext, cached: bool) -> PrepareOptions {
    PrepareOptions {
        keys: ctx.generated_keys().clone(),
        cached,
    }
}

/// Prepares a fresh statement for every execution.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStatementBuilder;

impl StatementBuilder for DefaultStatementBuilder {
    fn create<'c>(
        &self,
        conn: &'c dyn Connection,
        parsed: &ParsedStatement,
        ctx: &StatementContext,
    ) -> DriverResult<Box<dyn PreparedStatement + 'c>> {
        conn.prepare(parsed.sql(), &options(ctx, false))
    }
}

/// Reuses the driver's prepared statement cache.
///
/// Statements requesting generated keys are always prepared fresh, since
/// their SQL differs per request.
#[derive(Debug, Default, Clone, Copy)]
pub struct CachingStatementBuilder;

impl StatementBuilder for CachingStatementBuilder {
    fn create<'c>(
        &self,
        conn: &'c dyn Connection,
        parsed: &ParsedStatement,
        ctx: &StatementContext,
    ) -> DriverResult<Box<dyn PreparedStatement + 'c>> {
        let cached = !ctx.generated_keys().is_requested();
        conn.prepare(parsed.sql(), &options(ctx, cached))
    }
}
