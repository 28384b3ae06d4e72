//! Hooks applied around statement execution.

use std::{fmt, time::Duration};

use crate::{
    context::StatementContext,
    driver::{DriverResult, FetchDirection as Direction, PreparedStatement},
};

/// Adjusts a prepared statement before it runs and inspects it after.
///
/// Customizers run in registration order. `after_execution` runs even when
/// result handling later fails.
pub trait StatementCustomizer: Send + Sync + fmt::Debug {
    fn before_execution(
        &self,
        stmt: &mut dyn PreparedStatement,
        ctx: &StatementContext,
    ) -> DriverResult<()> {
        let _ = (stmt, ctx);
        Ok(())
    }

    fn after_execution(
        &self,
        stmt: &mut dyn PreparedStatement,
        ctx: &StatementContext,
    ) -> DriverResult<()> {
        let _ = (stmt, ctx);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSize(pub u32);

impl StatementCustomizer for FetchSize {
    fn before_execution(
        &self,
        stmt: &mut dyn PreparedStatement,
        _ctx: &StatementContext,
    ) -> DriverResult<()> {
        stmt.set_fetch_size(self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxRows(pub u64);

impl StatementCustomizer for MaxRows {
    fn before_execution(
        &self,
        stmt: &mut dyn PreparedStatement,
        _ctx: &StatementContext,
    ) -> DriverResult<()> {
        stmt.set_max_rows(self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTimeout(pub Duration);

impl StatementCustomizer for QueryTimeout {
    fn before_execution(
        &self,
        stmt: &mut dyn PreparedStatement,
        _ctx: &StatementContext,
    ) -> DriverResult<()> {
        stmt.set_query_timeout(self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchDirection(pub Direction);

impl StatementCustomizer for FetchDirection {
    fn before_execution(
        &self,
        stmt: &mut dyn PreparedStatement,
        _ctx: &StatementContext,
    ) -> DriverResult<()> {
        stmt.set_fetch_direction(self.0)
    }
}
