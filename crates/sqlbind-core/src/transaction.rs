//! Transaction demarcation on a connection.

use std::fmt;

use crate::driver::{Connection, DriverResult};

/// Begins, ends and checkpoints transactions for a handle.
pub trait TransactionHandler: Send + Sync + fmt::Debug {
    fn begin(&self, conn: &dyn Connection) -> DriverResult<()>;
    fn commit(&self, conn: &dyn Connection) -> DriverResult<()>;
    fn rollback(&self, conn: &dyn Connection) -> DriverResult<()>;

    fn is_in_transaction(&self, conn: &dyn Connection) -> bool;

    fn savepoint(&self, conn: &dyn Connection, name: &str) -> DriverResult<()>;
    fn release_savepoint(&self, conn: &dyn Connection, name: &str) -> DriverResult<()>;
    fn rollback_to_savepoint(&self, conn: &dyn Connection, name: &str) -> DriverResult<()>;
}

/// Uses the connection's own transaction support.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTransactionHandler;

impl TransactionHandler for LocalTransactionHandler {
    fn begin(&self, conn: &dyn Connection) -> DriverResult<()> {
        conn.begin()
    }

    fn commit(&self, conn: &dyn Connection) -> DriverResult<()> {
        conn.commit()
    }

    fn rollback(&self, conn: &dyn Connection) -> DriverResult<()> {
        conn.rollback()
    }

    fn is_in_transaction(&self, conn: &dyn Connection) -> bool {
        !conn.is_autocommit()
    }

    fn savepoint(&self, conn: &dyn Connection, name: &str) -> DriverResult<()> {
        conn.savepoint(name)
    }

    fn release_savepoint(&self, conn: &dyn Connection, name: &str) -> DriverResult<()> {
        conn.release_savepoint(name)
    }

    fn rollback_to_savepoint(&self, conn: &dyn Connection, name: &str) -> DriverResult<()> {
        conn.rollback_to_savepoint(name)
    }
}
