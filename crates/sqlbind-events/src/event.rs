use std::fmt;

/// Which result strategy ran a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Query,
    Update,
    Call,
    Script,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatementKind::Query => "query",
            StatementKind::Update => "update",
            StatementKind::Call => "call",
            StatementKind::Script => "script",
        };
        write!(f, "{name}")
    }
}

/// All event types emitted by sqlbind handles and statements.
#[derive(Debug, Clone)]
pub enum SqlEvent {
    /// A single statement ran against the driver.
    StatementExecuted {
        kind: StatementKind,
        sql: String,
        elapsed_ms: u64,
    },
    /// A prepared batch ran against the driver.
    BatchExecuted {
        sql: String,
        parts: usize,
        elapsed_ms: u64,
    },
    /// A handle opened its connection.
    HandleOpened,
    /// A handle released its connection.
    HandleClosed,
    TransactionBegun,
    TransactionCommitted,
    TransactionRolledBack,
    /// A named savepoint was created inside the open transaction.
    CheckpointCreated {
        name: String,
    },
    /// A named savepoint was released.
    CheckpointReleased {
        name: String,
    },
    /// The transaction was rolled back to a named savepoint.
    RolledBackToCheckpoint {
        name: String,
    },
}

impl SqlEvent {
    /// Elapsed time for execution events, `None` for lifecycle events.
    pub fn elapsed_ms(&self) -> Option<u64> {
        match self {
            SqlEvent::StatementExecuted {
                elapsed_ms, ..
            }
            | SqlEvent::BatchExecuted {
                elapsed_ms, ..
            } => Some(*elapsed_ms),
            _ => None,
        }
    }

    /// Final SQL text for execution events.
    pub fn sql(&self) -> Option<&str> {
        match self {
            SqlEvent::StatementExecuted {
                sql, ..
            }
            | SqlEvent::BatchExecuted {
                sql, ..
            } => Some(sql),
            _ => None,
        }
    }
}
