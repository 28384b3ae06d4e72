use std::sync::mpsc::{self, Receiver, Sender};

use crate::SqlEvent;

/// Trait for consuming statement timings and lifecycle events.
///
/// Every statement and batch execution reports its elapsed time and final
/// SQL through this trait.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SqlEvent);
}

/// Channel-based event sink.
///
/// Sends events through a standard mpsc channel so another thread can
/// aggregate timings.
pub struct ChannelSink {
    sender: Sender<SqlEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<SqlEvent>) {
        let (sender, receiver) = mpsc::channel();
        (
            Self {
                sender,
            },
            receiver,
        )
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: SqlEvent) {
        let _ = self.sender.send(event);
    }
}

/// No-op event sink, the default for every `Dbi`.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: SqlEvent) {}
}

/// Collector sink that stores all events for inspection.
///
/// Useful in tests to verify that expected events were emitted.
#[derive(Default)]
pub struct CollectorSink {
    events: std::sync::Mutex<Vec<SqlEvent>>,
}

impl CollectorSink {
    pub fn events(&self) -> Vec<SqlEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// SQL text of every execution event, in emission order.
    pub fn statements(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|event| event.sql().map(String::from))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventSink for CollectorSink {
    fn emit(&self, event: SqlEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
