mod event;
mod sink;

use std::sync::Arc;

pub use event::*;
pub use sink::*;

/// Shared handle to an event sink.
pub type EventSinkHandle = Arc<dyn EventSink>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sink() {
        let sink = NullSink;
        sink.emit(SqlEvent::HandleOpened);
    }

    #[test]
    fn test_channel_sink() {
        let (sink, rx) = ChannelSink::new();
        sink.emit(SqlEvent::StatementExecuted {
            kind: StatementKind::Query,
            sql: "select 1".to_string(),
            elapsed_ms: 3,
        });
        sink.emit(SqlEvent::BatchExecuted {
            sql: "insert into t values (?)".to_string(),
            parts: 10,
            elapsed_ms: 7,
        });
        sink.emit(SqlEvent::TransactionCommitted);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);

        assert!(matches!(
            &events[0],
            SqlEvent::StatementExecuted {
                kind: StatementKind::Query,
                elapsed_ms: 3,
                ..
            }
        ));
        assert!(matches!(
            &events[1],
            SqlEvent::BatchExecuted {
                parts: 10,
                ..
            }
        ));
        assert!(matches!(&events[2], SqlEvent::TransactionCommitted));
    }

    #[test]
    fn test_channel_sink_receiver_dropped() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(SqlEvent::HandleClosed);
    }

    #[test]
    fn test_collector_sink() {
        let sink = CollectorSink::default();
        assert!(sink.is_empty());

        sink.emit(SqlEvent::TransactionBegun);
        sink.emit(SqlEvent::StatementExecuted {
            kind: StatementKind::Update,
            sql: "update t set a = ?".to_string(),
            elapsed_ms: 1,
        });

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.statements(), vec!["update t set a = ?".to_string()]);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_event_accessors() {
        let event = SqlEvent::BatchExecuted {
            sql: "insert".into(),
            parts: 2,
            elapsed_ms: 9,
        };
        assert_eq!(event.elapsed_ms(), Some(9));
        assert_eq!(event.sql(), Some("insert"));

        let event = SqlEvent::CheckpointCreated {
            name: "a".into(),
        };
        assert_eq!(event.elapsed_ms(), None);
        assert_eq!(event.sql(), None);
    }

    #[test]
    fn test_event_sink_handle() {
        let collector = Arc::new(CollectorSink::default());
        let sink: EventSinkHandle = collector.clone();
        sink.emit(SqlEvent::HandleOpened);
        assert_eq!(collector.len(), 1);
    }

    #[test]
    fn test_event_sink_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NullSink>();
        assert_send_sync::<ChannelSink>();
        assert_send_sync::<CollectorSink>();
    }

    #[test]
    fn test_statement_kind_display() {
        assert_eq!(StatementKind::Query.to_string(), "query");
        assert_eq!(StatementKind::Script.to_string(), "script");
    }
}
