// Diagnostic events emitted by the evaluator and mutation orchestrator.
// The evaluator never logs directly on these paths; it hands events to an
// injected sink so tests can assert on them.

use std::sync::Mutex;
use std::time::Duration;

use graphrelay_common::EdgeKey;

#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    /// An edge references a node id that no longer resolves.
    DanglingEdge {
        query_key: String,
        edge: EdgeKey,
        node_id: String,
    },
    /// A range query returned an edge key whose edge item is gone.
    DanglingEdgeKey { query_key: String, edge: EdgeKey },
    /// A transient mutation failure is about to be retried.
    MutationRetry {
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// The driver stopped before the root stopped asking for more data.
    RoundLimitReached { root_key: String, rounds: u32 },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: DiagnosticEvent);
}

/// Default sink: forwards every event to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: DiagnosticEvent) {
        match event {
            DiagnosticEvent::DanglingEdge { query_key, edge, node_id } => {
                tracing::warn!(
                    "Dangling edge {}-[{}]->{} in query '{}': node {} does not resolve",
                    edge.in_id, edge.type_name, edge.out_id, query_key, node_id
                );
            }
            DiagnosticEvent::DanglingEdgeKey { query_key, edge } => {
                tracing::warn!(
                    "Dangling edge key {}-[{}]->{} in query '{}': edge item is missing",
                    edge.in_id, edge.type_name, edge.out_id, query_key
                );
            }
            DiagnosticEvent::MutationRetry { attempt, delay, error } => {
                tracing::warn!(
                    "Mutation attempt {} failed with transient error, retrying in {:?}: {}",
                    attempt, delay, error
                );
            }
            DiagnosticEvent::RoundLimitReached { root_key, rounds } => {
                tracing::warn!(
                    "Query '{}' still needs data after {} rounds, returning partial page",
                    root_key, rounds
                );
            }
        }
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn dangling_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    DiagnosticEvent::DanglingEdge { .. } | DiagnosticEvent::DanglingEdgeKey { .. }
                )
            })
            .count()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: DiagnosticEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_collects_in_order() {
        let sink = RecordingEventSink::new();
        sink.emit(DiagnosticEvent::DanglingEdge {
            query_key: "q".into(),
            edge: EdgeKey::new("a", "Knows", "b"),
            node_id: "a".into(),
        });
        sink.emit(DiagnosticEvent::MutationRetry {
            attempt: 1,
            delay: Duration::from_millis(5),
            error: "throttled".into(),
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(sink.dangling_count(), 1);
        assert!(matches!(events[1], DiagnosticEvent::MutationRetry { attempt: 1, .. }));
    }

    #[test]
    fn test_tracing_sink_accepts_every_event() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let sink = TracingEventSink;
        sink.emit(DiagnosticEvent::DanglingEdgeKey {
            query_key: "q".into(),
            edge: EdgeKey::new("a", "Knows", "b"),
        });
        sink.emit(DiagnosticEvent::RoundLimitReached {
            root_key: "root".into(),
            rounds: 3,
        });
    }
}
