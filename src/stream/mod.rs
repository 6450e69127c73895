//! Per-run log stream fan-out
//!
//! The [`LogStreamHub`] delivers log and status events for a run to any
//! number of subscribers. Publishing is non-blocking and safe from any
//! thread or task; each subscriber owns an unbounded FIFO queue and observes
//! events in publication order. The hub holds no replay buffer; transport
//! adapters replay the record's accumulated logs themselves before draining
//! the queue.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::engine::ExecutionLog;
use crate::state::ExecutionStatus;

/// Event published to run subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// A log entry was emitted
    Log {
        /// The emitted entry
        log: ExecutionLog,
    },
    /// The run changed lifecycle status
    Status {
        /// New status
        status: ExecutionStatus,
        /// Error description for failed runs
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl StreamEvent {
    /// A log event
    pub fn log(log: ExecutionLog) -> Self {
        Self::Log { log }
    }

    /// A status event without error detail
    pub fn status(status: ExecutionStatus) -> Self {
        Self::Status {
            status,
            error: None,
        }
    }

    /// Whether this is a status event carrying a terminal status
    pub fn is_terminal_status(&self) -> bool {
        matches!(self, Self::Status { status, .. } if status.is_terminal())
    }
}

struct SubscriberSlot {
    id: u64,
    tx: mpsc::UnboundedSender<StreamEvent>,
}

/// A registered subscription to one run's event stream
pub struct Subscription {
    id: u64,
    run_id: String,
    rx: mpsc::UnboundedReceiver<StreamEvent>,
}

impl Subscription {
    /// Subscription identifier, used to unregister
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Run this subscription listens to
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Receive the next event; `None` once the hub entry is gone and the
    /// queue is drained
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }
}

/// Per-run pub/sub fan-out of log and status events
pub struct LogStreamHub {
    subscribers: DashMap<String, Vec<SubscriberSlot>>,
    next_id: AtomicU64,
}

impl LogStreamHub {
    /// An empty hub
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber queue for a run
    pub fn register(&self, run_id: impl Into<String>) -> Subscription {
        let run_id = run_id.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .entry(run_id.clone())
            .or_default()
            .push(SubscriberSlot { id, tx });
        Subscription { id, run_id, rx }
    }

    /// Remove a subscriber queue; silent if already absent. The per-run
    /// entry is reaped when the last subscriber leaves.
    pub fn unregister(&self, run_id: &str, subscription_id: u64) {
        if let Some(mut slots) = self.subscribers.get_mut(run_id) {
            slots.retain(|slot| slot.id != subscription_id);
            let empty = slots.is_empty();
            drop(slots);
            if empty {
                self.subscribers.remove_if(run_id, |_, slots| slots.is_empty());
            }
        }
    }

    /// Publish an event to every currently-registered subscriber of the run.
    ///
    /// Never blocks and never fails; queues whose receiver is gone are
    /// pruned on the way.
    pub fn publish(&self, run_id: &str, event: StreamEvent) {
        let mut prune = false;
        if let Some(mut slots) = self.subscribers.get_mut(run_id) {
            slots.retain(|slot| slot.tx.send(event.clone()).is_ok());
            prune = slots.is_empty();
        }
        if prune {
            self.subscribers.remove_if(run_id, |_, slots| slots.is_empty());
        }
    }

    /// Number of live subscribers for a run
    pub fn subscriber_count(&self, run_id: &str) -> usize {
        self.subscribers
            .get(run_id)
            .map(|slots| slots.len())
            .unwrap_or(0)
    }
}

impl Default for LogStreamHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let hub = LogStreamHub::new();
        let mut first = hub.register("run-1");
        let mut second = hub.register("run-1");

        hub.publish("run-1", StreamEvent::log(ExecutionLog::success("a")));

        for sub in [&mut first, &mut second] {
            match sub.recv().await {
                Some(StreamEvent::Log { log }) => assert_eq!(log.node_id, "a"),
                other => panic!("expected log event, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_events_arrive_in_publication_order() {
        let hub = LogStreamHub::new();
        let mut sub = hub.register("run-1");

        for node in ["a", "b", "c"] {
            hub.publish("run-1", StreamEvent::log(ExecutionLog::success(node)));
        }
        hub.publish("run-1", StreamEvent::status(ExecutionStatus::Completed));

        let mut seen = Vec::new();
        for _ in 0..4 {
            match sub.recv().await.expect("event") {
                StreamEvent::Log { log } => seen.push(log.node_id),
                StreamEvent::Status { status, .. } => {
                    assert_eq!(status, ExecutionStatus::Completed)
                }
            }
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let hub = LogStreamHub::new();
        hub.publish("run-1", StreamEvent::status(ExecutionStatus::Running));
        assert_eq!(hub.subscriber_count("run-1"), 0);
    }

    #[tokio::test]
    async fn test_unregister_reaps_empty_entries() {
        let hub = LogStreamHub::new();
        let sub = hub.register("run-1");
        assert_eq!(hub.subscriber_count("run-1"), 1);

        hub.unregister("run-1", sub.id());
        assert_eq!(hub.subscriber_count("run-1"), 0);

        // Silent when already absent
        hub.unregister("run-1", sub.id());
        hub.unregister("other", 42);
    }

    #[tokio::test]
    async fn test_dropped_receivers_are_pruned_on_publish() {
        let hub = LogStreamHub::new();
        let sub = hub.register("run-1");
        drop(sub);

        hub.publish("run-1", StreamEvent::status(ExecutionStatus::Running));
        assert_eq!(hub.subscriber_count("run-1"), 0);
    }

    #[test]
    fn test_wire_shape_of_events() {
        let event = StreamEvent::status(ExecutionStatus::Running);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["status"], "running");
        assert!(value.get("error").is_none());

        let event = StreamEvent::log(ExecutionLog::success("a"));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "log");
        assert_eq!(value["log"]["node_id"], "a");
        assert_eq!(value["log"]["status"], "success");
    }
}
