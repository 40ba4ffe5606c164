use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Heartbeats are emitted after this much publish silence so stream consumers
/// can tell "idle" from "disconnected".
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

const HEARTBEAT_POLL: Duration = Duration::from_secs(1);
const DEFAULT_CAPACITY: usize = 256;

/// Ingestion lifecycle events, one JSON object per message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IngestEvent {
    IngestRunStart {
        count_files: usize,
    },
    IngestFileStart {
        file: String,
    },
    IngestFileDone {
        file: String,
        chunks: usize,
        pages: usize,
        embed_latency_ms: u64,
    },
    IngestFileSkipped {
        file: String,
    },
    IngestFileError {
        file: String,
        error: String,
    },
    IngestRunDone {
        files_processed: usize,
        pages_processed: usize,
        chunks_upserted: usize,
        errors: usize,
    },
    Heartbeat,
}

/// Broadcast fan-out to any number of live subscribers. Subscribers see every
/// event published after they attach; there is no history replay. Each
/// subscriber has a bounded queue and a lagging subscriber loses its oldest
/// events, never the publisher's progress.
#[derive(Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<IngestEvent>,
    last_publish: Arc<Mutex<Instant>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            last_publish: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Dropping the returned receiver detaches the subscriber; other
    /// subscribers and in-progress runs are unaffected.
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: IngestEvent) {
        if let Ok(mut held) = self.last_publish.lock() {
            *held = Instant::now();
        }
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Background task emitting `heartbeat` whenever no substantive event was
    /// published for [`HEARTBEAT_INTERVAL`].
    pub fn spawn_heartbeat(&self) -> tokio::task::JoinHandle<()> {
        let publisher = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(HEARTBEAT_POLL).await;
                let idle = publisher
                    .last_publish
                    .lock()
                    .map(|held| held.elapsed())
                    .unwrap_or(Duration::ZERO);
                if idle >= HEARTBEAT_INTERVAL {
                    publisher.publish(IngestEvent::Heartbeat);
                }
            }
        })
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    #[tokio::test]
    async fn subscribers_see_only_events_after_attaching() {
        let publisher = EventPublisher::new();
        publisher.publish(IngestEvent::IngestRunStart { count_files: 3 });

        let mut late = publisher.subscribe();
        assert!(matches!(late.try_recv(), Err(TryRecvError::Empty)));

        publisher.publish(IngestEvent::IngestFileSkipped {
            file: "a.pdf".to_string(),
        });
        assert_eq!(
            late.recv().await.expect("event after attach"),
            IngestEvent::IngestFileSkipped {
                file: "a.pdf".to_string()
            }
        );
    }

    #[tokio::test]
    async fn lagging_subscriber_drops_oldest_events() {
        let publisher = EventPublisher::with_capacity(2);
        let mut slow = publisher.subscribe();

        for count_files in 0..4 {
            publisher.publish(IngestEvent::IngestRunStart { count_files });
        }

        // Overflow policy: the two oldest events are gone, the rest arrive.
        assert!(matches!(slow.recv().await, Err(RecvError::Lagged(2))));
        assert_eq!(
            slow.recv().await.expect("remaining event"),
            IngestEvent::IngestRunStart { count_files: 2 }
        );
        assert_eq!(
            slow.recv().await.expect("remaining event"),
            IngestEvent::IngestRunStart { count_files: 3 }
        );
    }

    #[tokio::test]
    async fn detaching_one_subscriber_leaves_others_attached() {
        let publisher = EventPublisher::new();
        let first = publisher.subscribe();
        let mut second = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 2);

        drop(first);
        assert_eq!(publisher.subscriber_count(), 1);

        publisher.publish(IngestEvent::Heartbeat);
        assert_eq!(
            second.recv().await.expect("survivor still receives"),
            IngestEvent::Heartbeat
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_emits_heartbeats() {
        let publisher = EventPublisher::new();
        let mut subscriber = publisher.subscribe();
        let task = publisher.spawn_heartbeat();

        tokio::time::advance(HEARTBEAT_INTERVAL + HEARTBEAT_POLL).await;
        // Let the heartbeat task run its tick.
        tokio::task::yield_now().await;

        assert_eq!(
            subscriber.recv().await.expect("heartbeat on idle"),
            IngestEvent::Heartbeat
        );
        task.abort();
    }

    #[test]
    fn events_serialize_with_snake_case_tags() {
        let event = IngestEvent::IngestFileDone {
            file: "a.pdf".to_string(),
            chunks: 4,
            pages: 2,
            embed_latency_ms: 120,
        };
        let value = serde_json::to_value(&event).expect("event serializes");
        assert_eq!(value["event"], "ingest_file_done");
        assert_eq!(value["chunks"], 4);

        let heartbeat = serde_json::to_value(IngestEvent::Heartbeat).expect("serializes");
        assert_eq!(heartbeat["event"], "heartbeat");
    }
}
