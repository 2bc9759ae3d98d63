use tokio::time::{sleep, Duration};
use tracing::{debug, error};

use crate::events::{Event, EventSender};

/// Events staged during a unit of work.
///
/// Services stage into a batch while holding the pair locks and hand the
/// batch to the outbox only after the mutation has committed, so a failed
/// operation never leaks notifications.
#[derive(Debug, Default)]
pub struct EventBatch {
    events: Vec<Event>,
}

impl EventBatch {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn stage(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// Post-commit dispatcher with at-least-once semantics.
///
/// Delivery is retried up to the configured bound with a short backoff;
/// exhausting retries logs the event as lost rather than failing the
/// already-committed operation.
#[derive(Clone)]
pub struct Outbox {
    sender: EventSender,
    max_retries: u32,
}

impl Outbox {
    pub fn new(sender: EventSender, max_retries: u32) -> Self {
        Self {
            sender,
            max_retries: max_retries.max(1),
        }
    }

    pub async fn publish(&self, batch: EventBatch) {
        for event in batch.events {
            self.publish_one(event).await;
        }
    }

    async fn publish_one(&self, event: Event) {
        for attempt in 1..=self.max_retries {
            match self.sender.send(event.clone()).await {
                Ok(()) => {
                    debug!(attempt, "Dispatched event");
                    return;
                }
                Err(e) if attempt < self.max_retries => {
                    debug!(attempt, error = %e, "Event dispatch failed; retrying");
                    sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
                Err(e) => {
                    error!(?event, error = %e, "Event dispatch failed after retries; event lost");
                }
            }
        }
    }
}
