//! # Event Publisher
//!
//! Broadcast channel carrying task lifecycle events to any number of
//! subscribers. Slow subscribers lag rather than block publishers.
//!
//! ```rust
//! use serde_json::json;
//! use taskman_core::events::{types, EventPublisher};
//!
//! # tokio_test::block_on(async {
//! let publisher = EventPublisher::new(16);
//! let mut events = publisher.subscribe();
//!
//! let task_id = uuid::Uuid::new_v4();
//! let delivered =
//!     publisher.publish(types::TASK_CREATED, Some(task_id), json!({ "task_id": task_id }));
//! assert_eq!(delivered, 1);
//!
//! let event = events.recv().await.unwrap();
//! assert_eq!(event.name, types::TASK_CREATED);
//! assert!(event.is_for(task_id));
//! # });
//! ```

use crate::constants::system::DEFAULT_EVENT_CAPACITY;
use crate::models::TaskId;
use serde_json::Value;
use tokio::sync::broadcast;

/// Broadcast publisher for task lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub task_id: Option<TaskId>,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl PublishedEvent {
    pub fn is_for(&self, task_id: TaskId) -> bool {
        self.task_id == Some(task_id)
    }
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event with the given name and context, returning how many
    /// subscribers it reached.
    ///
    /// Publishing with no subscribers is not an error and reaches zero.
    pub fn publish(
        &self,
        event_name: impl Into<String>,
        task_id: Option<TaskId>,
        context: Value,
    ) -> usize {
        let event = PublishedEvent {
            name: event_name.into(),
            task_id,
            context,
            published_at: chrono::Utc::now(),
        };

        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let publisher = EventPublisher::default();
        assert_eq!(publisher.subscriber_count(), 0);
        assert_eq!(publisher.publish("task.created", None, json!({})), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let publisher = EventPublisher::new(8);
        let mut rx = publisher.subscribe();
        let task_id = Uuid::new_v4();

        let delivered =
            publisher.publish("task.completed", Some(task_id), json!({"stage": "OnInit"}));
        assert_eq!(delivered, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "task.completed");
        assert!(event.is_for(task_id));
        assert_eq!(event.context["stage"], "OnInit");
    }
}
