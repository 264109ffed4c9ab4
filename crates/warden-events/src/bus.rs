//! Broadcast bus for delivering events to subscribers.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::event::WardenEvent;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Event bus broadcasting [`WardenEvent`]s to all subscribers.
///
/// Events are delivered asynchronously and in publish order. A bus with
/// zero subscribers accepts publishes and drops them; publishers never
/// observe an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<WardenEvent>>,
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the given channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of receivers the event reached.
    pub fn publish(&self, event: WardenEvent) -> usize {
        let event = Arc::new(event);
        trace!(event_type = %event.event_type(), "Publishing event");

        match self.sender.send(Arc::clone(&event)) {
            Ok(count) => {
                debug!(
                    event_type = %event.event_type(),
                    receiver_count = count,
                    "Event published"
                );
                count
            },
            Err(_) => {
                // No receivers - this is fine
                trace!(event_type = %event.event_type(), "No receivers for event");
                0
            },
        }
    }

    /// Subscribe to all future events.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Current number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver half of the event bus.
pub struct EventReceiver {
    receiver: broadcast::Receiver<Arc<WardenEvent>>,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` when the channel closes. Lagged receivers skip
    /// dropped events with a warning and keep receiving.
    pub async fn recv(&mut self) -> Option<Arc<WardenEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive the next event without blocking.
    pub fn try_recv(&mut self) -> Option<Arc<WardenEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                },
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AlertSeverity;
    use warden_core::AgentId;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        let count = bus.publish(WardenEvent::LoopStatusUpdate {
            status: "running".to_string(),
        });
        assert_eq!(count, 1);

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type(), "loop.status_update");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        let count = bus.publish(WardenEvent::AgentAlert {
            severity: AlertSeverity::Info,
            message: "nobody listening".to_string(),
        });
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(WardenEvent::AgentMessage {
            from_agent: AgentId::from("a"),
            to_agent: AgentId::from("b"),
            content: "hello".to_string(),
            depth: 0,
        });

        assert_eq!(rx1.recv().await.unwrap().event_type(), "agent.message");
        assert_eq!(rx2.recv().await.unwrap().event_type(), "agent.message");
    }

    #[tokio::test]
    async fn test_try_recv_empty() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();
        assert!(receiver.try_recv().is_none());
    }
}
