//! The internal state-change bus: every job transition is published here and
//! fanned out verbatim to WebSocket clients. A single `tokio::sync::broadcast`
//! channel with a bounded backlog — slow subscribers lag and are dropped
//! rather than stalling the publisher.

use cps_domain::event::JobEvent;
use tokio::sync::broadcast;

/// Pending events a subscriber may lag behind before being disconnected.
const BACKLOG: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BACKLOG);
        Self { sender }
    }

    pub fn publish(&self, event: JobEvent) {
        // No subscribers is the common case between client connections; a
        // send error here just means nobody is listening right now.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_event_reaches_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(JobEvent::Connection {
            message: "hello".into(),
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, JobEvent::Connection { .. }));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(JobEvent::Connection {
            message: "noop".into(),
        });
    }

    #[tokio::test]
    async fn lagging_subscriber_observes_lagged_error_not_a_hang() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        for i in 0..(BACKLOG + 10) {
            bus.publish(JobEvent::Connection {
                message: format!("msg {i}"),
            });
        }
        let result = rx.recv().await;
        assert!(matches!(result, Err(broadcast::error::RecvError::Lagged(_))));
    }
}
