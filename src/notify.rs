use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Published, Topic};

const CHANNEL_CAPACITY: usize = 256;

/// Best-effort broadcast hub, one channel per topic.
///
/// Publishing never blocks. A subscriber that falls more than
/// `CHANNEL_CAPACITY` events behind loses the oldest ones (`RecvError::Lagged`).
/// Nothing is persisted.
pub struct NotifyHub {
    channels: DashMap<Topic, broadcast::Sender<Published>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a topic. Creates the channel if needed.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Published> {
        let sender = self
            .channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Deliver to everyone currently subscribed to the event's topic.
    /// No-op if nobody is listening.
    pub fn publish(&self, event: Published) {
        if let Some(sender) = self.channels.get(&event.topic()) {
            let _ = sender.send(event);
        }
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.channels
            .get(&topic)
            .map_or(0, |s| s.receiver_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Notification, SpaceStatus};
    use tokio::sync::broadcast::error::RecvError;
    use ulid::Ulid;

    fn space_update() -> Published {
        Published::SpaceUpdated {
            space_id: Ulid::new(),
            status: SpaceStatus::Booked,
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(Topic::SpaceStatus);

        let event = space_update();
        hub.publish(event.clone());

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let hub = NotifyHub::new();
        let mut spaces = hub.subscribe(Topic::SpaceStatus);
        let mut notes = hub.subscribe(Topic::Notifications);

        let note = Published::Notification(Notification {
            user_id: "u1".into(),
            message: "hello".into(),
            at: 1,
        });
        hub.publish(note.clone());

        assert_eq!(notes.recv().await.unwrap(), note);
        assert!(spaces.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.publish(space_update());
        assert_eq!(hub.subscriber_count(Topic::SpaceStatus), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(Topic::SpaceStatus);
        for _ in 0..(CHANNEL_CAPACITY + 10) {
            hub.publish(space_update());
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(10))));
        assert!(rx.recv().await.is_ok());
    }
}
