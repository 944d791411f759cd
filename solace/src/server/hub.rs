//! Per-user fan-out of relay events.
//!
//! Every user identity is a topic. A topic's channel is created when its
//! first member subscribes and removed when the last one leaves, so idle
//! users cost nothing here.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, trace};

use crate::models::RelayEvent;

/// Publishes events to the live members of a topic.
pub trait Broadcaster: Send + Sync {
    /// Deliver `event` to every current member of `topic`. Returns how many
    /// members received it; publishing to a topic nobody watches is a no-op.
    fn publish(&self, topic: &str, event: RelayEvent) -> usize;

    /// Number of live members of `topic`.
    fn members(&self, topic: &str) -> usize;
}

/// `Broadcaster` backed by one tokio broadcast channel per topic.
pub struct ChannelHub {
    capacity: usize,
    channels: RwLock<HashMap<String, broadcast::Sender<RelayEvent>>>,
}

impl ChannelHub {
    /// `capacity` is the per-topic buffer; members further behind than this
    /// lose the oldest events.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Join `topic`, creating its channel if needed.
    pub fn subscribe(self: &Arc<Self>, topic: &str) -> Subscription {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let receiver = channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        Subscription {
            hub: Arc::clone(self),
            topic: topic.to_string(),
            receiver,
        }
    }

    /// Number of topics with at least one member.
    pub fn topics(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Called while the leaving member's receiver is still alive.
    fn leave(&self, topic: &str) {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        if channels
            .get(topic)
            .is_some_and(|sender| sender.receiver_count() <= 1)
        {
            channels.remove(topic);
            debug!(user = %topic, "Last member left, channel dropped");
        }
    }
}

impl Broadcaster for ChannelHub {
    fn publish(&self, topic: &str, event: RelayEvent) -> usize {
        let name = event.name();
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        let delivered = channels
            .get(topic)
            .and_then(|sender| sender.send(event).ok())
            .unwrap_or(0);
        trace!(user = %topic, event = name, delivered, "Published");
        delivered
    }

    fn members(&self, topic: &str) -> usize {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        channels.get(topic).map_or(0, broadcast::Sender::receiver_count)
    }
}

/// Membership of one topic. Dropping it leaves the topic.
pub struct Subscription {
    hub: Arc<ChannelHub>,
    topic: String,
    receiver: broadcast::Receiver<RelayEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Result<RelayEvent, RecvError> {
        self.receiver.recv().await
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.leave(&self.topic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_member_receives_in_order() {
        let hub = Arc::new(ChannelHub::new(16));
        let mut phone = hub.subscribe("alice");
        let mut laptop = hub.subscribe("alice");

        assert_eq!(hub.publish("alice", RelayEvent::Chunk("Hi".into())), 2);
        assert_eq!(hub.publish("alice", RelayEvent::Done), 2);

        for member in [&mut phone, &mut laptop] {
            assert_eq!(member.recv().await.unwrap(), RelayEvent::Chunk("Hi".into()));
            assert_eq!(member.recv().await.unwrap(), RelayEvent::Done);
        }
    }

    #[tokio::test]
    async fn topics_are_private() {
        let hub = Arc::new(ChannelHub::new(16));
        let mut bob = hub.subscribe("bob");
        let _alice = hub.subscribe("alice");

        hub.publish("alice", RelayEvent::Chunk("secret".into()));
        hub.publish("bob", RelayEvent::Done);
        assert_eq!(bob.recv().await.unwrap(), RelayEvent::Done);
    }

    #[test]
    fn publish_without_members_is_noop() {
        let hub = ChannelHub::new(16);
        assert_eq!(hub.publish("nobody", RelayEvent::Done), 0);
        assert_eq!(hub.members("nobody"), 0);
    }

    #[test]
    fn channel_dropped_with_last_member() {
        let hub = Arc::new(ChannelHub::new(16));
        let first = hub.subscribe("alice");
        let second = hub.subscribe("alice");
        assert_eq!(hub.members("alice"), 2);

        drop(first);
        assert_eq!(hub.members("alice"), 1);
        assert_eq!(hub.topics(), 1);

        drop(second);
        assert_eq!(hub.members("alice"), 0);
        assert_eq!(hub.topics(), 0);
    }
}
