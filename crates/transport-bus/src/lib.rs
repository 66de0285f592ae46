//! Topic fan-out with member presence. Backs the relay's channels and the
//! in-process transport used by local sessions and tests.

use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::trace;

/// Messages a member may fall behind by before it misses the oldest ones.
/// A member that lags loses those messages for good: a later full-state
/// publish repairs state, but a dropped one-shot command such as a window
/// reload is never delivered.
const TOPIC_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusPayload {
    Data(Bytes),
    Joined,
    Left,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub sender: String,
    pub payload: BusPayload,
}

impl BusMessage {
    pub fn data(&self) -> Option<&Bytes> {
        match &self.payload {
            BusPayload::Data(bytes) => Some(bytes),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
    #[error("bus transport error: {0}")]
    Transport(String),
}

pub type BusResult<T> = Result<T, BusError>;

pub trait Bus: Send + Sync {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage>;

    /// Returns how many subscribers saw the message. Publishing to a topic
    /// nobody listens on is not an error.
    fn publish(&self, topic: &str, sender: &str, payload: Bytes) -> BusResult<usize>;

    /// Adds `member` to the topic and announces it. Returns the members that
    /// were present before.
    fn join(&self, topic: &str, member: &str) -> Vec<String>;

    /// Removes `member` and announces the departure if it was present.
    fn leave(&self, topic: &str, member: &str) -> bool;

    fn members(&self, topic: &str) -> Vec<String>;
}

#[derive(Debug)]
struct Topic {
    sender: broadcast::Sender<BusMessage>,
    members: BTreeSet<String>,
}

impl Default for Topic {
    fn default() -> Self {
        Self {
            sender: broadcast::channel(TOPIC_CAPACITY).0,
            members: BTreeSet::new(),
        }
    }
}

/// In-memory bus; one broadcast channel per topic.
#[derive(Debug, Default)]
pub struct LocalBus {
    topics: RwLock<HashMap<String, Topic>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        if let Some(existing) = self.topics.read().get(topic) {
            return existing.sender.clone();
        }
        let mut guard = self.topics.write();
        guard.entry(topic.to_string()).or_default().sender.clone()
    }

    fn announce(sender: &broadcast::Sender<BusMessage>, topic: &str, member: &str, payload: BusPayload) {
        let delivered = sender
            .send(BusMessage {
                topic: topic.to_string(),
                sender: member.to_string(),
                payload,
            })
            .unwrap_or(0);
        trace!(topic, member, delivered, "presence announced");
    }

    /// Drops topics with neither members nor subscribers.
    pub fn prune(&self) -> usize {
        let mut guard = self.topics.write();
        let before = guard.len();
        guard.retain(|_, topic| !topic.members.is_empty() || topic.sender.receiver_count() > 0);
        before - guard.len()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }
}

impl Bus for LocalBus {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        self.sender_for(topic).subscribe()
    }

    fn publish(&self, topic: &str, sender: &str, payload: Bytes) -> BusResult<usize> {
        let channel = self.sender_for(topic);
        Ok(channel
            .send(BusMessage {
                topic: topic.to_string(),
                sender: sender.to_string(),
                payload: BusPayload::Data(payload),
            })
            .unwrap_or(0))
    }

    fn join(&self, topic: &str, member: &str) -> Vec<String> {
        let mut guard = self.topics.write();
        let entry = guard.entry(topic.to_string()).or_default();
        let existing: Vec<String> = entry
            .members
            .iter()
            .filter(|m| m.as_str() != member)
            .cloned()
            .collect();
        if entry.members.insert(member.to_string()) {
            Self::announce(&entry.sender, topic, member, BusPayload::Joined);
        }
        existing
    }

    fn leave(&self, topic: &str, member: &str) -> bool {
        let mut guard = self.topics.write();
        let Some(entry) = guard.get_mut(topic) else {
            return false;
        };
        let removed = entry.members.remove(member);
        if removed {
            Self::announce(&entry.sender, topic, member, BusPayload::Left);
        }
        removed
    }

    fn members(&self, topic: &str) -> Vec<String> {
        self.topics
            .read()
            .get(topic)
            .map(|entry| entry.members.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_bus_round_trip() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe("multiview:remote:4821");
        let delivered = bus
            .publish("multiview:remote:4821", "display", Bytes::from_static(b"ping"))
            .expect("publish ok");
        assert_eq!(delivered, 1);
        let msg = sub.recv().await.expect("receive ok");
        assert_eq!(msg.topic, "multiview:remote:4821");
        assert_eq!(msg.sender, "display");
        assert_eq!(msg.data(), Some(&Bytes::from_static(b"ping")));
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let bus = LocalBus::new();
        assert_eq!(bus.publish("empty", "a", Bytes::new()).unwrap(), 0);
    }

    #[tokio::test]
    async fn presence_is_announced_once() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe("t");
        assert!(bus.join("t", "display").is_empty());
        assert_eq!(bus.join("t", "remote"), vec!["display".to_string()]);
        bus.join("t", "remote");

        assert_eq!(sub.recv().await.unwrap().payload, BusPayload::Joined);
        let second = sub.recv().await.unwrap();
        assert_eq!((second.sender.as_str(), second.payload), ("remote", BusPayload::Joined));

        assert!(bus.leave("t", "remote"));
        assert!(!bus.leave("t", "remote"));
        assert_eq!(sub.recv().await.unwrap().payload, BusPayload::Left);
        assert!(sub.try_recv().is_err());
        assert_eq!(bus.members("t"), vec!["display".to_string()]);
    }

    #[tokio::test]
    async fn lagging_subscriber_loses_oldest_messages() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe("t");
        for n in 0..TOPIC_CAPACITY + 3 {
            bus.publish("t", "remote", Bytes::from(n.to_string())).unwrap();
        }

        match sub.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert_eq!(skipped, 3),
            other => panic!("expected lag, got {other:?}"),
        }
        let next = sub.recv().await.unwrap();
        assert_eq!(next.data(), Some(&Bytes::from("3")));
    }

    #[test]
    fn prune_drops_idle_topics() {
        let bus = LocalBus::new();
        drop(bus.subscribe("idle"));
        bus.join("busy", "display");
        assert_eq!(bus.prune(), 1);
        assert_eq!(bus.topic_count(), 1);
    }
}
