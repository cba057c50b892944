//! Per-owner publish/subscribe channels.
//!
//! Delivery is best effort: a message reaches whoever is subscribed at the
//! moment it is published and is never replayed. A subscription ends when
//! the [`STOP`] sentinel arrives on any of its channels or when it is dropped.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parley_core::events::EventRecord;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, warn};

use crate::error::Result;

/// Sentinel payload that ends every subscription listening on the channel.
pub const STOP: &str = "STOP";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub payload: String,
}

impl Message {
    pub fn event(&self) -> Result<EventRecord> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

struct BusInner {
    channels: DashMap<String, broadcast::Sender<String>>,
    capacity: usize,
}

/// In-process broker: one broadcast sender per channel.
///
/// Channels live in this process only. Servers sharing one database file do
/// not see each other's events, so a subscriber receives only what was
/// published by the process it is connected to. Running more than one
/// process needs an external broker behind this interface.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("channels", &self.inner.channels.len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                channels: DashMap::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Broadcast `payload` on `channel`. Returns how many subscribers got it.
    pub fn publish(&self, channel: &str, payload: impl Into<String>) -> usize {
        let Some(sender) = self.inner.channels.get(channel).map(|s| s.clone()) else {
            return 0;
        };
        match sender.send(payload.into()) {
            Ok(receivers) => receivers,
            Err(_) => {
                self.prune(channel);
                0
            }
        }
    }

    pub fn publish_event(&self, record: &EventRecord) -> Result<usize> {
        let payload = serde_json::to_string(record)?;
        let channel = record.channel();
        let receivers = self.publish(&channel, payload);
        debug!(channel, receivers, "event published");
        Ok(receivers)
    }

    /// End every subscription on `channel`.
    pub fn stop(&self, channel: &str) -> usize {
        self.publish(channel, STOP)
    }

    /// End every open subscription. Used on shutdown so long-lived streams
    /// let their connections close.
    pub fn stop_all(&self) -> usize {
        let channels: Vec<String> = self.inner.channels.iter().map(|e| e.key().clone()).collect();
        channels.iter().map(|channel| self.stop(channel)).sum()
    }

    pub fn subscribe<S: AsRef<str>>(&self, channels: &[S]) -> Subscription {
        let mut streams = StreamMap::new();
        for channel in channels {
            let channel = channel.as_ref();
            let rx = self
                .inner
                .channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
                .subscribe();
            let _ = streams.insert(channel.to_string(), BroadcastStream::new(rx));
        }
        Subscription {
            streams,
            bus: self.clone(),
            stopped: false,
        }
    }

    /// Number of channels with at least one live subscriber.
    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .get(channel)
            .map_or(0, |s| s.receiver_count())
    }

    fn prune(&self, channel: &str) {
        let _ = self
            .inner
            .channels
            .remove_if(channel, |_, sender| sender.receiver_count() == 0);
    }
}

/// A live listener on one or more channels. Dropping it unsubscribes.
pub struct Subscription {
    streams: StreamMap<String, BroadcastStream<String>>,
    bus: EventBus,
    stopped: bool,
}

impl Subscription {
    pub fn channels(&self) -> Vec<String> {
        self.streams.keys().cloned().collect()
    }

    /// Wait for the next message. `None` once stopped.
    pub async fn next_message(&mut self) -> Option<Message> {
        if self.stopped {
            return None;
        }
        loop {
            let Some((channel, item)) = self.streams.next().await else {
                self.stopped = true;
                return None;
            };
            match item {
                Ok(payload) if payload == STOP => {
                    debug!(channel, "subscription stopped");
                    self.stopped = true;
                    return None;
                }
                Ok(payload) => return Some(Message { channel, payload }),
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    warn!(channel, skipped = n, "subscriber lagged, dropped events");
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let channels = self.channels();
        drop(std::mem::take(&mut self.streams));
        for channel in channels {
            self.bus.prune(&channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use chrono::Utc;
    use parley_core::events::{CrudAction, Event, EventStatus, EventType};
    use parley_core::Owner;

    async fn recv(sub: &mut Subscription) -> Option<Message> {
        tokio::time::timeout(Duration::from_secs(1), sub.next_message())
            .await
            .expect("timed out waiting for message")
    }

    #[tokio::test]
    async fn publish_without_subscribers_reaches_nobody() {
        let bus = EventBus::new(16);
        assert_eq!(bus.publish("object:u1", "hello"), 0);
        assert_eq!(bus.channel_count(), 0);
    }

    #[tokio::test]
    async fn subscriber_receives_published_messages() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe(&["object:u1"]);
        assert_eq!(bus.publish("object:u1", "one"), 1);
        assert_eq!(bus.publish("object:u2", "other"), 0);
        let msg = recv(&mut sub).await.unwrap();
        assert_eq!(msg.channel, "object:u1");
        assert_eq!(msg.payload, "one");
    }

    #[tokio::test]
    async fn separate_buses_do_not_share_channels() {
        let here = EventBus::new(16);
        let elsewhere = EventBus::new(16);
        let _sub = here.subscribe(&["object:u1"]);
        assert_eq!(elsewhere.publish("object:u1", "lost"), 0);
        assert_eq!(here.clone().publish("object:u1", "seen"), 1);
    }

    #[tokio::test]
    async fn late_subscriber_sees_no_backlog() {
        let bus = EventBus::new(16);
        let _early = bus.subscribe(&["c"]);
        bus.publish("c", "before");
        let mut late = bus.subscribe(&["c"]);
        bus.publish("c", "after");
        assert_eq!(recv(&mut late).await.unwrap().payload, "after");
    }

    #[tokio::test]
    async fn stop_sentinel_ends_subscription() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe(&["a", "b"]);
        bus.publish("a", "x");
        assert_eq!(recv(&mut sub).await.unwrap().payload, "x");
        bus.stop("b");
        assert_eq!(recv(&mut sub).await, None);
        bus.publish("a", "ignored");
        assert_eq!(recv(&mut sub).await, None);
    }

    #[tokio::test]
    async fn stop_all_ends_every_subscription() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe(&["object:u1"]);
        let mut b = bus.subscribe(&["task:u2"]);
        assert_eq!(bus.stop_all(), 2);
        assert_eq!(recv(&mut a).await, None);
        assert_eq!(recv(&mut b).await, None);
    }

    #[tokio::test]
    async fn dropping_subscription_releases_channel() {
        let bus = EventBus::new(16);
        let sub = bus.subscribe(&["task:u1"]);
        assert_eq!(bus.subscriber_count("task:u1"), 1);
        drop(sub);
        assert_eq!(bus.channel_count(), 0);
        assert_eq!(bus.publish("task:u1", "x"), 0);
    }

    #[tokio::test]
    async fn shared_channel_survives_one_drop() {
        let bus = EventBus::new(16);
        let first = bus.subscribe(&["c"]);
        let mut second = bus.subscribe(&["c"]);
        drop(first);
        assert_eq!(bus.publish("c", "still here"), 1);
        assert_eq!(recv(&mut second).await.unwrap().payload, "still here");
    }

    #[tokio::test]
    async fn lagged_subscriber_continues() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe(&["c"]);
        for i in 0..5 {
            bus.publish("c", i.to_string());
        }
        assert_eq!(recv(&mut sub).await.unwrap().payload, "3");
        assert_eq!(recv(&mut sub).await.unwrap().payload, "4");
    }

    #[tokio::test]
    async fn event_records_round_trip() {
        let bus = EventBus::new(16);
        let owner = Owner::new("u1").unwrap();
        let mut sub = bus.subscribe(&[EventType::Object.channel(&owner)]);
        let record = EventRecord::new(
            owner,
            EventType::Object,
            Event::crud(CrudAction::Create, EventStatus::Completed, serde_json::json!({"id": 1})),
            Utc::now(),
        );
        assert_eq!(bus.publish_event(&record).unwrap(), 1);
        let msg = recv(&mut sub).await.unwrap();
        assert_eq!(msg.event().unwrap(), record);
    }
}
