//! Broadcast fan-out of canonical agent events.
//!
//! Each chat has exactly one observer (see
//! [`ChatObservers`](crate::managers::ChatObservers)); the bus is for
//! everyone else: transcript viewers, a web bridge, tests. It is a thin
//! wrapper over a `tokio::sync::broadcast` channel, so subscribers may live
//! in async code while the adapters publishing to it are plain threads.
//!
//! Topics:
//! - `agent:event:<chat_id>` with a serialized [`AgentEvent`]
//! - `agent:done:<chat_id>` with a `null` payload

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::agents::AgentEvent;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub topic: String,
    pub payload: serde_json::Value,
}

impl BusMessage {
    /// The chat a message belongs to, if its topic is one of ours.
    pub fn chat_id(&self) -> Option<&str> {
        self.topic
            .strip_prefix("agent:event:")
            .or_else(|| self.topic.strip_prefix("agent:done:"))
    }

    /// Decode the payload of an `agent:event:*` message.
    pub fn agent_event(&self) -> Option<AgentEvent> {
        if !self.topic.starts_with("agent:event:") {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}

pub struct EventBus {
    sender: broadcast::Sender<BusMessage>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Slow subscribers that fall more than `capacity` messages behind lose
    /// the oldest ones (`RecvError::Lagged`).
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to every current subscriber. Returns how many received it.
    pub fn publish<T: Serialize>(&self, topic: impl Into<String>, payload: &T) -> usize {
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(err) => {
                log::warn!("dropping unserializable bus payload: {err}");
                return 0;
            }
        };
        let message = BusMessage {
            topic: topic.into(),
            payload,
        };
        self.sender.send(message).unwrap_or(0)
    }

    pub fn publish_event(&self, chat_id: &str, event: &AgentEvent) -> usize {
        self.publish(format!("agent:event:{chat_id}"), event)
    }

    pub fn publish_done(&self, chat_id: &str) -> usize {
        self.publish(format!("agent:done:{chat_id}"), &serde_json::Value::Null)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
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

    mod bus_message {
        use super::*;

        #[test]
        fn chat_id_from_topics() {
            let event = BusMessage {
                topic: "agent:event:c1".to_string(),
                payload: serde_json::Value::Null,
            };
            let done = BusMessage {
                topic: "agent:done:c2".to_string(),
                payload: serde_json::Value::Null,
            };
            let other = BusMessage {
                topic: "something:else".to_string(),
                payload: serde_json::Value::Null,
            };
            assert_eq!(event.chat_id(), Some("c1"));
            assert_eq!(done.chat_id(), Some("c2"));
            assert_eq!(other.chat_id(), None);
        }

        #[test]
        fn done_topic_has_no_agent_event() {
            let done = BusMessage {
                topic: "agent:done:c2".to_string(),
                payload: serde_json::Value::Null,
            };
            assert!(done.agent_event().is_none());
        }
    }

    mod event_bus {
        use super::*;

        #[test]
        fn publish_without_subscribers_returns_zero() {
            let bus = EventBus::new();
            assert_eq!(bus.publish_done("c1"), 0);
        }

        #[test]
        fn subscriber_count_tracks_receivers() {
            let bus = EventBus::with_capacity(8);
            let rx = bus.subscribe();
            let _rx2 = bus.subscribe();
            assert_eq!(bus.subscriber_count(), 2);
            drop(rx);
            assert_eq!(bus.subscriber_count(), 1);
        }

        #[tokio::test]
        async fn agent_events_round_trip_through_the_bus() {
            let bus = EventBus::new();
            let mut rx = bus.subscribe();

            let sent = AgentEvent::Text {
                text: "hello".to_string(),
            };
            assert_eq!(bus.publish_event("chat-9", &sent), 1);
            bus.publish_done("chat-9");

            let first = rx.recv().await.unwrap();
            assert_eq!(first.topic, "agent:event:chat-9");
            assert_eq!(first.agent_event(), Some(sent));

            let second = rx.recv().await.unwrap();
            assert_eq!(second.topic, "agent:done:chat-9");
        }

        #[tokio::test]
        async fn lagging_subscriber_sees_lagged_error() {
            let bus = EventBus::with_capacity(2);
            let mut rx = bus.subscribe();
            for n in 0..5 {
                bus.publish("t", &n);
            }
            assert!(matches!(
                rx.recv().await,
                Err(broadcast::error::RecvError::Lagged(_))
            ));
        }
    }
}
