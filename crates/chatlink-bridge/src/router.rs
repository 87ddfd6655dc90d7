//! Subscription router
//!
//! Keeps at most one chat subscription on the shared session and republishes
//! its messages to the listener stream.

use std::sync::{Arc, Weak};

use chatlink_core::{chat_send_destination, chat_topic, ChannelId, Message};
use chatlink_observability::{create_channel_span, SubscriptionMetrics};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::{MessageSink, StompClient, SubscriptionHandle};
use crate::connection::ConnectionManager;
use crate::error::{BridgeError, BridgeResult};
use crate::listener::{Listener, ListenerStream};
use crate::protocol::Frame;

#[derive(Debug)]
struct ActiveSubscription {
    channel: ChannelId,
    handle: SubscriptionHandle,
    client: Weak<StompClient>,
}

impl ActiveSubscription {
    fn cancel(self) {
        // after a disconnect the client is already gone with its subscriptions
        let Some(client) = self.client.upgrade() else {
            return;
        };
        if let Err(e) = client.unsubscribe(&self.handle) {
            debug!(channel_id = %self.channel, "UNSUBSCRIBE not delivered: {}", e);
        }
    }
}

#[derive(Debug)]
pub struct SubscriptionRouter {
    connection: Arc<ConnectionManager>,
    listeners: Arc<ListenerStream>,
    active: Mutex<Option<ActiveSubscription>>,
}

impl SubscriptionRouter {
    pub fn new(connection: Arc<ConnectionManager>, listeners: Arc<ListenerStream>) -> Self {
        Self {
            connection,
            listeners,
            active: Mutex::new(None),
        }
    }

    pub fn active_channel(&self) -> Option<ChannelId> {
        self.active.lock().as_ref().map(|active| active.channel.clone())
    }

    /// Subscribe to the chat once the connection is ready. A subscription to
    /// another chat is cancelled first.
    pub async fn join_channel(&self, channel_id: ChannelId) -> BridgeResult<()> {
        if channel_id.is_empty() {
            return Err(BridgeError::MalformedInput("empty channel id".to_string()));
        }

        self.connection.ready().await?;
        let client = self.connection.client().ok_or(BridgeError::NotConnected)?;

        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            debug!(from = %previous.channel, to = %channel_id, "Switching chat subscription");
            previous.cancel();
        }

        let sink = forward_to(self.listeners.observe(), channel_id.clone());
        let handle = client
            .subscribe(&chat_topic(&channel_id), sink)
            .map_err(|e| BridgeError::Subscription(e.to_string()))?;

        info!(channel_id = %channel_id, subscription = handle.id(), "Joined chat");
        *active = Some(ActiveSubscription {
            channel: channel_id,
            handle,
            client: Arc::downgrade(&client),
        });
        Ok(())
    }

    /// Cancel the active subscription, if any, and start a fresh listener
    pub fn leave_channel(&self) {
        let previous = self.active.lock().take();
        if let Some(previous) = previous {
            info!(channel_id = %previous.channel, "Left chat");
            previous.cancel();
        }
        self.listeners.replace();
    }

    /// Send to the message's chat once the connection is ready. There is no
    /// delivery acknowledgement.
    pub async fn send(&self, message: &Message) -> BridgeResult<()> {
        let channel_id = message
            .channel_id()
            .ok_or_else(|| BridgeError::MalformedInput("message has no chat id".to_string()))?;
        let body = serde_json::to_string(message)?;

        self.connection.ready().await?;
        let client = self.connection.client().ok_or(BridgeError::NotConnected)?;
        client.send(&chat_send_destination(&channel_id), body)?;

        SubscriptionMetrics::record_sent();
        debug!(channel_id = %channel_id, "Message sent");
        Ok(())
    }
}

/// Publishes MESSAGE bodies carrying an id to `listener`, unchanged. Only
/// `id` decides; the other fields are never validated.
fn forward_to(listener: Listener, channel_id: ChannelId) -> MessageSink {
    let span = create_channel_span(channel_id.as_str());
    Arc::new(move |frame: &Frame| {
        let _entered = span.enter();
        match serde_json::from_str::<Value>(&frame.body) {
            Ok(Value::Object(fields)) => {
                let message = Message::from_fields(fields);
                if message.has_identifier() {
                    listener.publish(message);
                    SubscriptionMetrics::record_forwarded();
                } else {
                    debug!("Dropping inbound payload without id");
                    SubscriptionMetrics::record_dropped("missing_id");
                }
            }
            Ok(other) => {
                debug!(kind = json_kind(&other), "Dropping inbound payload that is not an object");
                SubscriptionMetrics::record_dropped("not_object");
            }
            Err(e) => {
                warn!("Dropping unparseable inbound payload: {}", e);
                SubscriptionMetrics::record_dropped("unparseable");
            }
        }
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(body: &str) -> Frame {
        Frame::new(crate::protocol::Command::Message)
            .header("subscription", "sub-0")
            .with_body(body)
    }

    #[tokio::test]
    async fn forwards_only_identified_payloads() {
        let listeners = ListenerStream::default();
        let listener = listeners.observe();
        let mut rx = listener.subscribe();
        let sink = forward_to(listener, ChannelId::from("42"));

        sink(&frame("{}"));
        sink(&frame(r#"{"id":""}"#));
        sink(&frame(r#"{"id":0,"text":"zero"}"#));
        sink(&frame(r#"["m0"]"#));
        sink(&frame("not json"));
        sink(&frame(r#"{"id":"m1","text":"hi","chat":{"id":42},"reaction":"+1"}"#));

        let forwarded = rx.recv().await.unwrap();
        assert_eq!(
            serde_json::to_value(&forwarded).unwrap(),
            serde_json::json!({"id":"m1","text":"hi","chat":{"id":42},"reaction":"+1"})
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn forwards_server_payload_unchanged() {
        let listeners = ListenerStream::default();
        let listener = listeners.observe();
        let mut rx = listener.subscribe();
        let sink = forward_to(listener, ChannelId::from("42"));

        let zoned = serde_json::json!({
            "id": "m1",
            "text": "hi",
            "createdAt": "2021-06-01T10:15:30.000Z"
        });
        let entity = serde_json::json!({
            "id": "m2",
            "text": "hello",
            "createdAt": "2021-06-01T10:16:00",
            "image": null,
            "sent": true,
            "chat": {
                "id": "42",
                "name": "support",
                "members": [{ "id": 5, "user": { "id": 1 } }],
                "messsages": []
            },
            "user": {
                "id": 1,
                "login": "bob",
                "imageUrl": "https://cdn.example.com/bob.png",
                "email": "bob@example.com",
                "activated": true
            }
        });
        sink(&frame(&zoned.to_string()));
        sink(&frame(&entity.to_string()));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.created_time().unwrap().to_rfc3339(), "2021-06-01T10:15:30+00:00");
        assert_eq!(serde_json::to_value(&first).unwrap(), zoned);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.channel_id().unwrap().as_str(), "42");
        assert_eq!(serde_json::to_value(&second).unwrap(), entity);
        assert!(rx.try_recv().is_err());
    }
}
