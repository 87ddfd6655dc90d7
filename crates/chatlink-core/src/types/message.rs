use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::types::chat::{Chat, UserRef};
use crate::types::id::{ChannelId, Id};
use crate::types::wire::{object_fields, WireObject};

/// Chat message as exchanged with the broker.
///
/// Every field is optional on the wire. Fields this type does not know about,
/// and known fields whose value has an unexpected shape, are kept in `extra`,
/// so a payload that is parsed and serialized again keeps its shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    /// Client generated id, used to match an echo with the message that was sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// As sent by the broker; see [`Message::created_time`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    /// Set on messages the broker emits itself ("x joined the chat")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat: Option<Chat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRef>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        object_fields(deserializer).map(Self::from_wire)
    }
}

/// What a message carries, in display precedence order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Media<'a> {
    Photo(&'a str),
    Video(&'a str),
    Audio(&'a str),
    Text,
}

impl Message {
    /// Build a message from a decoded JSON object. Never fails: what does not
    /// fit a typed field stays in `extra` untouched.
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self::from_wire(WireObject::new(fields))
    }

    fn from_wire(mut wire: WireObject) -> Self {
        Self {
            id: wire.take("id"),
            uid: wire.take("uid"),
            text: wire.take("text"),
            created_at: wire.take("createdAt"),
            image: wire.take("image"),
            video: wire.take("video"),
            audio: wire.take("audio"),
            system: wire.take("system"),
            sent: wire.take("sent"),
            received: wire.take("received"),
            pending: wire.take("pending"),
            chat: wire.take("chat"),
            user: wire.take("user"),
            extra: wire.into_rest(),
        }
    }

    /// Create an outgoing text message for a chat
    pub fn outgoing(chat: Chat, text: impl Into<String>) -> Self {
        Self {
            uid: Some(Uuid::new_v4().to_string()),
            text: Some(text.into()),
            chat: Some(chat),
            ..Self::default()
        }
    }

    /// Whether the message carries a non-empty identifier.
    ///
    /// Frames without one are echoes or malformed and never reach observers.
    pub fn has_identifier(&self) -> bool {
        self.id.as_ref().map(Id::is_present).unwrap_or(false)
    }

    /// Channel the message belongs to
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.chat.as_ref().and_then(Chat::channel_id)
    }

    /// Classify the message by its attachment
    pub fn media(&self) -> Media<'_> {
        fn non_empty(value: &Option<String>) -> Option<&str> {
            value.as_deref().filter(|v| !v.is_empty())
        }

        if let Some(url) = non_empty(&self.image) {
            Media::Photo(url)
        } else if let Some(url) = non_empty(&self.video) {
            Media::Video(url)
        } else if let Some(url) = non_empty(&self.audio) {
            Media::Audio(url)
        } else {
            Media::Text
        }
    }

    /// `createdAt` in UTC. Offset timestamps are converted; local ones
    /// (no offset) are taken as UTC.
    pub fn created_time(&self) -> Option<DateTime<Utc>> {
        let raw = self.created_at.as_deref()?;
        if let Ok(zoned) = DateTime::parse_from_rfc3339(raw) {
            return Some(zoned.with_timezone(&Utc));
        }
        raw.parse::<NaiveDateTime>()
            .ok()
            .map(|local| Utc.from_utc_datetime(&local))
    }

    pub fn is_system(&self) -> bool {
        self.system.unwrap_or(false)
    }
}
