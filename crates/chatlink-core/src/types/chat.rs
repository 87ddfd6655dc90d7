use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::types::id::{ChannelId, Id};
use crate::types::wire::object_fields;

/// Chat room reference carried inside message payloads.
///
/// The broker embeds the whole chat entity (members, last messages...);
/// whatever is not modelled here is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl<'de> Deserialize<'de> for Chat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut wire = object_fields(deserializer)?;
        Ok(Self {
            id: wire.take("id"),
            guid: wire.take("guid"),
            icon: wire.take("icon"),
            name: wire.take("name"),
            extra: wire.into_rest(),
        })
    }
}

impl Chat {
    /// Create a chat reference that only carries its id
    pub fn with_id(id: impl Into<Id>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Channel the chat maps to, when it has a usable id
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.id
            .as_ref()
            .filter(|id| id.is_present())
            .map(ChannelId::from)
    }
}

/// Author of a message
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// `imageUrl`, `email`, ... as sent by the broker
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl<'de> Deserialize<'de> for UserRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut wire = object_fields(deserializer)?;
        Ok(Self {
            id: wire.take("id"),
            login: wire.take("login"),
            first_name: wire.take("firstName"),
            last_name: wire.take("lastName"),
            extra: wire.into_rest(),
        })
    }
}

impl UserRef {
    /// Human readable name: "first last", falling back to the login
    pub fn display_name(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
            (Some(first), None) => Some(first.clone()),
            (None, Some(last)) => Some(last.clone()),
            (None, None) => self.login.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_chat_entity_survives() {
        let payload = json!({
            "id": 42,
            "name": "support",
            "icon": null,
            "members": [{ "id": 1, "user": { "login": "bob" } }],
            "messsages": []
        });
        let chat: Chat = serde_json::from_value(payload.clone()).unwrap();
        assert_eq!(chat.channel_id().unwrap().as_str(), "42");
        assert_eq!(chat.icon, None);
        assert!(chat.extra.contains_key("members"));
        assert_eq!(serde_json::to_value(&chat).unwrap(), payload);
    }

    #[test]
    fn test_user_extra_fields_and_misfits() {
        let payload = json!({
            "id": 1,
            "login": "bob",
            "firstName": 7,
            "imageUrl": "https://cdn.example.com/bob.png",
            "email": "bob@example.com"
        });
        let user: UserRef = serde_json::from_value(payload.clone()).unwrap();
        assert_eq!(user.first_name, None);
        assert_eq!(user.display_name().as_deref(), Some("bob"));
        assert_eq!(serde_json::to_value(&user).unwrap(), payload);
    }
}
