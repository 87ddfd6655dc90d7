use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity identifier as it appears on the wire.
///
/// The broker issues UUID strings, older front-ends used numeric ids,
/// so both shapes are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(i64),
    Text(String),
}

impl Id {
    /// Whether the id carries a usable value.
    ///
    /// An empty string and `0` are treated as absent, the same way the
    /// browser client treats them.
    pub fn is_present(&self) -> bool {
        match self {
            Id::Number(n) => *n != 0,
            Id::Text(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{}", n),
            Id::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Id::Text(value.to_string())
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Id::Text(value)
    }
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Id::Number(value)
    }
}

/// Logical channel identifier: the id of the chat a subscription is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&Id> for ChannelId {
    fn from(value: &Id) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_presence() {
        assert!(Id::from("m1").is_present());
        assert!(Id::from(7).is_present());
        assert!(!Id::from("").is_present());
        assert!(!Id::from(0).is_present());
    }

    #[test]
    fn test_id_untagged_serde() {
        let text: Id = serde_json::from_str("\"4f0c\"").unwrap();
        assert_eq!(text, Id::Text("4f0c".to_string()));

        let number: Id = serde_json::from_str("42").unwrap();
        assert_eq!(number, Id::Number(42));
        assert_eq!(serde_json::to_string(&number).unwrap(), "42");
    }

    #[test]
    fn test_channel_id_from_id() {
        let channel = ChannelId::from(&Id::Number(12));
        assert_eq!(channel.as_str(), "12");
        assert_eq!(channel.to_string(), "12");
    }
}
