//! Lenient decoding of broker JSON objects.
//!
//! Payload types pull the fields they know out of the object one by one. A
//! field that is `null` or does not fit its type stays in the leftover map
//! with its original value, so serializing the typed value again yields the
//! object that was received.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

pub(crate) struct WireObject {
    fields: Map<String, Value>,
}

impl WireObject {
    pub(crate) fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub(crate) fn take<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let value = self.fields.remove(key)?;
        if !value.is_null() {
            if let Ok(typed) = T::deserialize(&value) {
                return Some(typed);
            }
        }
        self.fields.insert(key.to_string(), value);
        None
    }

    /// Whatever was not taken
    pub(crate) fn into_rest(self) -> Map<String, Value> {
        self.fields
    }
}

/// Deserialize an object's fields; anything but an object is an error
pub(crate) fn object_fields<'de, D>(deserializer: D) -> Result<WireObject, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Map::<String, Value>::deserialize(deserializer).map(WireObject::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> WireObject {
        match value {
            Value::Object(fields) => WireObject::new(fields),
            other => panic!("not an object: {}", other),
        }
    }

    #[test]
    fn test_take_keeps_misfits() {
        let mut wire = object(json!({ "text": "hi", "sent": "yes", "pending": null }));

        assert_eq!(wire.take::<String>("text").as_deref(), Some("hi"));
        assert_eq!(wire.take::<bool>("sent"), None);
        assert_eq!(wire.take::<bool>("pending"), None);
        assert_eq!(wire.take::<bool>("missing"), None);

        let rest = wire.into_rest();
        assert_eq!(Value::Object(rest), json!({ "sent": "yes", "pending": null }));
    }
}
