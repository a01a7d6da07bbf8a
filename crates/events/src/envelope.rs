use serde::{Deserialize, Serialize};

/// Keyed envelope wrapping every command, query and outcome event on the wire.
///
/// - For inbound commands the `key` is the idempotency key of the resulting write.
/// - For outbound events the `key` is the deduplication key handed to the broker.
///
/// Envelopes live only for one pipeline invocation; nothing caches them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub key: String,
    pub value: T,
}

impl<T> Envelope<T> {
    pub fn new(key: impl Into<String>, value: T) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_wire_shape_is_key_and_value() {
        let env = Envelope::new("k1", 42u32);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json, serde_json::json!({"key": "k1", "value": 42}));
    }
}
