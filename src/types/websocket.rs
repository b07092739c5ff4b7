use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ConnectionState, Generation, Topic};
use crate::error::{Error, Result};

/// Frames the client itself writes to the server
///
/// Serialized as `{"type":"subscribe","topic":"m1"}` and friends. The
/// identity is only present when one was configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Subscribe {
        topic: Topic,
        #[serde(rename = "userId", skip_serializing_if = "Option::is_none", default)]
        user_id: Option<String>,
    },
    Unsubscribe {
        topic: Topic,
        #[serde(rename = "userId", skip_serializing_if = "Option::is_none", default)]
        user_id: Option<String>,
    },
    Ping,
}

impl OutboundFrame {
    pub fn subscribe(topic: Topic, user_id: Option<String>) -> Self {
        OutboundFrame::Subscribe { topic, user_id }
    }

    pub fn unsubscribe(topic: Topic, user_id: Option<String>) -> Self {
        OutboundFrame::Unsubscribe { topic, user_id }
    }

    /// Encode as a JSON text frame
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A tagged message received from the server
///
/// `payload` is the complete JSON object exactly as it arrived, `type`
/// field included, so handlers see the frame unmodified.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    msg_type: String,
    payload: Map<String, Value>,
}

impl InboundMessage {
    /// Parse a text frame
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] when the text is not JSON
    /// - [`Error::MalformedFrame`] when it is not an object with a string `type`
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Build from an already decoded JSON value
    pub fn from_value(value: Value) -> Result<Self> {
        let payload = match value {
            Value::Object(map) => map,
            other => {
                return Err(Error::MalformedFrame(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let msg_type = match payload.get("type") {
            Some(Value::String(t)) if !t.is_empty() => t.clone(),
            Some(_) => {
                return Err(Error::MalformedFrame(
                    "`type` must be a non-empty string".to_string(),
                ))
            }
            None => return Err(Error::MalformedFrame("missing `type` field".to_string())),
        };

        Ok(Self { msg_type, payload })
    }

    /// The message type used for handler lookup
    pub fn msg_type(&self) -> &str {
        &self.msg_type
    }

    /// The full frame as received
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Look up a single field of the frame
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    /// Deserialize the frame into a caller-defined type
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.payload.clone()))?)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.payload)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Lifecycle notifications published by the client
///
/// `ConnectionLost` marks a gap: frames sent by the server between the loss
/// and the next `Connected` are never delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    StateChanged {
        state: ConnectionState,
    },
    Connected {
        generation: Generation,
    },
    /// An established connection dropped
    ConnectionLost {
        generation: Generation,
        attempt: u32,
        reason: String,
    },
    /// A connection attempt failed before the transport opened
    AttemptFailed {
        generation: Generation,
        attempt: u32,
        reason: String,
    },
    MaxAttemptsExhausted {
        attempts: u32,
        last_error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_frame_without_identity() {
        let frame = OutboundFrame::subscribe(Topic::from("m1"), None);
        assert_eq!(frame.to_text().unwrap(), r#"{"type":"subscribe","topic":"m1"}"#);
    }

    #[test]
    fn test_unsubscribe_frame_with_identity() {
        let frame = OutboundFrame::unsubscribe(Topic::from("m1"), Some("user-7".to_string()));
        assert_eq!(
            frame.to_text().unwrap(),
            r#"{"type":"unsubscribe","topic":"m1","userId":"user-7"}"#
        );
    }

    #[test]
    fn test_ping_frame() {
        assert_eq!(OutboundFrame::Ping.to_text().unwrap(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_parse_keeps_whole_payload() {
        let msg = InboundMessage::parse(r#"{"type":"price_update","topic":"m1","price":0.62}"#)
            .unwrap();
        assert_eq!(msg.msg_type(), "price_update");
        assert_eq!(
            msg.clone().into_value(),
            json!({"type": "price_update", "topic": "m1", "price": 0.62})
        );
        assert_eq!(msg.get("price"), Some(&json!(0.62)));
    }

    #[test]
    fn test_parse_rejects_untagged_frames() {
        assert!(matches!(
            InboundMessage::parse(r#"{"topic":"m1"}"#),
            Err(Error::MalformedFrame(_))
        ));
        assert!(matches!(
            InboundMessage::parse(r#"{"type":7}"#),
            Err(Error::MalformedFrame(_))
        ));
        assert!(matches!(
            InboundMessage::parse(r#"[{"type":"x"}]"#),
            Err(Error::MalformedFrame(_))
        ));
        assert!(matches!(InboundMessage::parse("not json"), Err(Error::Json(_))));
    }

    #[test]
    fn test_deserialize_into_caller_type() {
        #[derive(Deserialize)]
        struct PriceUpdate {
            topic: String,
            price: f64,
        }

        let msg = InboundMessage::parse(r#"{"type":"price_update","topic":"m1","price":0.5}"#)
            .unwrap();
        let update: PriceUpdate = msg.deserialize().unwrap();
        assert_eq!(update.topic, "m1");
        assert_eq!(update.price, 0.5);
    }
}
