//! Action-addressed bus messages.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::REPLY_SUFFIX;
use crate::error::ProtocolError;

/// A request or reply travelling over the bus.
///
/// Every message pairs a dotted action name with a JSON object payload.
/// On the wire it occupies exactly two frames, the UTF-8 action name
/// followed by the compact JSON encoding of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    action: String,
    data: Map<String, Value>,
}

impl BusMessage {
    /// Create a message with an empty payload.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            data: Map::new(),
        }
    }

    /// Create a message with a prepared payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NonObjectData`] when `data` is not a JSON
    /// object.
    pub fn with_data(action: impl Into<String>, data: Value) -> Result<Self, ProtocolError> {
        let Value::Object(data) = data else {
            return Err(ProtocolError::NonObjectData);
        };
        Ok(Self {
            action: action.into(),
            data,
        })
    }

    /// Build the synthetic failure reply an unreachable service gets.
    pub fn failure(action: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut message = Self::new(action);
        message.set("status", json!(false));
        message.set("reason", json!(reason.into()));
        message
    }

    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    #[must_use]
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Set one payload field, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Derive the reply message for this request, with an empty payload.
    ///
    /// The reply action is the request action with the result suffix
    /// appended.
    #[must_use]
    pub fn reply(&self) -> Self {
        Self::new(format!("{}{REPLY_SUFFIX}", self.action))
    }

    /// Derive the reply message for this request, carrying `data`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NonObjectData`] when `data` is not a JSON
    /// object.
    pub fn reply_with(&self, data: Value) -> Result<Self, ProtocolError> {
        Self::with_data(format!("{}{REPLY_SUFFIX}", self.action), data)
    }

    /// Payload `status` field, when present and boolean.
    #[must_use]
    pub fn status(&self) -> Option<bool> {
        self.data.get("status").and_then(Value::as_bool)
    }

    /// Payload `reason` field, when present and textual.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.data.get("reason").and_then(Value::as_str)
    }

    /// Encode as wire frames.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] when the payload cannot be
    /// serialized.
    pub fn to_frames(&self) -> Result<Vec<Bytes>, ProtocolError> {
        let payload = serde_json::to_vec(&self.data)?;
        Ok(vec![
            Bytes::copy_from_slice(self.action.as_bytes()),
            Bytes::from(payload),
        ])
    }

    /// Decode from wire frames.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] when the frame count or the
    /// action encoding is off, [`ProtocolError::Json`] when the payload
    /// is not valid JSON, and [`ProtocolError::NonObjectData`] when it is
    /// valid JSON but not an object.
    pub fn from_frames(frames: &[Bytes]) -> Result<Self, ProtocolError> {
        let [action, payload] = frames else {
            return Err(ProtocolError::Malformed {
                reason: "message body must be exactly two frames",
            });
        };
        let action = std::str::from_utf8(action).map_err(|_| ProtocolError::Malformed {
            reason: "action frame must be valid UTF-8",
        })?;
        let data: Value = serde_json::from_slice(payload)?;
        Self::with_data(action, data)
    }
}
