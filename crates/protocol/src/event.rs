//! Published events and their dotted topic identifiers.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Version tag appended to published topic identifiers.
pub const TOPIC_VERSION: &str = "1";

/// Dotted topic identifier for a published event.
///
/// Published identifiers carry a millisecond timestamp and a version as
/// their last two segments, `<name>.<unix-millis>.<version>`, so that
/// subscribers can prefix-match on the bare name. Parsing is lenient: an
/// identifier whose second-to-last segment is not numeric is treated as
/// an untagged bare name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTopic {
    name: String,
    timestamp: Option<u64>,
    version: Option<String>,
}

impl EventTopic {
    /// Tag `name` with the current time and the protocol topic version.
    pub fn tagged(name: impl Into<String>) -> Self {
        let millis = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
        Self {
            name: name.into(),
            timestamp: Some(millis),
            version: Some(TOPIC_VERSION.to_owned()),
        }
    }

    /// Parse a topic identifier received off the wire.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let segments: Vec<&str> = raw.split('.').collect();
        let tagged = match segments.as_slice() {
            [name @ .., stamp, version] if !name.is_empty() => {
                stamp.parse::<u64>().ok().map(|timestamp| Self {
                    name: name.join("."),
                    timestamp: Some(timestamp),
                    version: Some((*version).to_owned()),
                })
            }
            _ => None,
        };
        tagged.unwrap_or_else(|| Self {
            name: raw.to_owned(),
            timestamp: None,
            version: None,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Full identifier as it appears on the wire.
    #[must_use]
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for EventTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(timestamp) = self.timestamp {
            write!(f, ".{timestamp}")?;
        }
        if let Some(version) = &self.version {
            write!(f, ".{version}")?;
        }
        Ok(())
    }
}

/// An event published on the bus, a tagged topic plus a JSON payload.
///
/// On the wire an event occupies two frames, the UTF-8 topic identifier
/// followed by the compact JSON encoding of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusEvent {
    topic: EventTopic,
    payload: Value,
}

impl BusEvent {
    #[must_use]
    pub fn new(topic: EventTopic, payload: Value) -> Self {
        Self { topic, payload }
    }

    /// Build an event whose topic is tagged with the current time.
    pub fn tagged(name: impl Into<String>, payload: Value) -> Self {
        Self::new(EventTopic::tagged(name), payload)
    }

    #[must_use]
    pub fn topic(&self) -> &EventTopic {
        &self.topic
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.topic.name()
    }

    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Encode as wire frames.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] when the payload cannot be
    /// serialized.
    pub fn to_frames(&self) -> Result<Vec<Bytes>, ProtocolError> {
        let payload = serde_json::to_vec(&self.payload)?;
        Ok(vec![
            Bytes::from(self.topic.id().into_bytes()),
            Bytes::from(payload),
        ])
    }

    /// Decode from wire frames.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] when the frame count or the
    /// topic encoding is off, and [`ProtocolError::Json`] when the
    /// payload is not valid JSON.
    pub fn from_frames(frames: &[Bytes]) -> Result<Self, ProtocolError> {
        let [topic, payload] = frames else {
            return Err(ProtocolError::Malformed {
                reason: "event must be exactly two frames",
            });
        };
        let topic = std::str::from_utf8(topic).map_err(|_| ProtocolError::Malformed {
            reason: "topic frame must be valid UTF-8",
        })?;
        let payload: Value = serde_json::from_slice(payload)?;
        Ok(Self::new(EventTopic::parse(topic), payload))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn should_stamp_tagged_topic() {
        let topic = EventTopic::tagged("device.update");
        assert_eq!(topic.name(), "device.update");
        assert!(topic.timestamp().is_some());
        assert_eq!(topic.version(), Some(TOPIC_VERSION));
    }

    #[test]
    fn should_parse_tagged_identifier_back() {
        let topic = EventTopic::tagged("device.update");
        let parsed = EventTopic::parse(&topic.id());
        assert_eq!(parsed, topic);
    }

    #[test]
    fn should_treat_untagged_identifier_as_bare_name() {
        let topic = EventTopic::parse("sensor");
        assert_eq!(topic.name(), "sensor");
        assert_eq!(topic.timestamp(), None);
        assert_eq!(topic.version(), None);
        assert_eq!(topic.id(), "sensor");
    }

    #[test]
    fn should_keep_name_when_second_to_last_segment_is_not_numeric() {
        let topic = EventTopic::parse("device.update.final");
        assert_eq!(topic.name(), "device.update.final");
        assert_eq!(topic.timestamp(), None);
    }

    #[test]
    fn should_roundtrip_event_through_frames() {
        let event = BusEvent::tagged("sensor.reading", json!({"value": 21.5, "unit": "C"}));
        let frames = event.to_frames().unwrap();
        assert_eq!(frames.len(), 2);
        let parsed = BusEvent::from_frames(&frames).unwrap();
        assert_eq!(parsed, event);
        assert_eq!(parsed.name(), "sensor.reading");
    }

    #[test]
    fn should_reject_wrong_event_frame_count() {
        let frames = vec![Bytes::from_static(b"topic.only")];
        let result = BusEvent::from_frames(&frames);
        assert!(matches!(result, Err(ProtocolError::Malformed { .. })));
    }

    #[test]
    fn should_reject_invalid_utf8_topic() {
        let frames = vec![Bytes::from_static(&[0xff]), Bytes::from_static(b"{}")];
        let result = BusEvent::from_frames(&frames);
        assert!(matches!(result, Err(ProtocolError::Malformed { .. })));
    }
}
