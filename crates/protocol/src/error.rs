//! Typed errors for wire-level parsing and construction.

/// Errors produced while building or decoding wire messages.
///
/// A malformed message is never fatal to a peer: callers log the error and
/// drop the offending frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// An envelope must carry at least one frame.
    #[error("envelope must contain at least one frame")]
    EmptyEnvelope,
    /// Frame count or content does not match the expected shape.
    #[error("malformed message: {reason}")]
    Malformed {
        /// What the decoder expected and did not find.
        reason: &'static str,
    },
    /// A worker command frame carried an unknown byte.
    #[error("unknown worker command byte {0:#04x}")]
    UnknownCommand(u8),
    /// Application payloads must be JSON objects.
    #[error("message data must be a JSON object")]
    NonObjectData,
    /// Payload frame is not valid JSON.
    #[error("payload is not valid JSON")]
    Json(#[from] serde_json::Error),
}
