//! Worker protocol control commands.

use std::fmt;

use bytes::Bytes;

use crate::error::ProtocolError;

/// Control command carried as a single-byte frame on the worker protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCommand {
    /// Worker registers under a service name (service frame follows).
    Ready,
    /// Broker dispatches a request to a worker.
    Request,
    /// Worker returns a reply for a dispatched request.
    Reply,
    /// Liveness signal, sent in both directions.
    Heartbeat,
    /// Sender is going away; receiver drops all state for the peer.
    Disconnect,
}

impl WorkerCommand {
    /// Encode the command as its wire frame.
    #[must_use]
    pub fn as_frame(self) -> Bytes {
        match self {
            Self::Ready => Bytes::from_static(&[0x01]),
            Self::Request => Bytes::from_static(&[0x02]),
            Self::Reply => Bytes::from_static(&[0x03]),
            Self::Heartbeat => Bytes::from_static(&[0x04]),
            Self::Disconnect => Bytes::from_static(&[0x05]),
        }
    }

    /// Decode a command from its wire frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] when the frame is not exactly
    /// one byte, or [`ProtocolError::UnknownCommand`] for unassigned bytes.
    pub fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        let [byte] = frame else {
            return Err(ProtocolError::Malformed {
                reason: "command frame must be exactly one byte",
            });
        };
        match byte {
            0x01 => Ok(Self::Ready),
            0x02 => Ok(Self::Request),
            0x03 => Ok(Self::Reply),
            0x04 => Ok(Self::Heartbeat),
            0x05 => Ok(Self::Disconnect),
            other => Err(ProtocolError::UnknownCommand(*other)),
        }
    }
}

impl fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "READY",
            Self::Request => "REQUEST",
            Self::Reply => "REPLY",
            Self::Heartbeat => "HEARTBEAT",
            Self::Disconnect => "DISCONNECT",
        };
        f.write_str(name)
    }
}
