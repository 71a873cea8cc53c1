use hubmq_protocol::error::ProtocolError;
use hubmq_transport::TransportError;

/// Failure raised by the participant-side clients.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// `send_reply` was called with no request awaiting a reply.
    #[error("no received request is awaiting a reply")]
    NoRequest,
    /// The background requester loop has shut down.
    #[error("requester loop is no longer running")]
    Closed,
}
