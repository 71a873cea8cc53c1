//! Synchronous requester: one request, one bounded wait, one reply.

use std::time::{Duration, Instant};

use bytes::Bytes;
use hubmq_protocol::CLIENT_PROTOCOL;
use hubmq_protocol::envelope::Envelope;
use hubmq_protocol::error::ProtocolError;
use hubmq_protocol::message::BusMessage;
use hubmq_transport::DealerTransport;

use crate::error::ClientError;

/// Build the request envelope a requester sends to the broker.
pub(crate) fn encode_request(
    service: &str,
    message: &BusMessage,
) -> Result<Envelope, ClientError> {
    let mut frames = vec![
        Bytes::new(),
        Bytes::from_static(CLIENT_PROTOCOL),
        Bytes::copy_from_slice(service.as_bytes()),
    ];
    frames.extend(message.to_frames()?);
    Ok(Envelope::new(frames)?)
}

/// Decode a reply envelope as received by a requester socket.
pub(crate) fn decode_reply(envelope: Envelope) -> Result<BusMessage, ProtocolError> {
    let frames = envelope.into_frames();
    let [delimiter, marker, body @ ..] = frames.as_slice() else {
        return Err(ProtocolError::Malformed {
            reason: "reply too short",
        });
    };
    if !delimiter.is_empty() {
        return Err(ProtocolError::Malformed {
            reason: "missing empty delimiter frame",
        });
    }
    if marker.as_ref() != CLIENT_PROTOCOL {
        return Err(ProtocolError::Malformed {
            reason: "unexpected protocol marker",
        });
    }
    BusMessage::from_frames(body)
}

/// Blocking-style requester for callers that want exactly one reply.
///
/// The connection is reused across calls while exchanges complete in
/// time. After a timed-out exchange the socket is dropped and recreated
/// lazily, so a reply that arrives late dies with the old socket and is
/// never delivered to an unrelated later call.
pub struct SyncRequester {
    broker_addr: String,
    socket: Option<DealerTransport>,
}

impl SyncRequester {
    /// Connect to the broker's request endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the endpoint is
    /// unreachable.
    pub async fn connect(broker_addr: impl Into<String>) -> Result<Self, ClientError> {
        let broker_addr = broker_addr.into();
        let socket = Self::open(&broker_addr).await?;
        Ok(Self {
            broker_addr,
            socket: Some(socket),
        })
    }

    /// Send `message` to `service` and wait up to `timeout` for its
    /// reply.
    ///
    /// `Ok(None)` means the window elapsed without an answer; a service
    /// with no registered worker answers with a synthetic
    /// `status: false` reply instead, well before the window closes.
    /// Stray or malformed frames inside the window are logged and
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the socket fails; the
    /// next call reconnects.
    pub async fn request(
        &mut self,
        service: &str,
        message: &BusMessage,
        timeout: Duration,
    ) -> Result<Option<BusMessage>, ClientError> {
        let mut socket = match self.socket.take() {
            Some(socket) => socket,
            None => Self::open(&self.broker_addr).await?,
        };
        let outcome = Self::exchange(&mut socket, service, message, timeout).await;
        if matches!(outcome, Ok(Some(_))) {
            self.socket = Some(socket);
        }
        // On timeout or failure the socket is dropped; a late reply can
        // only reach a socket nobody reads anymore.
        outcome
    }

    async fn open(broker_addr: &str) -> Result<DealerTransport, ClientError> {
        let mut socket = DealerTransport::new();
        socket.connect(broker_addr).await?;
        Ok(socket)
    }

    async fn exchange(
        socket: &mut DealerTransport,
        service: &str,
        message: &BusMessage,
        timeout: Duration,
    ) -> Result<Option<BusMessage>, ClientError> {
        socket.send(encode_request(service, message)?).await?;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(envelope) = socket.recv_timeout(remaining).await? else {
                return Ok(None);
            };
            match decode_reply(envelope) {
                Ok(reply) => return Ok(Some(reply)),
                Err(err) => {
                    tracing::warn!(%err, service, "dropping stray frames");
                }
            }
        }
    }
}
