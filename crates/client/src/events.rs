//! Publish/subscribe clients for the event forwarder.

use std::time::{Duration, Instant};

use hubmq_protocol::envelope::Envelope;
use hubmq_protocol::event::BusEvent;
use hubmq_transport::{PubTransport, SubTransport};
use serde_json::Value;

use crate::error::ClientError;

/// Publishes events to the forwarder's intake endpoint.
///
/// Publication never waits for subscriber availability; an event with
/// no matching subscriber vanishes.
pub struct EventPublisher {
    socket: PubTransport,
}

impl EventPublisher {
    /// Connect to the forwarder's publisher-facing endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the endpoint is
    /// unreachable.
    pub async fn connect(pub_addr: &str) -> Result<Self, ClientError> {
        let mut socket = PubTransport::new();
        socket.connect(pub_addr).await?;
        Ok(Self { socket })
    }

    /// Publish `data` under `name`, tagging the topic with the current
    /// time.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the send fails.
    pub async fn publish(&mut self, name: &str, data: Value) -> Result<(), ClientError> {
        let event = BusEvent::tagged(name, data);
        self.socket.send(Envelope::new(event.to_frames()?)?).await?;
        Ok(())
    }
}

/// Receives events matching a set of topic prefixes.
pub struct EventSubscriber {
    socket: SubTransport,
}

impl EventSubscriber {
    /// Connect to the forwarder's subscriber-facing endpoint.
    ///
    /// Each prefix in `prefixes` is a dotted topic filter; an empty set
    /// subscribes to every event. Filters are registered before the
    /// connection is made so the forwarder applies them from the first
    /// event on.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the endpoint is
    /// unreachable.
    pub async fn connect(sub_addr: &str, prefixes: &[&str]) -> Result<Self, ClientError> {
        let mut socket = SubTransport::new();
        if prefixes.is_empty() {
            socket.subscribe("").await?;
        }
        for prefix in prefixes {
            socket.subscribe(prefix).await?;
        }
        socket.connect(sub_addr).await?;
        Ok(Self { socket })
    }

    /// Wait for the next matching event.
    ///
    /// Malformed events are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the socket fails.
    pub async fn recv(&mut self) -> Result<BusEvent, ClientError> {
        loop {
            let envelope = self.socket.recv().await?;
            match BusEvent::from_frames(envelope.frames()) {
                Ok(event) => return Ok(event),
                Err(err) => tracing::warn!(%err, "dropping malformed event"),
            }
        }
    }

    /// Wait up to `limit` for the next matching event; `Ok(None)` when
    /// none arrives in time.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the socket fails.
    pub async fn recv_timeout(&mut self, limit: Duration) -> Result<Option<BusEvent>, ClientError> {
        let deadline = Instant::now() + limit;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(envelope) = self.socket.recv_timeout(remaining).await? else {
                return Ok(None);
            };
            match BusEvent::from_frames(envelope.frames()) {
                Ok(event) => return Ok(Some(event)),
                Err(err) => tracing::warn!(%err, "dropping malformed event"),
            }
        }
    }
}
