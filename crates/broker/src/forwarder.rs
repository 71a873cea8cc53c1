//! Stateless fan-out between the event intake and the subscriber side.

use hubmq_transport::{PubTransport, SubTransport, TransportError};

/// Rebroadcasts every published event verbatim.
///
/// Publication and delivery stay decoupled: the forwarder never
/// acknowledges, never buffers beyond the sockets, and never filters.
/// Topic filtering happens on the subscriber sockets.
pub struct EventForwarder {
    intake: SubTransport,
    fanout: PubTransport,
    in_endpoint: String,
    out_endpoint: String,
}

impl EventForwarder {
    /// Bind the publisher-facing intake and the subscriber-facing
    /// fan-out endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Socket`] when either address cannot be
    /// bound.
    pub async fn bind(in_addr: &str, out_addr: &str) -> Result<Self, TransportError> {
        let mut intake = SubTransport::new();
        // The intake side takes every topic; filtering is the
        // subscribers' business.
        intake.subscribe("").await?;
        let in_endpoint = intake.bind(in_addr).await?;

        let mut fanout = PubTransport::new();
        let out_endpoint = fanout.bind(out_addr).await?;

        tracing::info!(intake = %in_endpoint, fanout = %out_endpoint, "event forwarder listening");
        Ok(Self {
            intake,
            fanout,
            in_endpoint,
            out_endpoint,
        })
    }

    /// Resolved publisher-facing endpoint.
    #[must_use]
    pub fn in_endpoint(&self) -> &str {
        &self.in_endpoint
    }

    /// Resolved subscriber-facing endpoint.
    #[must_use]
    pub fn out_endpoint(&self) -> &str {
        &self.out_endpoint
    }

    /// Pump events until a socket fails.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Socket`] when the intake socket fails.
    pub async fn run(mut self) -> Result<(), TransportError> {
        loop {
            match self.intake.recv().await {
                Ok(envelope) => {
                    if let Err(err) = self.fanout.send(envelope).await {
                        tracing::warn!(%err, "fan-out send failed");
                    }
                }
                Err(TransportError::Protocol(err)) => {
                    tracing::warn!(%err, "dropping frameless event");
                }
                Err(err) => return Err(err),
            }
        }
    }
}
