//! # hubmq-transport
//!
//! Socket layer for the hubmq messaging core.
//!
//! ## Responsibilities
//! - Wrap the async socket types behind [`FramedSocket`], translating
//!   between wire-level multipart messages and [`Envelope`]s
//! - Resolve wildcard binds to their concrete endpoint so peers can be
//!   pointed at ephemeral ports
//! - Offer a bounded receive that reports an elapsed deadline as the
//!   absence of a message rather than as an error
//!
//! ## Dependency rule
//! This crate may depend on `hubmq-protocol` only. Anything
//! protocol-aware (commands, services, heartbeats) belongs to the
//! client and broker crates.

use std::time::Duration;

use hubmq_protocol::envelope::Envelope;
use hubmq_protocol::error::ProtocolError;
use zeromq::{
    DealerSocket, PubSocket, RouterSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage,
};

/// Failure while moving envelopes through a socket.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Socket(#[from] zeromq::ZmqError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// An async socket that speaks in [`Envelope`]s.
///
/// One wrapper per socket pattern; the aliases below name the four
/// patterns the messaging core uses.
pub struct FramedSocket<S> {
    inner: S,
}

/// Broker-side request socket; tags each received envelope with the
/// sender identity.
pub type RouterTransport = FramedSocket<RouterSocket>;
/// Client- and worker-side request socket.
pub type DealerTransport = FramedSocket<DealerSocket>;
/// Event fan-out socket.
pub type PubTransport = FramedSocket<PubSocket>;
/// Event intake socket with prefix filtering.
pub type SubTransport = FramedSocket<SubSocket>;

impl<S: Socket> FramedSocket<S> {
    #[must_use]
    pub fn new() -> Self {
        Self { inner: S::new() }
    }

    /// Bind to `endpoint` and return the resolved address.
    ///
    /// Binding to port zero picks an ephemeral port; the returned string
    /// is the address peers must connect to.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Socket`] when the endpoint cannot be
    /// bound.
    pub async fn bind(&mut self, endpoint: &str) -> Result<String, TransportError> {
        let resolved = self.inner.bind(endpoint).await?;
        Ok(resolved.to_string())
    }

    /// Connect to a bound peer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Socket`] when the connection cannot be
    /// established.
    pub async fn connect(&mut self, endpoint: &str) -> Result<(), TransportError> {
        self.inner.connect(endpoint).await?;
        Ok(())
    }
}

impl<S: Socket> Default for FramedSocket<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SocketSend> FramedSocket<S> {
    /// Send one envelope as a single multipart message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Socket`] when the peer connection has
    /// failed.
    pub async fn send(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        let mut frames = envelope.into_frames().into_iter();
        // An envelope always holds at least one frame.
        let Some(first) = frames.next() else {
            return Ok(());
        };
        let mut message = ZmqMessage::from(first);
        for frame in frames {
            message.push_back(frame);
        }
        self.inner.send(message).await?;
        Ok(())
    }
}

impl<S: SocketRecv> FramedSocket<S> {
    /// Receive the next multipart message as an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Socket`] when the socket has failed and
    /// [`TransportError::Protocol`] when the peer sent zero frames.
    pub async fn recv(&mut self) -> Result<Envelope, TransportError> {
        let message = self.inner.recv().await?;
        Ok(Envelope::new(message.into_vec())?)
    }

    /// Receive with an upper bound on the wait.
    ///
    /// Returns `Ok(None)` when `limit` passes without a message; callers
    /// use that as their tick signal.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`FramedSocket::recv`].
    pub async fn recv_timeout(
        &mut self,
        limit: Duration,
    ) -> Result<Option<Envelope>, TransportError> {
        match tokio::time::timeout(limit, self.inner.recv()).await {
            Ok(Ok(message)) => Ok(Some(Envelope::new(message.into_vec())?)),
            Ok(Err(source)) => Err(TransportError::Socket(source)),
            Err(_elapsed) => Ok(None),
        }
    }
}

impl FramedSocket<SubSocket> {
    /// Register a topic prefix subscription.
    ///
    /// The empty prefix matches every topic. Subscriptions registered
    /// before `connect` are replayed to peers as they attach.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Socket`] when the subscription cannot
    /// be recorded.
    pub async fn subscribe(&mut self, prefix: &str) -> Result<(), TransportError> {
        self.inner.subscribe(prefix).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[tokio::test]
    async fn should_carry_multipart_envelopes_from_dealer_to_router() {
        let mut router = RouterTransport::new();
        let endpoint = router.bind("tcp://127.0.0.1:0").await.unwrap();

        let mut dealer = DealerTransport::new();
        dealer.connect(&endpoint).await.unwrap();

        let sent = Envelope::new(vec![Bytes::new(), Bytes::from_static(b"ping")]).unwrap();
        dealer.send(sent).await.unwrap();

        let received = router.recv().await.unwrap();
        let frames = received.into_frames();
        // The router prepends the peer identity frame.
        assert_eq!(frames.len(), 3);
        assert!(frames[1].is_empty());
        assert_eq!(frames[2].as_ref(), b"ping");
    }

    #[tokio::test]
    async fn should_route_reply_back_through_identity_frame() {
        let mut router = RouterTransport::new();
        let endpoint = router.bind("tcp://127.0.0.1:0").await.unwrap();

        let mut dealer = DealerTransport::new();
        dealer.connect(&endpoint).await.unwrap();

        let request = Envelope::new(vec![Bytes::new(), Bytes::from_static(b"ask")]).unwrap();
        dealer.send(request).await.unwrap();

        let received = router.recv().await.unwrap();
        let (chain, _body) = received.split_routing();
        assert_eq!(chain.len(), 1);

        let reply = Envelope::wrap_routing(chain, vec![Bytes::from_static(b"answer")]);
        router.send(reply).await.unwrap();

        let answer = dealer.recv().await.unwrap();
        let frames = answer.into_frames();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_empty());
        assert_eq!(frames[1].as_ref(), b"answer");
    }

    #[tokio::test]
    async fn should_report_elapsed_deadline_as_absence() {
        let mut router = RouterTransport::new();
        router.bind("tcp://127.0.0.1:0").await.unwrap();

        let received = router
            .recv_timeout(Duration::from_millis(50))
            .await
            .unwrap();
        assert!(received.is_none());
    }
}
