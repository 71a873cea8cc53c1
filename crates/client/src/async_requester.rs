//! Fire-and-continue requester delivering replies to a callback.

use std::sync::Arc;

use hubmq_protocol::message::BusMessage;
use hubmq_transport::DealerTransport;
use tokio::sync::mpsc;

use crate::error::ClientError;
use crate::requester::{decode_reply, encode_request};

/// Receives every reply that comes back on an [`AsyncRequester`]
/// connection.
#[async_trait::async_trait]
pub trait ReplyHandler: Send + Sync + 'static {
    async fn on_reply(&self, reply: BusMessage);
}

struct Outgoing {
    service: String,
    message: BusMessage,
}

/// Requester that never waits for replies.
///
/// A background task owns the socket; [`send`](Self::send) hands the
/// request over and returns immediately, and each reply is delivered to
/// the handler from that shared loop. Handles are cheap to clone and
/// feed the same connection.
#[derive(Clone)]
pub struct AsyncRequester {
    outgoing: mpsc::Sender<Outgoing>,
}

impl AsyncRequester {
    /// Connect to the broker's request endpoint and start the reply
    /// loop.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the endpoint is
    /// unreachable.
    pub async fn connect(
        broker_addr: &str,
        handler: Arc<dyn ReplyHandler>,
    ) -> Result<Self, ClientError> {
        let mut socket = DealerTransport::new();
        socket.connect(broker_addr).await?;
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run(socket, rx, handler));
        Ok(Self { outgoing: tx })
    }

    /// Queue one request; the reply, if any, reaches the handler later.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] when the background loop has shut
    /// down.
    pub async fn send(&self, service: &str, message: BusMessage) -> Result<(), ClientError> {
        self.outgoing
            .send(Outgoing {
                service: service.to_owned(),
                message,
            })
            .await
            .map_err(|_| ClientError::Closed)
    }
}

async fn run(
    mut socket: DealerTransport,
    mut outgoing: mpsc::Receiver<Outgoing>,
    handler: Arc<dyn ReplyHandler>,
) {
    loop {
        tokio::select! {
            request = outgoing.recv() => {
                let Some(request) = request else {
                    // Every handle is gone.
                    break;
                };
                let envelope = match encode_request(&request.service, &request.message) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        tracing::warn!(%err, service = %request.service, "request not encodable");
                        continue;
                    }
                };
                if let Err(err) = socket.send(envelope).await {
                    tracing::warn!(%err, service = %request.service, "request send failed");
                }
            }
            received = socket.recv() => {
                match received {
                    Ok(envelope) => match decode_reply(envelope) {
                        Ok(reply) => handler.on_reply(reply).await,
                        Err(err) => tracing::warn!(%err, "dropping stray frames"),
                    },
                    Err(err) => {
                        tracing::warn!(%err, "reply socket failed, stopping loop");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    struct Recorder {
        seen: Mutex<Vec<BusMessage>>,
    }

    #[async_trait::async_trait]
    impl ReplyHandler for Recorder {
        async fn on_reply(&self, reply: BusMessage) {
            self.seen.lock().unwrap().push(reply);
        }
    }

    #[tokio::test]
    async fn should_record_replies_through_the_handler_trait() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let handler: Arc<dyn ReplyHandler> = recorder.clone();
        handler
            .on_reply(BusMessage::with_data("ping.result", json!({"n": 1})).unwrap())
            .await;
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }
}
