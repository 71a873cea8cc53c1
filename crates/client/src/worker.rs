//! Worker-side client: service registration, request intake, replies.

use std::time::{Duration, Instant};

use bytes::Bytes;
use hubmq_protocol::command::WorkerCommand;
use hubmq_protocol::envelope::Envelope;
use hubmq_protocol::error::ProtocolError;
use hubmq_protocol::message::BusMessage;
use hubmq_protocol::{REPLY_SUFFIX, WORKER_PROTOCOL};
use hubmq_transport::{DealerTransport, TransportError};
use serde_json::Value;

use crate::error::ClientError;

/// Liveness tuning for a worker connection.
///
/// The broker evicts a worker after `heartbeat_interval * liveness` of
/// silence; the worker applies the same window to the broker and
/// re-registers when it elapses.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub heartbeat_interval: Duration,
    pub liveness: u32,
    /// Pause before a reconnect attempt once the broker goes silent.
    pub reconnect_delay: Duration,
}

impl WorkerOptions {
    /// Silence tolerated before the peer is considered gone.
    #[must_use]
    pub fn liveness_window(&self) -> Duration {
        self.heartbeat_interval * self.liveness
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(2500),
            liveness: 3,
            reconnect_delay: Duration::from_millis(2500),
        }
    }
}

struct PendingReply {
    reply_to: Vec<Bytes>,
    action: String,
}

enum Incoming {
    Request {
        reply_to: Vec<Bytes>,
        message: BusMessage,
    },
    Heartbeat,
    Disconnect,
}

/// Connection a service implementation holds to the broker.
///
/// The client registers under a service name, then alternates between
/// [`receive_request`](Self::receive_request) and
/// [`send_reply`](Self::send_reply). Heartbeating and re-registration
/// after broker loss happen inside the receive loop; callers only need
/// to keep polling.
pub struct WorkerClient {
    socket: DealerTransport,
    broker_addr: String,
    service: String,
    options: WorkerOptions,
    heartbeat_at: Instant,
    broker_deadline: Instant,
    pending: Option<PendingReply>,
}

impl WorkerClient {
    /// Connect to the broker and register `service`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the broker endpoint is
    /// unreachable.
    pub async fn connect(
        broker_addr: impl Into<String>,
        service: impl Into<String>,
        options: WorkerOptions,
    ) -> Result<Self, ClientError> {
        let now = Instant::now();
        let mut client = Self {
            socket: DealerTransport::new(),
            broker_addr: broker_addr.into(),
            service: service.into(),
            options,
            heartbeat_at: now,
            broker_deadline: now,
            pending: None,
        };
        client.attach().await?;
        Ok(client)
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Wait for the next dispatched request.
    ///
    /// With `wait = None` this blocks until a request arrives, surviving
    /// broker restarts by re-registering. With a bound it returns
    /// `Ok(None)` once the bound elapses; `Some(Duration::ZERO)` polls
    /// exactly once. Heartbeats are exchanged transparently in between.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] only for failures of the local
    /// socket; broker silence is handled by reconnecting, not reported.
    pub async fn receive_request(
        &mut self,
        wait: Option<Duration>,
    ) -> Result<Option<BusMessage>, ClientError> {
        let give_up = wait.map(|limit| Instant::now() + limit);
        loop {
            let now = Instant::now();
            if now >= self.broker_deadline {
                self.reattach(give_up).await;
                if gave_up(give_up) {
                    return Ok(None);
                }
                continue;
            }
            if now >= self.heartbeat_at {
                if let Err(err) = self.send_command(WorkerCommand::Heartbeat, Vec::new()).await {
                    tracing::warn!(%err, service = %self.service, "heartbeat send failed");
                    self.broker_deadline = now;
                    continue;
                }
                self.heartbeat_at = now + self.options.heartbeat_interval;
            }

            let mut slice = self
                .heartbeat_at
                .min(self.broker_deadline)
                .saturating_duration_since(now);
            if let Some(until) = give_up {
                slice = slice.min(until.saturating_duration_since(now));
            }

            match self.socket.recv_timeout(slice).await {
                Ok(Some(envelope)) => {
                    if let Some(message) = self.accept(envelope).await {
                        return Ok(Some(message));
                    }
                }
                Ok(None) => {
                    if gave_up(give_up) {
                        return Ok(None);
                    }
                }
                Err(TransportError::Protocol(err)) => {
                    tracing::warn!(%err, "dropping malformed frames");
                }
                Err(err) => {
                    tracing::warn!(%err, service = %self.service, "broker socket failed");
                    self.broker_deadline = now;
                }
            }
        }
    }

    /// Reply to the most recently received request.
    ///
    /// The reply action is the request action with the result suffix
    /// appended; `data` must be a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoRequest`] when no request is awaiting a
    /// reply, [`ClientError::Protocol`] when `data` is not an object,
    /// and [`ClientError::Transport`] when the send fails.
    pub async fn send_reply(&mut self, data: Value) -> Result<(), ClientError> {
        let pending = self.pending.take().ok_or(ClientError::NoRequest)?;
        let body = match encode_reply(&pending.action, data) {
            Ok(body) => body,
            Err(err) => {
                // The request stays answerable after a rejected payload.
                self.pending = Some(pending);
                return Err(err);
            }
        };
        let mut frames = vec![
            Bytes::new(),
            Bytes::from_static(WORKER_PROTOCOL),
            WorkerCommand::Reply.as_frame(),
        ];
        frames.extend(Envelope::wrap_routing(pending.reply_to, body).into_frames());
        self.socket.send(Envelope::new(frames)?).await?;
        Ok(())
    }

    /// Deregister from the broker and drop the connection.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the farewell cannot be
    /// sent; the connection is dropped either way.
    pub async fn disconnect(mut self) -> Result<(), ClientError> {
        self.send_command(WorkerCommand::Disconnect, Vec::new())
            .await
    }

    /// Open a fresh connection and announce the service.
    async fn attach(&mut self) -> Result<(), ClientError> {
        let mut socket = DealerTransport::new();
        socket.connect(&self.broker_addr).await?;
        self.socket = socket;
        self.pending = None;
        self.send_command(
            WorkerCommand::Ready,
            vec![Bytes::copy_from_slice(self.service.as_bytes())],
        )
        .await?;
        let now = Instant::now();
        self.heartbeat_at = now + self.options.heartbeat_interval;
        self.broker_deadline = now + self.options.liveness_window();
        Ok(())
    }

    /// Reconnect after broker silence, pausing first so a flapping
    /// broker is not hammered. The pause never overshoots the caller's
    /// receive bound.
    async fn reattach(&mut self, give_up: Option<Instant>) {
        tracing::warn!(service = %self.service, "broker silent, re-registering");
        let mut pause = self.options.reconnect_delay;
        if let Some(until) = give_up {
            pause = pause.min(until.saturating_duration_since(Instant::now()));
        }
        tokio::time::sleep(pause).await;
        if let Err(err) = self.attach().await {
            tracing::warn!(%err, service = %self.service, "re-register failed, will retry");
        }
    }

    async fn send_command(
        &mut self,
        command: WorkerCommand,
        extra: Vec<Bytes>,
    ) -> Result<(), ClientError> {
        let mut frames = vec![
            Bytes::new(),
            Bytes::from_static(WORKER_PROTOCOL),
            command.as_frame(),
        ];
        frames.extend(extra);
        self.socket.send(Envelope::new(frames)?).await?;
        Ok(())
    }

    /// Handle one envelope from the broker; yields the message only for
    /// a dispatched request.
    async fn accept(&mut self, envelope: Envelope) -> Option<BusMessage> {
        match classify(envelope) {
            Ok(Incoming::Request { reply_to, message }) => {
                self.broker_deadline = Instant::now() + self.options.liveness_window();
                self.pending = Some(PendingReply {
                    reply_to,
                    action: message.action().to_owned(),
                });
                Some(message)
            }
            Ok(Incoming::Heartbeat) => {
                self.broker_deadline = Instant::now() + self.options.liveness_window();
                None
            }
            Ok(Incoming::Disconnect) => {
                tracing::info!(service = %self.service, "broker asked for a reconnect");
                if let Err(err) = self.attach().await {
                    tracing::warn!(%err, service = %self.service, "re-register failed, will retry");
                }
                None
            }
            Err(err) => {
                tracing::warn!(%err, "dropping malformed frames");
                None
            }
        }
    }
}

fn gave_up(give_up: Option<Instant>) -> bool {
    give_up.is_some_and(|until| Instant::now() >= until)
}

fn encode_reply(action: &str, data: Value) -> Result<Vec<Bytes>, ClientError> {
    let reply = BusMessage::with_data(format!("{action}{REPLY_SUFFIX}"), data)?;
    Ok(reply.to_frames()?)
}

fn classify(envelope: Envelope) -> Result<Incoming, ProtocolError> {
    let frames = envelope.into_frames();
    let [delimiter, marker, command, rest @ ..] = frames.as_slice() else {
        return Err(ProtocolError::Malformed {
            reason: "broker message too short",
        });
    };
    if !delimiter.is_empty() {
        return Err(ProtocolError::Malformed {
            reason: "missing empty delimiter frame",
        });
    }
    if marker.as_ref() != WORKER_PROTOCOL {
        return Err(ProtocolError::Malformed {
            reason: "unexpected protocol marker",
        });
    }
    match WorkerCommand::from_frame(command)? {
        WorkerCommand::Heartbeat => Ok(Incoming::Heartbeat),
        WorkerCommand::Disconnect => Ok(Incoming::Disconnect),
        WorkerCommand::Request => {
            let (reply_to, body) = Envelope::new(rest.to_vec())?.split_routing();
            let message = BusMessage::from_frames(&body)?;
            Ok(Incoming::Request { reply_to, message })
        }
        WorkerCommand::Ready | WorkerCommand::Reply => Err(ProtocolError::Malformed {
            reason: "unexpected command from broker",
        }),
    }
}
