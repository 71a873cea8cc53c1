//! The request broker: one ROUTER endpoint, one dispatch loop.

use std::time::{Duration, Instant};

use bytes::Bytes;
use hubmq_protocol::command::WorkerCommand;
use hubmq_protocol::envelope::Envelope;
use hubmq_protocol::message::BusMessage;
use hubmq_protocol::{CLIENT_PROTOCOL, REPLY_SUFFIX, WORKER_PROTOCOL};
use hubmq_transport::{RouterTransport, TransportError};

use crate::registry::{PendingRequest, ReadyOutcome, Registry, RequestOutcome, WorkerId};

/// Liveness and queue tuning for the broker.
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    /// Cadence of the housekeeping tick and of broker heartbeats.
    pub heartbeat_interval: Duration,
    /// Missed intervals tolerated before a worker is evicted.
    pub liveness: u32,
    /// Per-service cap on queued requests.
    pub max_pending: usize,
}

impl BrokerOptions {
    #[must_use]
    pub fn liveness_window(&self) -> Duration {
        self.heartbeat_interval * self.liveness
    }
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(2500),
            liveness: 3,
            max_pending: 1024,
        }
    }
}

/// Routes requests from requesters to registered workers and replies
/// back, using return-address chains captured at arrival.
///
/// The broker owns all of its state from a single task; peers only ever
/// see synthetic replies or control commands, never an error from an
/// unrelated exchange.
pub struct Broker {
    socket: RouterTransport,
    registry: Registry,
    options: BrokerOptions,
    endpoint: String,
    next_tick: Instant,
}

impl Broker {
    /// Bind the request endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Socket`] when the address cannot be
    /// bound.
    pub async fn bind(addr: &str, options: BrokerOptions) -> Result<Self, TransportError> {
        let mut socket = RouterTransport::new();
        let endpoint = socket.bind(addr).await?;
        tracing::info!(endpoint = %endpoint, "broker listening");
        let registry = Registry::new(options.liveness_window(), options.max_pending);
        let next_tick = Instant::now() + options.heartbeat_interval;
        Ok(Self {
            socket,
            registry,
            options,
            endpoint,
            next_tick,
        })
    }

    /// Resolved request endpoint, usable by peers as-is.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Drive the dispatch loop until the socket fails.
    ///
    /// Malformed traffic is logged and dropped; only a failure of the
    /// broker's own socket ends the loop.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Socket`] when the ROUTER socket fails.
    pub async fn run(mut self) -> Result<(), TransportError> {
        loop {
            let now = Instant::now();
            if now >= self.next_tick {
                self.tick(now).await;
                self.next_tick = now + self.options.heartbeat_interval;
            }
            let wait = self.next_tick.saturating_duration_since(Instant::now());
            match self.socket.recv_timeout(wait).await {
                Ok(Some(envelope)) => self.dispatch(envelope, Instant::now()).await,
                Ok(None) => {}
                Err(TransportError::Protocol(err)) => {
                    tracing::warn!(%err, "dropping malformed frames");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Purge silent workers, bounce their orphaned queues, and
    /// heartbeat the survivors.
    async fn tick(&mut self, now: Instant) {
        let purge = self.registry.purge_expired(now);
        for (id, service) in &purge.evicted {
            tracing::info!(worker = %id, service = %service, "worker evicted after missed heartbeats");
        }
        for request in purge.orphaned {
            self.refuse(request, "service unavailable").await;
        }
        for id in self.registry.worker_ids() {
            self.send_worker_command(&id, WorkerCommand::Heartbeat)
                .await;
        }
    }

    async fn dispatch(&mut self, envelope: Envelope, now: Instant) {
        let (chain, body) = envelope.split_routing();
        let [peer] = chain.as_slice() else {
            tracing::warn!("dropping frames without a single peer identity");
            return;
        };
        let peer = peer.clone();
        let [marker, rest @ ..] = body.as_slice() else {
            tracing::warn!(peer = %hex::encode(&peer), "dropping frames without a protocol marker");
            return;
        };
        if marker.as_ref() == CLIENT_PROTOCOL {
            self.client_request(peer, rest, now).await;
        } else if marker.as_ref() == WORKER_PROTOCOL {
            self.worker_message(peer, rest, now).await;
        } else {
            tracing::warn!(peer = %hex::encode(&peer), "dropping unknown protocol marker");
        }
    }

    async fn client_request(&mut self, peer: Bytes, rest: &[Bytes], now: Instant) {
        let [service, body @ ..] = rest else {
            tracing::warn!(peer = %hex::encode(&peer), "dropping request without a service frame");
            return;
        };
        let Ok(service) = std::str::from_utf8(service) else {
            tracing::warn!(peer = %hex::encode(&peer), "dropping request with non-UTF-8 service");
            return;
        };
        let message = match BusMessage::from_frames(body) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(%err, service = %service, "dropping malformed request body");
                return;
            }
        };
        let request = PendingRequest {
            reply_to: vec![peer],
            action: message.action().to_owned(),
            body: body.to_vec(),
            arrived_at: now,
        };
        match self.registry.accept_request(service, request) {
            RequestOutcome::Dispatch { worker, request } => {
                tracing::debug!(service = %service, worker = %worker, action = %request.action, "request dispatched");
                self.forward_request(&worker, request).await;
            }
            RequestOutcome::Queued { depth } => {
                tracing::debug!(service = %service, depth, "request queued, all workers busy");
            }
            RequestOutcome::Unavailable(request) => {
                tracing::debug!(service = %service, action = %request.action, "no worker registered, refusing");
                self.refuse(request, "service unavailable").await;
            }
            RequestOutcome::Overloaded(request) => {
                tracing::warn!(service = %service, "pending queue full, refusing");
                self.refuse(request, "service overloaded").await;
            }
        }
    }

    async fn worker_message(&mut self, peer: Bytes, rest: &[Bytes], now: Instant) {
        let id = WorkerId::new(peer);
        let [command, rest @ ..] = rest else {
            tracing::warn!(worker = %id, "dropping worker frames without a command");
            return;
        };
        let command = match WorkerCommand::from_frame(command) {
            Ok(command) => command,
            Err(err) => {
                tracing::warn!(%err, worker = %id, "dropping unrecognized worker command");
                return;
            }
        };
        match command {
            WorkerCommand::Ready => self.worker_register(id, rest, now).await,
            WorkerCommand::Reply => self.worker_reply(id, rest, now).await,
            WorkerCommand::Heartbeat => {
                if !self.registry.heartbeat(&id, now) {
                    tracing::debug!(worker = %id, "heartbeat from unknown worker, disconnecting");
                    self.send_worker_command(&id, WorkerCommand::Disconnect)
                        .await;
                }
            }
            WorkerCommand::Disconnect => {
                tracing::info!(worker = %id, "worker deregistered");
                let orphaned = self.registry.disconnect(&id);
                for request in orphaned {
                    self.refuse(request, "service unavailable").await;
                }
            }
            WorkerCommand::Request => {
                tracing::warn!(worker = %id, "unexpected command from worker");
            }
        }
    }

    async fn worker_register(&mut self, id: WorkerId, rest: &[Bytes], now: Instant) {
        let [service] = rest else {
            tracing::warn!(worker = %id, "dropping registration without a service frame");
            return;
        };
        let Ok(service) = std::str::from_utf8(service) else {
            tracing::warn!(worker = %id, "dropping registration with non-UTF-8 service");
            return;
        };
        match self.registry.register(id.clone(), service, now) {
            ReadyOutcome::Parked => {
                tracing::info!(worker = %id, service = %service, "worker registered");
            }
            ReadyOutcome::Dispatch(request) => {
                tracing::info!(worker = %id, service = %service, "worker registered, draining backlog");
                self.forward_request(&id, request).await;
            }
            ReadyOutcome::Duplicate { orphaned } => {
                tracing::warn!(worker = %id, service = %service, "re-registration under a new service, disconnecting");
                self.send_worker_command(&id, WorkerCommand::Disconnect)
                    .await;
                for request in orphaned {
                    self.refuse(request, "service unavailable").await;
                }
            }
            // Registration never reports an unknown identity.
            ReadyOutcome::Unknown => {}
        }
    }

    async fn worker_reply(&mut self, id: WorkerId, rest: &[Bytes], now: Instant) {
        let Ok(envelope) = Envelope::new(rest.to_vec()) else {
            tracing::warn!(worker = %id, "dropping empty reply");
            return;
        };
        let (chain, body) = envelope.split_routing();
        if chain.is_empty() {
            tracing::warn!(worker = %id, "dropping reply without a return chain");
            return;
        }
        match self.registry.worker_ready(&id, now) {
            ReadyOutcome::Unknown => {
                tracing::warn!(worker = %id, "reply from unregistered worker, disconnecting");
                self.send_worker_command(&id, WorkerCommand::Disconnect)
                    .await;
            }
            outcome => {
                let mut payload = vec![Bytes::from_static(CLIENT_PROTOCOL)];
                payload.extend(body);
                let frames = Envelope::wrap_routing(chain, payload).into_frames();
                self.transmit(frames, "reply forward").await;
                if let ReadyOutcome::Dispatch(request) = outcome {
                    tracing::debug!(
                        worker = %id,
                        waited = ?request.arrived_at.elapsed(),
                        "handing queued request to freed worker"
                    );
                    self.forward_request(&id, request).await;
                }
            }
        }
    }

    async fn forward_request(&mut self, worker: &WorkerId, request: PendingRequest) {
        let mut frames = vec![
            worker.as_bytes().clone(),
            Bytes::new(),
            Bytes::from_static(WORKER_PROTOCOL),
            WorkerCommand::Request.as_frame(),
        ];
        frames.extend(Envelope::wrap_routing(request.reply_to, request.body).into_frames());
        self.transmit(frames, "request forward").await;
    }

    /// Answer a request the broker cannot place with a synthetic
    /// `status: false` reply.
    async fn refuse(&mut self, request: PendingRequest, reason: &str) {
        let reply = BusMessage::failure(format!("{}{REPLY_SUFFIX}", request.action), reason);
        let body = match reply.to_frames() {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(%err, "synthetic reply not encodable");
                return;
            }
        };
        let mut payload = vec![Bytes::from_static(CLIENT_PROTOCOL)];
        payload.extend(body);
        let frames = Envelope::wrap_routing(request.reply_to, payload).into_frames();
        self.transmit(frames, "synthetic reply").await;
    }

    async fn send_worker_command(&mut self, id: &WorkerId, command: WorkerCommand) {
        let frames = vec![
            id.as_bytes().clone(),
            Bytes::new(),
            Bytes::from_static(WORKER_PROTOCOL),
            command.as_frame(),
        ];
        self.transmit(frames, "worker control").await;
    }

    /// Send to one peer; a failed peer send never ends the loop.
    async fn transmit(&mut self, frames: Vec<Bytes>, context: &'static str) {
        match Envelope::new(frames) {
            Ok(envelope) => {
                if let Err(err) = self.socket.send(envelope).await {
                    tracing::warn!(%err, context, "broker send failed");
                }
            }
            Err(err) => tracing::warn!(%err, context, "broker send skipped"),
        }
    }
}
