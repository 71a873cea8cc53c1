//! Socket-free bookkeeping of workers, services, and queued requests.
//!
//! Every operation that touches liveness takes `now` as a parameter, so
//! eviction behaviour is exercised in tests with plain instant
//! arithmetic instead of sleeps.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;

/// Opaque routing identity the transport assigned to a worker
/// connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId(Bytes);

impl WorkerId {
    #[must_use]
    pub fn new(identity: Bytes) -> Self {
        Self(identity)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    Busy,
}

struct WorkerRecord {
    service: String,
    state: WorkerState,
    expires_at: Instant,
}

/// A request parked at the broker until a worker frees up.
pub struct PendingRequest {
    /// Return-address chain captured when the request arrived.
    pub reply_to: Vec<Bytes>,
    /// Dotted action name, kept for synthetic replies.
    pub action: String,
    /// Raw body frames, forwarded to the worker verbatim.
    pub body: Vec<Bytes>,
    pub arrived_at: Instant,
}

#[derive(Default)]
struct ServiceRecord {
    /// Idle workers, least recently ready at the front.
    waiting: VecDeque<WorkerId>,
    /// Requests awaiting an idle worker, oldest at the front.
    pending: VecDeque<PendingRequest>,
}

/// What became of a worker announcing itself ready.
pub enum ReadyOutcome {
    /// Parked on the idle list.
    Parked,
    /// Handed the oldest queued request; the worker stays busy.
    Dispatch(PendingRequest),
    /// The identity is not registered.
    Unknown,
    /// A live identity re-registered under a different service; the
    /// record is purged.
    Duplicate { orphaned: Vec<PendingRequest> },
}

/// What became of an arriving request.
pub enum RequestOutcome {
    /// Forward to this worker now.
    Dispatch {
        worker: WorkerId,
        request: PendingRequest,
    },
    /// Parked in the service queue at this depth.
    Queued { depth: usize },
    /// No live worker is registered for the service.
    Unavailable(PendingRequest),
    /// The service queue is at capacity.
    Overloaded(PendingRequest),
}

/// Result of a liveness sweep.
#[derive(Default)]
pub struct Purge {
    /// Workers evicted for missing their heartbeat deadline.
    pub evicted: Vec<(WorkerId, String)>,
    /// Requests that were queued for a service left without workers.
    pub orphaned: Vec<PendingRequest>,
}

/// The broker's single-owner state: workers, services, queues.
///
/// Service records are created lazily on first registration or first
/// request and retained once empty, so a recovering service reuses its
/// queue.
pub struct Registry {
    liveness_window: Duration,
    max_pending: usize,
    workers: HashMap<WorkerId, WorkerRecord>,
    services: HashMap<String, ServiceRecord>,
}

impl Registry {
    #[must_use]
    pub fn new(liveness_window: Duration, max_pending: usize) -> Self {
        Self {
            liveness_window,
            max_pending,
            workers: HashMap::new(),
            services: HashMap::new(),
        }
    }

    /// Register a worker under `service`.
    ///
    /// A fresh READY from an identity already live under the same
    /// service is a plain BUSY→READY transition: the deadline is
    /// refreshed and the backlog is drained first. Re-registering under
    /// a different service yields [`ReadyOutcome::Duplicate`] and purges
    /// the record. Otherwise [`ReadyOutcome::Dispatch`] when the service
    /// has a backlog, [`ReadyOutcome::Parked`] when it does not.
    pub fn register(
        &mut self,
        id: WorkerId,
        service: impl Into<String>,
        now: Instant,
    ) -> ReadyOutcome {
        let service = service.into();
        if let Some(record) = self.workers.get(&id) {
            if record.service == service {
                return self.park_or_dispatch(&id, now);
            }
            let orphaned = match self.drop_worker(&id) {
                Some(record) => self.flush_deserted(&record.service),
                None => Vec::new(),
            };
            return ReadyOutcome::Duplicate { orphaned };
        }
        self.workers.insert(
            id.clone(),
            WorkerRecord {
                service,
                state: WorkerState::Busy,
                expires_at: now + self.liveness_window,
            },
        );
        self.park_or_dispatch(&id, now)
    }

    /// Refresh a worker's liveness deadline; `false` for unknown
    /// identities.
    pub fn heartbeat(&mut self, id: &WorkerId, now: Instant) -> bool {
        match self.workers.get_mut(id) {
            Some(record) => {
                record.expires_at = now + self.liveness_window;
                true
            }
            None => false,
        }
    }

    /// A busy worker finished its request (or re-announced itself).
    ///
    /// Yields [`ReadyOutcome::Dispatch`] when requests are queued,
    /// [`ReadyOutcome::Parked`] otherwise, [`ReadyOutcome::Unknown`] for
    /// unregistered identities.
    pub fn worker_ready(&mut self, id: &WorkerId, now: Instant) -> ReadyOutcome {
        self.park_or_dispatch(id, now)
    }

    /// Remove a worker on its explicit farewell.
    ///
    /// Returns the requests orphaned when the last worker of a service
    /// leaves.
    pub fn disconnect(&mut self, id: &WorkerId) -> Vec<PendingRequest> {
        match self.drop_worker(id) {
            Some(record) => self.flush_deserted(&record.service),
            None => Vec::new(),
        }
    }

    /// Route an arriving request: dispatch to the least recently ready
    /// idle worker, queue behind busy ones, or bounce it.
    pub fn accept_request(&mut self, name: &str, request: PendingRequest) -> RequestOutcome {
        let live = self.live_workers(name);
        let service = self.services.entry(name.to_owned()).or_default();
        if let Some(worker) = service.waiting.pop_front() {
            if let Some(record) = self.workers.get_mut(&worker) {
                record.state = WorkerState::Busy;
            }
            return RequestOutcome::Dispatch { worker, request };
        }
        if live == 0 {
            return RequestOutcome::Unavailable(request);
        }
        if service.pending.len() >= self.max_pending {
            return RequestOutcome::Overloaded(request);
        }
        service.pending.push_back(request);
        RequestOutcome::Queued {
            depth: service.pending.len(),
        }
    }

    /// Evict every worker past its liveness deadline and flush queues of
    /// services left without workers.
    pub fn purge_expired(&mut self, now: Instant) -> Purge {
        let expired: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|(_, record)| record.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        let mut purge = Purge::default();
        for id in expired {
            if let Some(record) = self.drop_worker(&id) {
                purge.evicted.push((id, record.service));
            }
        }
        let deserted: Vec<String> = purge
            .evicted
            .iter()
            .map(|(_, service)| service.clone())
            .collect();
        for service in deserted {
            purge.orphaned.extend(self.flush_deserted(&service));
        }
        purge
    }

    /// Live workers (idle or busy) registered under `service`.
    #[must_use]
    pub fn live_workers(&self, service: &str) -> usize {
        self.workers
            .values()
            .filter(|record| record.service == service)
            .count()
    }

    /// Identities of every live worker, for the heartbeat fan-out.
    #[must_use]
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.keys().cloned().collect()
    }

    fn park_or_dispatch(&mut self, id: &WorkerId, now: Instant) -> ReadyOutcome {
        let Some(record) = self.workers.get_mut(id) else {
            return ReadyOutcome::Unknown;
        };
        record.expires_at = now + self.liveness_window;
        let service = self.services.entry(record.service.clone()).or_default();
        if let Some(request) = service.pending.pop_front() {
            record.state = WorkerState::Busy;
            ReadyOutcome::Dispatch(request)
        } else {
            // An idle worker is already on the waiting list.
            if record.state != WorkerState::Idle {
                service.waiting.push_back(id.clone());
            }
            record.state = WorkerState::Idle;
            ReadyOutcome::Parked
        }
    }

    fn drop_worker(&mut self, id: &WorkerId) -> Option<WorkerRecord> {
        let record = self.workers.remove(id)?;
        if let Some(service) = self.services.get_mut(&record.service) {
            service.waiting.retain(|waiting| waiting != id);
        }
        Some(record)
    }

    fn flush_deserted(&mut self, service: &str) -> Vec<PendingRequest> {
        if self.live_workers(service) > 0 {
            return Vec::new();
        }
        match self.services.get_mut(service) {
            Some(record) => record.pending.drain(..).collect(),
            None => Vec::new(),
        }
    }
}
