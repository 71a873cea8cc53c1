//! # hubmq-client
//!
//! Participant-side APIs for the hubmq messaging core.
//!
//! ## Responsibilities
//! - [`WorkerClient`] registers a service implementation with the broker,
//!   keeps it alive with heartbeats, and carries requests and replies
//! - [`SyncRequester`] sends a request to a named service and waits,
//!   bounded by a caller deadline, for the matching reply
//! - [`AsyncRequester`] fires requests without waiting and hands every
//!   reply to a registered [`ReplyHandler`]
//! - [`EventPublisher`] and [`EventSubscriber`] speak to the event
//!   forwarder
//!
//! ## Dependency rule
//! Depends on `hubmq-protocol` and `hubmq-transport`. Never on the
//! broker crate; clients know the wire protocol, not the router.

mod async_requester;
mod error;
mod events;
mod requester;
mod worker;

pub use async_requester::{AsyncRequester, ReplyHandler};
pub use error::ClientError;
pub use events::{EventPublisher, EventSubscriber};
pub use requester::SyncRequester;
pub use worker::{WorkerClient, WorkerOptions};
