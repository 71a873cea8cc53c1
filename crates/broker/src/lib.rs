//! # hubmq-broker
//!
//! Routing side of the hubmq messaging core.
//!
//! ## Responsibilities
//! - [`Broker`] matches requesters to workers by service name: LRU
//!   dispatch over idle workers, FIFO queueing behind busy ones,
//!   heartbeat-based eviction, and synthetic replies when a service
//!   cannot be reached
//! - [`registry`] holds the broker's bookkeeping as plain data with no
//!   socket in sight, so dispatch policy is tested with instant
//!   arithmetic
//! - [`EventForwarder`] fans published events out to subscribers
//!
//! ## Dependency rule
//! Depends on `hubmq-protocol` and `hubmq-transport`. Never on the
//! client crate; the broker only ever sees wire frames.

mod broker;
mod forwarder;
pub mod registry;

pub use broker::{Broker, BrokerOptions};
pub use forwarder::EventForwarder;
