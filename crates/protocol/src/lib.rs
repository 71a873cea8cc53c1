//! # hubmq-protocol
//!
//! Wire-level message model for the hubmq messaging core.
//!
//! ## Responsibilities
//! - Define the [`Envelope`](envelope::Envelope) — an ordered sequence of
//!   opaque byte frames with routing helpers
//! - Define the [`BusMessage`](message::BusMessage) — the application view
//!   of a request/reply payload (`action` + JSON object data)
//! - Define the [`WorkerCommand`](command::WorkerCommand) control bytes
//!   spoken between workers and the broker
//! - Define [`EventTopic`](event::EventTopic) and
//!   [`BusEvent`](event::BusEvent) for the publish/subscribe side
//!
//! ## Dependency rule
//! This crate has **no internal dependencies** and performs no IO.
//! It must never import the transport, client, or broker crates.

pub mod command;
pub mod envelope;
pub mod error;
pub mod event;
pub mod message;

/// Protocol marker sent as the first payload frame by requesters.
///
/// The trailing `01` is the protocol revision; the broker drops frames
/// carrying any other marker.
pub const CLIENT_PROTOCOL: &[u8] = b"HMQC01";

/// Protocol marker sent as the first payload frame by workers.
pub const WORKER_PROTOCOL: &[u8] = b"HMQW01";

/// Suffix appended to a request action to form the reply action.
pub const REPLY_SUFFIX: &str = ".result";
