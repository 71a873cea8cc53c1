//! Envelope — the ordered frame sequence making up one wire message.
//!
//! Frames are opaque to this layer. The only structure an envelope knows
//! about is the routing convention: leading non-empty frames are return
//! addresses, and an empty delimiter frame separates them from the body.
//! Frame order must be preserved exactly; reordering or dropping a frame
//! corrupts routing.

use bytes::Bytes;

use crate::error::ProtocolError;

/// One wire message: a non-empty ordered sequence of byte frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    frames: Vec<Bytes>,
}

impl Envelope {
    /// Build an envelope from raw frames.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::EmptyEnvelope`] when `frames` is empty.
    pub fn new(frames: Vec<Bytes>) -> Result<Self, ProtocolError> {
        if frames.is_empty() {
            return Err(ProtocolError::EmptyEnvelope);
        }
        Ok(Self { frames })
    }

    /// Borrow the frames in wire order.
    #[must_use]
    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    /// Consume the envelope, yielding the frames in wire order.
    #[must_use]
    pub fn into_frames(self) -> Vec<Bytes> {
        self.frames
    }

    /// Split the envelope into its routing chain and its body.
    ///
    /// The chain is the run of leading non-empty frames; the body is
    /// everything after the first empty delimiter frame. When no delimiter
    /// is present the whole envelope is treated as chain and the body is
    /// empty. This supports recovering stacked return addresses when a
    /// message has passed through several routing hops.
    #[must_use]
    pub fn split_routing(self) -> (Vec<Bytes>, Vec<Bytes>) {
        let mut frames = self.frames.into_iter();
        let mut chain = Vec::new();
        for frame in frames.by_ref() {
            if frame.is_empty() {
                return (chain, frames.collect());
            }
            chain.push(frame);
        }
        (chain, Vec::new())
    }

    /// Re-stack a routing chain in front of a body, inserting the empty
    /// delimiter frame between them.
    #[must_use]
    pub fn wrap_routing(chain: Vec<Bytes>, body: Vec<Bytes>) -> Self {
        let mut frames = chain;
        frames.push(Bytes::new());
        frames.extend(body);
        Self { frames }
    }
}
