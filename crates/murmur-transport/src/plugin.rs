//! Capability interfaces implemented by transport plugins.
//!
//! Plugins supply raw byte streams and nothing else. Everything above
//! (tagging, framing, encryption, sync records) is built on these traits, so
//! drivers never know which transport they run over.

use std::{
    io::{Read, Write},
    time::Duration,
};

use crate::{
    context::{ContactId, TransportId},
    error::TransportError,
};

/// Outgoing half of one simplex connection.
pub trait TransportConnectionWriter: Send {
    /// Largest frame the transport accepts, overhead included.
    fn max_frame_length(&self) -> usize;

    /// Upper bound on delivery latency.
    fn max_latency(&self) -> Duration;

    /// Total bytes the connection can carry.
    fn capacity(&self) -> u64;

    /// Sink for connection bytes.
    fn output(&mut self) -> &mut dyn Write;

    /// Release the connection. `exception` is true when the connection was
    /// abandoned or failed and its bytes must not be delivered.
    fn dispose(&mut self, exception: bool) -> Result<(), TransportError>;
}

/// Incoming half of one simplex connection.
pub trait TransportConnectionReader: Send {
    /// Largest frame the transport delivers, overhead included.
    fn max_frame_length(&self) -> usize;

    /// Source of connection bytes.
    fn input(&mut self) -> &mut dyn Read;

    /// Release the connection. `recognised` is false when no contact matched
    /// the tag; `exception` is true when reading failed.
    fn dispose(&mut self, exception: bool, recognised: bool) -> Result<(), TransportError>;
}

/// A store-and-forward transport.
pub trait SimplexPlugin: Send + Sync {
    /// Stable plugin identifier.
    fn id(&self) -> &TransportId;

    /// Bring the transport up.
    fn start(&self) -> Result<(), TransportError>;

    /// Shut the transport down.
    fn stop(&self) -> Result<(), TransportError>;

    /// True between a successful `start` and `stop`.
    fn is_running(&self) -> bool;

    /// True if the transport must be polled for incoming connections.
    fn should_poll(&self) -> bool;

    /// Delay between polls.
    fn polling_interval(&self) -> Duration;

    /// Collect incoming connections that have arrived since the last poll.
    fn poll(&self) -> Result<Vec<Box<dyn TransportConnectionReader>>, TransportError>;

    /// Open an incoming connection from `contact`, if the transport can
    /// address one directly.
    fn create_reader(
        &self,
        contact: ContactId,
    ) -> Result<Option<Box<dyn TransportConnectionReader>>, TransportError>;

    /// Open an outgoing connection to `contact`, if the transport is
    /// available.
    fn create_writer(
        &self,
        contact: ContactId,
    ) -> Result<Option<Box<dyn TransportConnectionWriter>>, TransportError>;
}
