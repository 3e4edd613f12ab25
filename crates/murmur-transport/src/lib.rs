//! Murmur Transport Security
//!
//! Turns a byte sink or source supplied by a transport plugin into a tagged,
//! framed, encrypted connection.
//!
//! # Wire Format
//!
//! ```text
//! connection = tag(16) frame*
//! frame      = sealed_header(4 + 16) sealed_payload(n + 16)
//! header     = u16_be(n) || flags || reserved(0)
//! ```
//!
//! Every byte on the wire is either a tag or AES-256-GCM output, so a
//! connection is indistinguishable from random noise without the shared
//! secret. The last frame of a connection carries the FINAL flag; a reader
//! that hits end of input before it knows the connection was cut short.
//!
//! # Roles
//!
//! A [`ConnectionContext`] carries the local [`Role`]. Encrypters write under
//! the local role's keys; decrypters read under the peer's.
//!
//! [`Role`]: murmur_crypto::Role

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod context;
pub mod decrypter;
pub mod encrypter;
pub mod error;
pub mod file;
pub mod header;
pub mod memory;
pub mod plugin;
pub mod recogniser;

pub use context::{ConnectionContext, ContactId, TransportId, TransportIndex};
pub use decrypter::{ConnectionDecrypter, read_tag};
pub use encrypter::ConnectionEncrypter;
pub use error::TransportError;
pub use file::{FilePlugin, FilePluginConfig};
pub use header::{FrameFlags, FrameHeader};
pub use memory::{MemoryTransportReader, MemoryTransportWriter};
pub use plugin::{SimplexPlugin, TransportConnectionReader, TransportConnectionWriter};
pub use recogniser::{MemoryTagRecogniser, TagRecogniser};

pub use murmur_crypto::{MAC_LENGTH, TAG_LENGTH};

/// Plaintext frame header length
pub const FRAME_HEADER_LENGTH: usize = 4;

/// Bytes a frame adds on top of its payload: sealed header plus payload MAC
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_LENGTH + MAC_LENGTH + MAC_LENGTH;

/// Largest frame on the wire, overhead included
pub const MAX_FRAME_LENGTH: usize = 16 * 1024;

/// Smallest capacity worth opening a connection for: a tag, one minimal frame
/// and the empty FINAL frame that closes the connection
pub const MIN_CONNECTION_LENGTH: u64 = (TAG_LENGTH + 2 * FRAME_OVERHEAD) as u64;

/// Largest frame number before the frame counter is exhausted
pub const MAX_FRAME_NUMBER: u64 = murmur_crypto::MAX_32_BIT_UNSIGNED;

/// Effective frame length limit for a transport advertising `transport_max`.
pub fn effective_frame_length(transport_max: usize) -> usize {
    transport_max.min(MAX_FRAME_LENGTH)
}
