//! Identifiers and per-connection key context.

use std::{
    fmt,
    io::{Read, Write},
};

use murmur_crypto::{Role, SecretKey};

use crate::{decrypter::ConnectionDecrypter, encrypter::ConnectionEncrypter, error::TransportError};

/// Local identifier of a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContactId(pub u32);

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "contact-{}", self.0)
    }
}

/// Index of a transport within a contact's configuration. Used as KDF
/// context, not secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportIndex(pub u32);

/// Stable identifier of a transport plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportId(String);

impl TransportId {
    /// Wrap a plugin identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything needed to key one connection in one direction.
///
/// Handed out by the storage collaborator, which advances the stream number
/// each time. Not `Clone`: building an encrypter or decrypter consumes it, so
/// one context can never key two connections.
#[derive(Debug)]
pub struct ConnectionContext {
    /// Contact on the other end
    pub contact_id: ContactId,
    /// Transport the connection runs over
    pub transport_index: TransportIndex,
    /// Secret of the current rotation period
    pub secret: SecretKey,
    /// Stream number of this connection
    pub stream_number: u64,
    /// Local side of the contact pair
    pub role: Role,
}

impl ConnectionContext {
    /// Encrypt side over `out`, keyed for the local role.
    pub fn into_encrypter<W: Write>(
        self,
        out: W,
        capacity: u64,
        max_frame_length: usize,
    ) -> Result<ConnectionEncrypter<W>, TransportError> {
        ConnectionEncrypter::new(
            out,
            capacity,
            max_frame_length,
            &self.secret,
            self.stream_number,
            self.role,
        )
    }

    /// Decrypt side over `input`, keyed for the peer's role. The tag must
    /// already have been consumed from `input`.
    pub fn into_decrypter<R: Read>(
        self,
        input: R,
        max_frame_length: usize,
    ) -> Result<ConnectionDecrypter<R>, TransportError> {
        ConnectionDecrypter::new(
            input,
            max_frame_length,
            &self.secret,
            self.stream_number,
            self.role.peer(),
        )
    }
}
