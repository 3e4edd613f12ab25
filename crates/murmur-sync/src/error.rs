//! Error types for the sync layer.

use murmur_crypto::CryptoError;
use murmur_transport::{ContactId, TransportError, TransportIndex};
use thiserror::Error;

/// Record codec failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Record could not be serialized
    #[error("record encoding failed: {0}")]
    Encode(String),

    /// Bytes are not a valid record
    #[error("record decoding failed: {0}")]
    Decode(String),
}

/// Storage collaborator failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No such contact
    #[error("unknown contact: {0}")]
    UnknownContact(ContactId),

    /// Contact has no keys for this transport
    #[error("{contact} has no transport {}", transport.0)]
    UnknownTransport {
        /// Contact queried
        contact: ContactId,
        /// Transport queried
        transport: TransportIndex,
    },

    /// Stream numbers for the current period are used up
    #[error("stream numbers exhausted for {0}")]
    StreamsExhausted(ContactId),

    /// Key derivation failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Generated record could not be encoded
    #[error("record error: {0}")]
    Record(#[from] RecordError),
}

/// Errors from driving a simplex connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Storage collaborator failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Writing or reading the connection failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A frame did not hold a valid record
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// The driver has already run
    #[error("connection already used")]
    AlreadyUsed,
}

impl SyncError {
    /// Returns true if the peer sent bytes that cannot be a valid connection.
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_corruption(),
            Self::Record(RecordError::Decode(_)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_classification() {
        assert!(SyncError::from(TransportError::AuthenticationFailed).is_corruption());
        assert!(SyncError::from(RecordError::Decode("bad".into())).is_corruption());
        assert!(!SyncError::from(TransportError::Io("gone".into())).is_corruption());
        assert!(!SyncError::from(StorageError::UnknownContact(ContactId(1))).is_corruption());
        assert!(!SyncError::AlreadyUsed.is_corruption());
    }

    #[test]
    fn messages_name_the_contact() {
        let err = StorageError::UnknownTransport { contact: ContactId(4), transport: TransportIndex(2) };
        assert_eq!(err.to_string(), "contact-4 has no transport 2");
    }
}
