//! Storage collaborator interfaces.
//!
//! The database owns every piece of sync state: connection contexts, pending
//! acks, outgoing messages and delivery records. The drivers only ask it for
//! the next thing to send and hand it what arrived. Generated records count
//! as sent unless the driver gives them back through
//! [`SyncStorage::restore_unsent`].

use murmur_transport::{ConnectionContext, ContactId, TransportIndex};

use crate::{
    error::StorageError,
    record::{Ack, RawBatch, SubscriptionUpdate, SyncRecord, TransportUpdate},
};

/// Send half of the storage collaborator.
///
/// `max_size` arguments bound the CBOR-encoded size of the whole record, so
/// the result always fits in one frame payload of that size.
pub trait SyncStorage: Send + Sync {
    /// Context keying the next outgoing connection to `contact` over
    /// `transport`. Each call hands out a fresh stream number.
    fn connection_context(
        &self,
        contact: ContactId,
        transport: TransportIndex,
    ) -> Result<Option<ConnectionContext>, StorageError>;

    /// Local transport properties, if `contact` has not seen the latest.
    fn generate_transport_update(
        &self,
        contact: ContactId,
    ) -> Result<Option<TransportUpdate>, StorageError>;

    /// Local subscriptions, if `contact` has not seen the latest.
    fn generate_subscription_update(
        &self,
        contact: ContactId,
    ) -> Result<Option<SubscriptionUpdate>, StorageError>;

    /// Acks owed to `contact`, packed up to `max_size` encoded bytes.
    fn generate_ack(&self, contact: ContactId, max_size: usize)
    -> Result<Option<Ack>, StorageError>;

    /// Messages for `contact`, packed up to `max_size` encoded bytes.
    fn generate_batch(
        &self,
        contact: ContactId,
        max_size: usize,
    ) -> Result<Option<RawBatch>, StorageError>;

    /// Take back records generated for `contact` that never reached it: one
    /// that did not fit in its connection, or every record of a connection
    /// that faulted. Later connections offer them again, in the same order.
    fn restore_unsent(&self, contact: ContactId, records: Vec<SyncRecord>)
    -> Result<(), StorageError>;
}

/// Receive half of the storage collaborator.
pub trait SyncReceiver: Send + Sync {
    /// Record `contact`'s transport properties.
    fn receive_transport_update(
        &self,
        contact: ContactId,
        update: TransportUpdate,
    ) -> Result<(), StorageError>;

    /// Record `contact`'s subscriptions.
    fn receive_subscription_update(
        &self,
        contact: ContactId,
        update: SubscriptionUpdate,
    ) -> Result<(), StorageError>;

    /// Mark batches as delivered to `contact`.
    fn receive_ack(&self, contact: ContactId, ack: Ack) -> Result<(), StorageError>;

    /// Store messages from `contact` and owe an ack for the batch.
    fn receive_batch(&self, contact: ContactId, batch: RawBatch) -> Result<(), StorageError>;
}
