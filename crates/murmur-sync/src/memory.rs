//! In-memory storage collaborator for tests and simulation.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use murmur_crypto::{MAX_32_BIT_UNSIGNED, Role, SecretKey, derive_initial_secret, derive_next_secret};
use murmur_transport::{ConnectionContext, ContactId, MemoryTagRecogniser, TransportIndex};
use tracing::{debug, warn};

use crate::{
    error::{StorageError, SyncError},
    record::{Ack, BatchId, RawBatch, SubscriptionUpdate, SyncRecord, TransportUpdate},
    storage::{SyncReceiver, SyncStorage},
};

/// Sync state for every contact, held in memory.
///
/// Cloning shares the state. Transport and subscription updates count as
/// delivered once a connection carries them; records a connection gives back
/// are offered again. Batches stay outstanding until acked and can be put
/// back in the queue with [`Self::requeue_unacked`].
#[derive(Clone, Default)]
pub struct MemorySyncStorage {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    contacts: BTreeMap<ContactId, ContactState>,
    local_transports: Option<TransportUpdate>,
    local_subscriptions: Option<SubscriptionUpdate>,
}

struct StreamState {
    secret: SecretKey,
    next_stream: u64,
}

struct ContactState {
    role: Role,
    period: u64,
    streams: BTreeMap<TransportIndex, StreamState>,

    queued: VecDeque<Vec<u8>>,
    outstanding: Vec<(BatchId, RawBatch)>,
    acks_owed: VecDeque<BatchId>,
    transport_version_sent: Option<u64>,
    subscription_version_sent: Option<u64>,

    received: Vec<Vec<u8>>,
    seen_batches: BTreeSet<BatchId>,
    remote_transports: Option<TransportUpdate>,
    remote_subscriptions: Option<SubscriptionUpdate>,
}

impl ContactState {
    fn new(role: Role, streams: BTreeMap<TransportIndex, StreamState>) -> Self {
        Self {
            role,
            period: 0,
            streams,
            queued: VecDeque::new(),
            outstanding: Vec::new(),
            acks_owed: VecDeque::new(),
            transport_version_sent: None,
            subscription_version_sent: None,
            received: Vec::new(),
            seen_batches: BTreeSet::new(),
            remote_transports: None,
            remote_subscriptions: None,
        }
    }
}

impl MemorySyncStorage {
    /// Empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("Mutex poisoned")
    }

    /// Add a contact sharing `root` with us, reachable over `transports`.
    ///
    /// Derives the first-period secret for each transport. Replaces any
    /// existing state for the contact.
    pub fn add_contact(
        &self,
        contact: ContactId,
        root: &SecretKey,
        role: Role,
        transports: &[TransportIndex],
    ) -> Result<(), StorageError> {
        let mut streams = BTreeMap::new();
        for &transport in transports {
            let secret = derive_initial_secret(root, transport.0)?;
            streams.insert(transport, StreamState { secret, next_stream: 0 });
        }

        self.lock().contacts.insert(contact, ContactState::new(role, streams));
        debug!(%contact, ?role, transports = transports.len(), "contact added");
        Ok(())
    }

    /// Forget a contact and everything queued for it.
    pub fn remove_contact(&self, contact: ContactId) {
        self.lock().contacts.remove(&contact);
    }

    /// Move every transport of `contact` into the next rotation period.
    ///
    /// The previous period's secrets are dropped (and zeroized) and stream
    /// numbers start again at zero.
    pub fn rotate_period(&self, contact: ContactId) -> Result<u64, StorageError> {
        let mut inner = self.lock();
        let state = inner.contacts.get_mut(&contact).ok_or(StorageError::UnknownContact(contact))?;

        let period = state.period + 1;
        for stream in state.streams.values_mut() {
            stream.secret = derive_next_secret(&stream.secret, period)?;
            stream.next_stream = 0;
        }
        state.period = period;
        debug!(%contact, period, "rotated to next period");
        Ok(period)
    }

    /// Current rotation period of `contact`.
    pub fn period(&self, contact: ContactId) -> Result<u64, StorageError> {
        self.lock()
            .contacts
            .get(&contact)
            .map(|state| state.period)
            .ok_or(StorageError::UnknownContact(contact))
    }

    /// Stream number the next outgoing connection will use.
    pub fn next_stream_number(
        &self,
        contact: ContactId,
        transport: TransportIndex,
    ) -> Result<u64, StorageError> {
        let inner = self.lock();
        let state = inner.contacts.get(&contact).ok_or(StorageError::UnknownContact(contact))?;
        state
            .streams
            .get(&transport)
            .map(|stream| stream.next_stream)
            .ok_or(StorageError::UnknownTransport { contact, transport })
    }

    /// Register every contact and transport with `recogniser`, expecting
    /// stream numbers from zero in the current period.
    pub fn expect_incoming(&self, recogniser: &MemoryTagRecogniser) -> Result<(), SyncError> {
        let inner = self.lock();
        for (&contact, state) in &inner.contacts {
            for (&transport, stream) in &state.streams {
                recogniser.add_contact(contact, transport, stream.secret.clone(), state.role, 0)?;
            }
        }
        Ok(())
    }

    /// Queue a message for delivery to `contact`.
    pub fn queue_message(&self, contact: ContactId, message: Vec<u8>) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let state = inner.contacts.get_mut(&contact).ok_or(StorageError::UnknownContact(contact))?;
        state.queued.push_back(message);
        Ok(())
    }

    /// Publish local transport properties to every contact.
    pub fn set_transport_update(&self, update: TransportUpdate) {
        self.lock().local_transports = Some(update);
    }

    /// Publish local subscriptions to every contact.
    pub fn set_subscription_update(&self, update: SubscriptionUpdate) {
        self.lock().local_subscriptions = Some(update);
    }

    /// Put batches still awaiting an ack back at the front of the queue.
    pub fn requeue_unacked(&self, contact: ContactId) -> Result<usize, StorageError> {
        let mut inner = self.lock();
        let state = inner.contacts.get_mut(&contact).ok_or(StorageError::UnknownContact(contact))?;

        let outstanding = std::mem::take(&mut state.outstanding);
        let mut count = 0;
        for (_, batch) in outstanding.into_iter().rev() {
            for message in batch.messages.into_iter().rev() {
                state.queued.push_front(message);
                count += 1;
            }
        }
        Ok(count)
    }

    /// Messages received from `contact`, in arrival order.
    pub fn received_messages(&self, contact: ContactId) -> Vec<Vec<u8>> {
        self.lock().contacts.get(&contact).map(|s| s.received.clone()).unwrap_or_default()
    }

    /// Messages queued for `contact` and not yet sent.
    pub fn queued_messages(&self, contact: ContactId) -> usize {
        self.lock().contacts.get(&contact).map_or(0, |s| s.queued.len())
    }

    /// Batches sent to `contact` and not yet acked.
    pub fn outstanding_batches(&self, contact: ContactId) -> usize {
        self.lock().contacts.get(&contact).map_or(0, |s| s.outstanding.len())
    }

    /// Batches received from `contact` and not yet acked.
    pub fn pending_acks(&self, contact: ContactId) -> usize {
        self.lock().contacts.get(&contact).map_or(0, |s| s.acks_owed.len())
    }

    /// Latest transport properties `contact` sent us.
    pub fn remote_transport_update(&self, contact: ContactId) -> Option<TransportUpdate> {
        self.lock().contacts.get(&contact).and_then(|s| s.remote_transports.clone())
    }

    /// Latest subscriptions `contact` sent us.
    pub fn remote_subscription_update(&self, contact: ContactId) -> Option<SubscriptionUpdate> {
        self.lock().contacts.get(&contact).and_then(|s| s.remote_subscriptions.clone())
    }
}

fn contact_mut(inner: &mut Inner, contact: ContactId) -> Result<&mut ContactState, StorageError> {
    inner.contacts.get_mut(&contact).ok_or(StorageError::UnknownContact(contact))
}

fn fits(record: SyncRecord, max_size: usize) -> Result<bool, StorageError> {
    Ok(record.encoded_len()? <= max_size)
}

impl SyncStorage for MemorySyncStorage {
    fn connection_context(
        &self,
        contact: ContactId,
        transport: TransportIndex,
    ) -> Result<Option<ConnectionContext>, StorageError> {
        let mut inner = self.lock();
        let Some(state) = inner.contacts.get_mut(&contact) else {
            return Ok(None);
        };
        let role = state.role;
        let Some(stream) = state.streams.get_mut(&transport) else {
            return Ok(None);
        };

        let stream_number = stream.next_stream;
        if stream_number > MAX_32_BIT_UNSIGNED {
            return Err(StorageError::StreamsExhausted(contact));
        }
        stream.next_stream += 1;

        Ok(Some(ConnectionContext {
            contact_id: contact,
            transport_index: transport,
            secret: stream.secret.clone(),
            stream_number,
            role,
        }))
    }

    fn generate_transport_update(
        &self,
        contact: ContactId,
    ) -> Result<Option<TransportUpdate>, StorageError> {
        let mut inner = self.lock();
        let Some(update) = inner.local_transports.clone() else {
            return Ok(None);
        };
        let state = contact_mut(&mut inner, contact)?;
        if state.transport_version_sent.is_some_and(|sent| sent >= update.version) {
            return Ok(None);
        }
        state.transport_version_sent = Some(update.version);
        Ok(Some(update))
    }

    fn generate_subscription_update(
        &self,
        contact: ContactId,
    ) -> Result<Option<SubscriptionUpdate>, StorageError> {
        let mut inner = self.lock();
        let Some(update) = inner.local_subscriptions.clone() else {
            return Ok(None);
        };
        let state = contact_mut(&mut inner, contact)?;
        if state.subscription_version_sent.is_some_and(|sent| sent >= update.version) {
            return Ok(None);
        }
        state.subscription_version_sent = Some(update.version);
        Ok(Some(update))
    }

    fn generate_ack(
        &self,
        contact: ContactId,
        max_size: usize,
    ) -> Result<Option<Ack>, StorageError> {
        let mut inner = self.lock();
        let state = contact_mut(&mut inner, contact)?;

        let mut ack = Ack::default();
        for &id in &state.acks_owed {
            ack.batch_ids.push(id);
            if !fits(SyncRecord::Ack(ack.clone()), max_size)? {
                ack.batch_ids.pop();
                break;
            }
        }

        if ack.batch_ids.is_empty() {
            return Ok(None);
        }
        state.acks_owed.drain(..ack.batch_ids.len());
        Ok(Some(ack))
    }

    fn generate_batch(
        &self,
        contact: ContactId,
        max_size: usize,
    ) -> Result<Option<RawBatch>, StorageError> {
        let mut inner = self.lock();
        let state = contact_mut(&mut inner, contact)?;

        let mut batch = RawBatch::default();
        let mut raw_len = 0usize;
        for message in &state.queued {
            // Encoded size is never below the raw message bytes
            raw_len += message.len();
            if raw_len > max_size {
                break;
            }
            batch.messages.push(message.clone());
            if !fits(SyncRecord::Batch(batch.clone()), max_size)? {
                batch.messages.pop();
                break;
            }
        }

        if batch.messages.is_empty() {
            if let Some(head) = state.queued.front() {
                warn!(%contact, len = head.len(), max_size, "queued message exceeds batch size limit");
            }
            return Ok(None);
        }

        state.queued.drain(..batch.messages.len());
        let id = batch.id()?;
        state.outstanding.push((id, batch.clone()));
        debug!(%contact, ?id, messages = batch.messages.len(), "batch generated");
        Ok(Some(batch))
    }

    fn restore_unsent(
        &self,
        contact: ContactId,
        records: Vec<SyncRecord>,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let state = contact_mut(&mut inner, contact)?;
        let count = records.len();

        // Newest first, so restored acks and messages keep their order at the front
        for record in records.into_iter().rev() {
            match record {
                SyncRecord::TransportUpdate(update) => {
                    if state.transport_version_sent == Some(update.version) {
                        state.transport_version_sent = None;
                    }
                },
                SyncRecord::SubscriptionUpdate(update) => {
                    if state.subscription_version_sent == Some(update.version) {
                        state.subscription_version_sent = None;
                    }
                },
                SyncRecord::Ack(ack) => {
                    for id in ack.batch_ids.into_iter().rev() {
                        if !state.acks_owed.contains(&id) {
                            state.acks_owed.push_front(id);
                        }
                    }
                },
                SyncRecord::Batch(batch) => {
                    let id = batch.id()?;
                    if let Some(at) = state.outstanding.iter().rposition(|(held, _)| *held == id) {
                        state.outstanding.remove(at);
                    }
                    for message in batch.messages.into_iter().rev() {
                        state.queued.push_front(message);
                    }
                },
            }
        }

        debug!(%contact, count, "unsent records restored");
        Ok(())
    }
}

impl SyncReceiver for MemorySyncStorage {
    fn receive_transport_update(
        &self,
        contact: ContactId,
        update: TransportUpdate,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let state = contact_mut(&mut inner, contact)?;
        if state.remote_transports.as_ref().is_some_and(|held| held.version >= update.version) {
            debug!(%contact, version = update.version, "ignoring stale transport update");
            return Ok(());
        }
        state.remote_transports = Some(update);
        Ok(())
    }

    fn receive_subscription_update(
        &self,
        contact: ContactId,
        update: SubscriptionUpdate,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let state = contact_mut(&mut inner, contact)?;
        if state.remote_subscriptions.as_ref().is_some_and(|held| held.version >= update.version) {
            debug!(%contact, version = update.version, "ignoring stale subscription update");
            return Ok(());
        }
        state.remote_subscriptions = Some(update);
        Ok(())
    }

    fn receive_ack(&self, contact: ContactId, ack: Ack) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let state = contact_mut(&mut inner, contact)?;
        let before = state.outstanding.len();
        state.outstanding.retain(|(id, _)| !ack.batch_ids.contains(id));
        let cleared = before - state.outstanding.len();
        if cleared < ack.batch_ids.len() {
            debug!(%contact, unknown = ack.batch_ids.len() - cleared, "ack for unknown batches");
        }
        Ok(())
    }

    fn receive_batch(&self, contact: ContactId, batch: RawBatch) -> Result<(), StorageError> {
        let id = batch.id()?;
        let mut inner = self.lock();
        let state = contact_mut(&mut inner, contact)?;

        // Duplicates are acked again but delivered once
        if state.seen_batches.insert(id) {
            state.received.extend(batch.messages);
        }
        if !state.acks_owed.contains(&id) {
            state.acks_owed.push_back(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: ContactId = ContactId(1);
    const TRANSPORT: TransportIndex = TransportIndex(0);

    fn storage() -> MemorySyncStorage {
        let storage = MemorySyncStorage::new();
        storage.add_contact(ALICE, &SecretKey::from_bytes([7; 32]), Role::Bob, &[TRANSPORT]).unwrap();
        storage
    }

    #[test]
    fn contexts_advance_stream_numbers() {
        let storage = storage();

        let first = storage.connection_context(ALICE, TRANSPORT).unwrap().unwrap();
        let second = storage.connection_context(ALICE, TRANSPORT).unwrap().unwrap();

        assert_eq!(first.stream_number, 0);
        assert_eq!(second.stream_number, 1);
        assert_eq!(first.secret, second.secret);
        assert_eq!(first.role, Role::Bob);
        assert_eq!(storage.next_stream_number(ALICE, TRANSPORT).unwrap(), 2);
    }

    #[test]
    fn unknown_pairs_have_no_context() {
        let storage = storage();
        assert!(storage.connection_context(ContactId(9), TRANSPORT).unwrap().is_none());
        assert!(storage.connection_context(ALICE, TransportIndex(3)).unwrap().is_none());
    }

    #[test]
    fn rotation_changes_secret_and_resets_streams() {
        let storage = storage();
        let before = storage.connection_context(ALICE, TRANSPORT).unwrap().unwrap();

        assert_eq!(storage.rotate_period(ALICE).unwrap(), 1);
        let after = storage.connection_context(ALICE, TRANSPORT).unwrap().unwrap();

        assert_ne!(before.secret, after.secret);
        assert_eq!(after.stream_number, 0);
        assert_eq!(storage.period(ALICE).unwrap(), 1);
    }

    #[test]
    fn transports_get_distinct_secrets() {
        let storage = MemorySyncStorage::new();
        storage
            .add_contact(
                ALICE,
                &SecretKey::from_bytes([7; 32]),
                Role::Alice,
                &[TransportIndex(0), TransportIndex(1)],
            )
            .unwrap();

        let a = storage.connection_context(ALICE, TransportIndex(0)).unwrap().unwrap();
        let b = storage.connection_context(ALICE, TransportIndex(1)).unwrap().unwrap();
        assert_ne!(a.secret, b.secret);
    }

    #[test]
    fn batches_respect_max_size() {
        let storage = storage();
        for _ in 0..10 {
            storage.queue_message(ALICE, vec![0xAB; 100]).unwrap();
        }

        let batch = storage.generate_batch(ALICE, 350).unwrap().unwrap();
        let encoded = SyncRecord::Batch(batch.clone()).encoded_len().unwrap();

        assert!(encoded <= 350);
        assert_eq!(batch.messages.len(), 3);
        assert_eq!(storage.queued_messages(ALICE), 7);
        assert_eq!(storage.outstanding_batches(ALICE), 1);
    }

    #[test]
    fn oversized_message_stays_queued() {
        let storage = storage();
        storage.queue_message(ALICE, vec![0; 1000]).unwrap();

        assert!(storage.generate_batch(ALICE, 100).unwrap().is_none());
        assert_eq!(storage.queued_messages(ALICE), 1);
    }

    #[test]
    fn acks_clear_outstanding_batches() {
        let storage = storage();
        storage.queue_message(ALICE, b"hi".to_vec()).unwrap();
        let batch = storage.generate_batch(ALICE, 1000).unwrap().unwrap();

        storage.receive_ack(ALICE, Ack { batch_ids: vec![batch.id().unwrap()] }).unwrap();
        assert_eq!(storage.outstanding_batches(ALICE), 0);
    }

    #[test]
    fn received_batches_owe_one_ack() {
        let storage = storage();
        let batch = RawBatch { messages: vec![b"m".to_vec()] };

        storage.receive_batch(ALICE, batch.clone()).unwrap();
        storage.receive_batch(ALICE, batch.clone()).unwrap();

        assert_eq!(storage.received_messages(ALICE), vec![b"m".to_vec()]);
        assert_eq!(storage.pending_acks(ALICE), 1);

        let ack = storage.generate_ack(ALICE, 1000).unwrap().unwrap();
        assert_eq!(ack.batch_ids, vec![batch.id().unwrap()]);
        assert!(storage.generate_ack(ALICE, 1000).unwrap().is_none());
    }

    #[test]
    fn acks_pack_up_to_max_size() {
        let storage = storage();
        for i in 0..20u8 {
            storage.receive_batch(ALICE, RawBatch { messages: vec![vec![i]] }).unwrap();
        }

        let ack = storage.generate_ack(ALICE, 200).unwrap().unwrap();
        assert!(SyncRecord::Ack(ack.clone()).encoded_len().unwrap() <= 200);
        assert_eq!(storage.pending_acks(ALICE), 20 - ack.batch_ids.len());
    }

    #[test]
    fn updates_sent_once_per_version() {
        let storage = storage();
        assert!(storage.generate_transport_update(ALICE).unwrap().is_none());

        storage.set_transport_update(TransportUpdate { version: 1, ..Default::default() });
        assert!(storage.generate_transport_update(ALICE).unwrap().is_some());
        assert!(storage.generate_transport_update(ALICE).unwrap().is_none());

        storage.set_transport_update(TransportUpdate { version: 2, ..Default::default() });
        assert_eq!(storage.generate_transport_update(ALICE).unwrap().unwrap().version, 2);
    }

    #[test]
    fn stale_remote_updates_ignored() {
        let storage = storage();
        let update = |version| SubscriptionUpdate { groups: Vec::new(), version };

        storage.receive_subscription_update(ALICE, update(5)).unwrap();
        storage.receive_subscription_update(ALICE, update(3)).unwrap();

        assert_eq!(storage.remote_subscription_update(ALICE).unwrap().version, 5);
    }

    #[test]
    fn requeue_restores_order() {
        let storage = storage();
        storage.queue_message(ALICE, b"one".to_vec()).unwrap();
        storage.queue_message(ALICE, b"two".to_vec()).unwrap();
        storage.generate_batch(ALICE, 1000).unwrap().unwrap();
        storage.queue_message(ALICE, b"three".to_vec()).unwrap();

        assert_eq!(storage.requeue_unacked(ALICE).unwrap(), 2);
        let batch = storage.generate_batch(ALICE, 1000).unwrap().unwrap();
        assert_eq!(batch.messages, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
    }

    #[test]
    fn restored_updates_are_offered_again() {
        let storage = storage();
        storage.set_transport_update(TransportUpdate { version: 3, ..Default::default() });
        storage.set_subscription_update(SubscriptionUpdate { groups: Vec::new(), version: 1 });
        let transports = storage.generate_transport_update(ALICE).unwrap().unwrap();
        let subscriptions = storage.generate_subscription_update(ALICE).unwrap().unwrap();

        storage
            .restore_unsent(
                ALICE,
                vec![
                    SyncRecord::TransportUpdate(transports),
                    SyncRecord::SubscriptionUpdate(subscriptions),
                ],
            )
            .unwrap();

        assert_eq!(storage.generate_transport_update(ALICE).unwrap().unwrap().version, 3);
        assert_eq!(storage.generate_subscription_update(ALICE).unwrap().unwrap().version, 1);
    }

    #[test]
    fn restored_acks_and_batches_keep_order() {
        let storage = storage();
        for i in 0..3u8 {
            storage.receive_batch(ALICE, RawBatch { messages: vec![vec![i]] }).unwrap();
        }
        storage.queue_message(ALICE, b"one".to_vec()).unwrap();
        storage.queue_message(ALICE, b"two".to_vec()).unwrap();
        let owed: Vec<_> =
            (0..3u8).map(|i| RawBatch { messages: vec![vec![i]] }.id().unwrap()).collect();

        let ack = storage.generate_ack(ALICE, 1000).unwrap().unwrap();
        let batch = storage.generate_batch(ALICE, 1000).unwrap().unwrap();
        storage.queue_message(ALICE, b"three".to_vec()).unwrap();
        assert_eq!(storage.pending_acks(ALICE), 0);
        assert_eq!(storage.outstanding_batches(ALICE), 1);

        storage.restore_unsent(ALICE, vec![SyncRecord::Ack(ack), SyncRecord::Batch(batch)]).unwrap();

        assert_eq!(storage.outstanding_batches(ALICE), 0);
        assert_eq!(storage.generate_ack(ALICE, 1000).unwrap().unwrap().batch_ids, owed);
        let batch = storage.generate_batch(ALICE, 1000).unwrap().unwrap();
        assert_eq!(batch.messages, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
    }

    #[test]
    fn unknown_contact_rejected() {
        let storage = storage();
        let err = storage.queue_message(ContactId(9), Vec::new()).unwrap_err();
        assert_eq!(err, StorageError::UnknownContact(ContactId(9)));
        assert!(storage.generate_ack(ContactId(9), 100).is_err());
    }
}
