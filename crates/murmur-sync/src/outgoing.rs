//! Outgoing simplex connection driver.
//!
//! Fills one one-way connection with sync records in fixed priority order:
//! transport update, subscription update, acks, then message batches. Control
//! records go first so a connection with room for only a little data still
//! advances protocol state.
//!
//! ```text
//! Start ──► Preparing ──► Writing(TransportUpdate)
//!   │          │                 │
//!   │          │                 ▼
//!   │          │          Writing(SubscriptionUpdate) ──► Writing(Acks) ──► Writing(Batches)
//!   │          │                                                                  │
//!   ▼          ▼                                                                  ▼
//! Disposed { exception: true }                               Disposed { exception: false }
//! ```

use std::io::Write;

use murmur_transport::{
    ConnectionEncrypter, ContactId, MIN_CONNECTION_LENGTH, TransportConnectionWriter,
    TransportIndex,
};
use tracing::{debug, info, warn};

use crate::{error::SyncError, record::SyncRecord, storage::SyncStorage};

/// Record classes in the order they are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// One transport update, if any
    TransportUpdate,
    /// One subscription update, if any
    SubscriptionUpdate,
    /// Acks until storage has none left
    Acks,
    /// Batches until storage has none left
    Batches,
}

/// Driver lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not yet run
    Start,
    /// Fetching the context and keying the connection
    Preparing,
    /// Writing records of the given class
    Writing(Priority),
    /// Transport released
    Disposed {
        /// True if the connection's bytes must not be delivered
        exception: bool,
    },
}

/// Why a connection was abandoned before anything was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Storage has no keys for this contact and transport
    NoContext,
    /// Transport cannot carry a tag and a minimal frame
    InsufficientCapacity,
}

/// Result of a successful [`OutgoingSimplexConnection::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Records were written (possibly none) and the transport disposed cleanly
    Completed {
        /// Bytes emitted, tag and frames included
        bytes_written: u64,
        /// Records emitted, one per frame
        records_written: usize,
    },
    /// Nothing was written and the transport was disposed with an exception
    Aborted(AbortReason),
}

/// Driver for one outgoing simplex connection.
///
/// Single use: [`Self::write`] runs the whole connection and always disposes
/// the transport writer, with `exception = true` on abort or error.
pub struct OutgoingSimplexConnection<'a> {
    storage: &'a dyn SyncStorage,
    writer: &'a mut dyn TransportConnectionWriter,
    contact: ContactId,
    transport: TransportIndex,
    state: ConnectionState,
}

impl<'a> OutgoingSimplexConnection<'a> {
    /// Driver writing to `contact` over `writer`.
    pub fn new(
        storage: &'a dyn SyncStorage,
        writer: &'a mut dyn TransportConnectionWriter,
        contact: ContactId,
        transport: TransportIndex,
    ) -> Self {
        Self { storage, writer, contact, transport, state: ConnectionState::Start }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Write the connection and dispose the transport.
    ///
    /// # Errors
    ///
    /// - `AlreadyUsed`: called a second time
    /// - `Storage`, `Record`, `Transport`: generating or writing a record
    ///   failed; the transport was disposed with an exception
    pub fn write(&mut self) -> Result<WriteOutcome, SyncError> {
        if self.state != ConnectionState::Start {
            return Err(SyncError::AlreadyUsed);
        }
        self.state = ConnectionState::Preparing;

        let result = self.run();
        let exception = !matches!(result, Ok(WriteOutcome::Completed { .. }));

        match &result {
            Ok(WriteOutcome::Completed { bytes_written, records_written }) => {
                info!(
                    contact = %self.contact,
                    bytes_written,
                    records_written,
                    "outgoing connection written"
                );
            },
            Ok(WriteOutcome::Aborted(reason)) => {
                info!(contact = %self.contact, ?reason, "outgoing connection aborted");
            },
            Err(e) => {
                warn!(contact = %self.contact, error = %e, "outgoing connection failed");
            },
        }

        self.dispose(exception);
        result
    }

    fn run(&mut self) -> Result<WriteOutcome, SyncError> {
        let Some(context) = self.storage.connection_context(self.contact, self.transport)? else {
            return Ok(WriteOutcome::Aborted(AbortReason::NoContext));
        };

        let capacity = self.writer.capacity();
        if capacity < MIN_CONNECTION_LENGTH {
            debug!(capacity, min = MIN_CONNECTION_LENGTH, "transport capacity too small");
            return Ok(WriteOutcome::Aborted(AbortReason::InsufficientCapacity));
        }

        let max_frame_length = self.writer.max_frame_length();
        let mut encrypter = context.into_encrypter(self.writer.output(), capacity, max_frame_length)?;

        let mut taken = Vec::new();
        let result =
            write_records(self.storage, self.contact, &mut encrypter, &mut self.state, &mut taken)
                .and_then(|()| encrypter.finish().map_err(SyncError::from));

        if let Err(e) = result {
            // The transport discards a faulted connection, so nothing taken reached the peer
            restore_unsent(self.storage, self.contact, taken);
            return Err(e);
        }

        Ok(WriteOutcome::Completed {
            bytes_written: encrypter.bytes_written(),
            records_written: taken.len(),
        })
    }

    fn dispose(&mut self, exception: bool) {
        if let Err(e) = self.writer.dispose(exception) {
            warn!(contact = %self.contact, error = %e, "failed to dispose transport writer");
        }
        self.state = ConnectionState::Disposed { exception };
    }
}

/// Write records in priority order until storage runs dry or a record no
/// longer fits. Every record taken from storage ends up in `taken`, except one
/// that did not fit, which goes straight back.
fn write_records<W: Write>(
    storage: &dyn SyncStorage,
    contact: ContactId,
    encrypter: &mut ConnectionEncrypter<W>,
    state: &mut ConnectionState,
    taken: &mut Vec<SyncRecord>,
) -> Result<(), SyncError> {
    *state = ConnectionState::Writing(Priority::TransportUpdate);
    if let Some(update) = storage.generate_transport_update(contact)? {
        let record = SyncRecord::TransportUpdate(update);
        if !write_record(storage, contact, encrypter, record, taken)? {
            return Ok(());
        }
    }

    *state = ConnectionState::Writing(Priority::SubscriptionUpdate);
    if let Some(update) = storage.generate_subscription_update(contact)? {
        let record = SyncRecord::SubscriptionUpdate(update);
        if !write_record(storage, contact, encrypter, record, taken)? {
            return Ok(());
        }
    }

    *state = ConnectionState::Writing(Priority::Acks);
    loop {
        let budget = encrypter.payload_budget();
        if budget == 0 {
            return Ok(());
        }
        let Some(ack) = storage.generate_ack(contact, budget)? else {
            break;
        };
        if !write_record(storage, contact, encrypter, SyncRecord::Ack(ack), taken)? {
            return Ok(());
        }
    }

    *state = ConnectionState::Writing(Priority::Batches);
    loop {
        let budget = encrypter.payload_budget();
        if budget == 0 {
            return Ok(());
        }
        let Some(batch) = storage.generate_batch(contact, budget)? else {
            break;
        };
        if !write_record(storage, contact, encrypter, SyncRecord::Batch(batch), taken)? {
            return Ok(());
        }
    }

    Ok(())
}

/// Encode and write one record as one frame.
///
/// Returns false, writing nothing and handing the record back to storage, if
/// it does not fit in the remaining budget. Otherwise the record joins
/// `taken` before the write, so a faulted write can still be restored.
fn write_record<W: Write>(
    storage: &dyn SyncStorage,
    contact: ContactId,
    encrypter: &mut ConnectionEncrypter<W>,
    record: SyncRecord,
    taken: &mut Vec<SyncRecord>,
) -> Result<bool, SyncError> {
    let kind = record.kind();
    let payload = match record.encode() {
        Ok(payload) => payload,
        Err(e) => {
            taken.push(record);
            return Err(e.into());
        },
    };

    let budget = encrypter.payload_budget();
    if payload.len() > budget {
        debug!(kind, len = payload.len(), budget, "record does not fit");
        storage.restore_unsent(contact, vec![record])?;
        return Ok(false);
    }

    taken.push(record);
    encrypter.write_frame(&payload, false)?;
    debug!(kind, len = payload.len(), "record written");
    Ok(true)
}

fn restore_unsent(storage: &dyn SyncStorage, contact: ContactId, records: Vec<SyncRecord>) {
    if records.is_empty() {
        return;
    }
    let count = records.len();
    if let Err(e) = storage.restore_unsent(contact, records) {
        warn!(%contact, count, error = %e, "failed to restore unsent records");
    }
}
