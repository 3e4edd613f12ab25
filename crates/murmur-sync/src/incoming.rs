//! Incoming simplex connection driver.
//!
//! Reads the tag, asks the recogniser which contact sent it, then decrypts
//! frames under the peer's keys and hands each record to the receiver. The
//! reader is always disposed: `recognised` tells the transport whether the
//! connection belonged to us, `exception` whether reading failed.

use std::io::Read;

use murmur_transport::{
    ConnectionContext, ContactId, TagRecogniser, TransportConnectionReader, read_tag,
};
use tracing::{debug, info, warn};

use crate::{error::SyncError, record::SyncRecord, storage::SyncReceiver};

/// Result of a successful [`IncomingSimplexConnection::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Every record up to the FINAL frame was delivered
    Completed {
        /// Sender of the connection
        contact: ContactId,
        /// Records delivered
        records_read: usize,
    },
    /// No known contact sent this tag
    Unrecognised,
}

/// Driver for one incoming simplex connection.
pub struct IncomingSimplexConnection<'a> {
    recogniser: &'a dyn TagRecogniser,
    receiver: &'a dyn SyncReceiver,
    reader: &'a mut dyn TransportConnectionReader,
    used: bool,
}

impl<'a> IncomingSimplexConnection<'a> {
    /// Driver reading from `reader`.
    pub fn new(
        recogniser: &'a dyn TagRecogniser,
        receiver: &'a dyn SyncReceiver,
        reader: &'a mut dyn TransportConnectionReader,
    ) -> Self {
        Self { recogniser, receiver, reader, used: false }
    }

    /// Read the whole connection and dispose the reader.
    ///
    /// Records decoded before a fault have already been delivered; the
    /// connection as a whole is still reported as failed.
    ///
    /// # Errors
    ///
    /// - `AlreadyUsed`: called a second time
    /// - `Transport`: tag unreadable, frame corrupt or truncated
    /// - `Record`: a frame did not hold a valid record
    /// - `Storage`: the receiver rejected a record
    pub fn read(&mut self) -> Result<ReadOutcome, SyncError> {
        if self.used {
            return Err(SyncError::AlreadyUsed);
        }
        self.used = true;

        let context = match self.recognise() {
            Ok(Some(context)) => context,
            Ok(None) => {
                debug!("connection tag not recognised");
                self.dispose(false, false);
                return Ok(ReadOutcome::Unrecognised);
            },
            Err(e) => {
                warn!(error = %e, "failed to read connection tag");
                self.dispose(true, false);
                return Err(e);
            },
        };

        let contact = context.contact_id;
        let stream = context.stream_number;
        let max_frame_length = self.reader.max_frame_length();
        let result = read_records(context, self.reader.input(), max_frame_length, self.receiver);

        match &result {
            Ok(records_read) => {
                info!(%contact, stream, records_read, "incoming connection read");
            },
            Err(e) => {
                warn!(%contact, stream, error = %e, "incoming connection failed");
            },
        }

        self.dispose(result.is_err(), true);
        result.map(|records_read| ReadOutcome::Completed { contact, records_read })
    }

    fn recognise(&mut self) -> Result<Option<ConnectionContext>, SyncError> {
        let tag = read_tag(self.reader.input())?;
        Ok(self.recogniser.recognise(&tag)?)
    }

    fn dispose(&mut self, exception: bool, recognised: bool) {
        if let Err(e) = self.reader.dispose(exception, recognised) {
            warn!(error = %e, "failed to dispose transport reader");
        }
    }
}

fn read_records<R: Read>(
    context: ConnectionContext,
    input: R,
    max_frame_length: usize,
    receiver: &dyn SyncReceiver,
) -> Result<usize, SyncError> {
    let contact = context.contact_id;
    let mut decrypter = context.into_decrypter(input, max_frame_length)?;

    let mut records = 0;
    while let Some(payload) = decrypter.read_frame()? {
        // Empty frames carry no record
        if payload.is_empty() {
            continue;
        }

        let record = SyncRecord::decode(&payload)?;
        debug!(%contact, kind = record.kind(), "record read");
        match record {
            SyncRecord::TransportUpdate(update) => {
                receiver.receive_transport_update(contact, update)?;
            },
            SyncRecord::SubscriptionUpdate(update) => {
                receiver.receive_subscription_update(contact, update)?;
            },
            SyncRecord::Ack(ack) => receiver.receive_ack(contact, ack)?,
            SyncRecord::Batch(batch) => receiver.receive_batch(contact, batch)?,
        }
        records += 1;
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use murmur_crypto::{Role, SecretKey};
    use murmur_transport::{
        MemoryTagRecogniser, MemoryTransportReader, MemoryTransportWriter, TAG_LENGTH,
        TransportError, TransportIndex,
    };

    use super::*;
    use crate::{memory::MemorySyncStorage, outgoing::OutgoingSimplexConnection};

    const TRANSPORT: TransportIndex = TransportIndex(0);

    fn connection_from_alice(messages: &[&[u8]]) -> Vec<u8> {
        let alice = MemorySyncStorage::new();
        alice
            .add_contact(ContactId(2), &SecretKey::from_bytes([5; 32]), Role::Alice, &[TRANSPORT])
            .unwrap();
        for message in messages {
            alice.queue_message(ContactId(2), message.to_vec()).unwrap();
        }

        let mut writer = MemoryTransportWriter::new(1024 * 1024);
        OutgoingSimplexConnection::new(&alice, &mut writer, ContactId(2), TRANSPORT)
            .write()
            .unwrap();
        writer.into_bytes()
    }

    fn bob() -> (MemorySyncStorage, MemoryTagRecogniser) {
        let bob = MemorySyncStorage::new();
        bob.add_contact(ContactId(1), &SecretKey::from_bytes([5; 32]), Role::Bob, &[TRANSPORT])
            .unwrap();
        let recogniser = MemoryTagRecogniser::new();
        bob.expect_incoming(&recogniser).unwrap();
        (bob, recogniser)
    }

    #[test]
    fn delivers_messages() {
        let bytes = connection_from_alice(&[b"one", b"two"]);
        let (bob, recogniser) = bob();
        let mut reader = MemoryTransportReader::new(bytes);

        let outcome = IncomingSimplexConnection::new(&recogniser, &bob, &mut reader).read().unwrap();

        assert_eq!(outcome, ReadOutcome::Completed { contact: ContactId(1), records_read: 1 });
        assert_eq!(bob.received_messages(ContactId(1)), vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(bob.pending_acks(ContactId(1)), 1);
        assert_eq!(reader.disposed(), Some((false, true)));
    }

    #[test]
    fn unknown_tag_is_unrecognised() {
        let bytes = connection_from_alice(&[b"one"]);
        let bob = MemorySyncStorage::new();
        let recogniser = MemoryTagRecogniser::new();
        let mut reader = MemoryTransportReader::new(bytes);

        let outcome = IncomingSimplexConnection::new(&recogniser, &bob, &mut reader).read().unwrap();

        assert_eq!(outcome, ReadOutcome::Unrecognised);
        assert_eq!(reader.disposed(), Some((false, false)));
    }

    #[test]
    fn replayed_connection_is_unrecognised() {
        let bytes = connection_from_alice(&[b"one"]);
        let (bob, recogniser) = bob();

        let mut first = MemoryTransportReader::new(bytes.clone());
        IncomingSimplexConnection::new(&recogniser, &bob, &mut first).read().unwrap();

        let mut replay = MemoryTransportReader::new(bytes);
        let outcome = IncomingSimplexConnection::new(&recogniser, &bob, &mut replay).read().unwrap();

        assert_eq!(outcome, ReadOutcome::Unrecognised);
        assert_eq!(bob.received_messages(ContactId(1)).len(), 1);
    }

    #[test]
    fn short_input_faults_before_recognition() {
        let (bob, recogniser) = bob();
        let mut reader = MemoryTransportReader::new(vec![0; TAG_LENGTH - 1]);

        let result = IncomingSimplexConnection::new(&recogniser, &bob, &mut reader).read();

        assert_eq!(result, Err(SyncError::Transport(TransportError::Truncated)));
        assert_eq!(reader.disposed(), Some((true, false)));
    }

    #[test]
    fn corrupt_frame_faults_after_recognition() {
        let mut bytes = connection_from_alice(&[b"one"]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let (bob, recogniser) = bob();
        let mut reader = MemoryTransportReader::new(bytes);

        let result = IncomingSimplexConnection::new(&recogniser, &bob, &mut reader).read();

        assert!(result.unwrap_err().is_corruption());
        assert_eq!(reader.disposed(), Some((true, true)));
    }

    #[test]
    fn truncated_connection_faults() {
        let mut bytes = connection_from_alice(&[b"one"]);
        bytes.truncate(bytes.len() - 10);
        let (bob, recogniser) = bob();
        let mut reader = MemoryTransportReader::new(bytes);

        let result = IncomingSimplexConnection::new(&recogniser, &bob, &mut reader).read();

        assert_eq!(result, Err(SyncError::Transport(TransportError::Truncated)));
        assert_eq!(reader.disposed(), Some((true, true)));
    }

    #[test]
    fn driver_is_single_use() {
        let (bob, recogniser) = bob();
        let mut reader = MemoryTransportReader::new(Vec::new());
        let mut connection = IncomingSimplexConnection::new(&recogniser, &bob, &mut reader);

        assert!(connection.read().is_err());
        assert_eq!(connection.read(), Err(SyncError::AlreadyUsed));
    }
}
