//! Fuzz target for IncomingSimplexConnection
//!
//! Runs the whole receive path (tag, recognition, frames, records, storage)
//! over arbitrary bytes.
//!
//! # Invariants
//!
//! - Reading never panics
//! - The reader is always disposed exactly once
//! - Unrecognised connections are never reported as exceptions

#![no_main]

use libfuzzer_sys::fuzz_target;
use murmur_crypto::{Role, SecretKey};
use murmur_sync::{IncomingSimplexConnection, MemorySyncStorage, ReadOutcome};
use murmur_transport::{ContactId, MemoryTagRecogniser, MemoryTransportReader, TransportIndex};

fuzz_target!(|data: &[u8]| {
    let storage = MemorySyncStorage::new();
    storage
        .add_contact(ContactId(1), &SecretKey::from_bytes([0x42; 32]), Role::Bob, &[TransportIndex(0)])
        .unwrap();
    let recogniser = MemoryTagRecogniser::new();
    storage.expect_incoming(&recogniser).unwrap();

    let mut reader = MemoryTransportReader::new(data.to_vec());
    let result = IncomingSimplexConnection::new(&recogniser, &storage, &mut reader).read();

    let disposed = reader.disposed().expect("reader not disposed");
    match result {
        Ok(ReadOutcome::Unrecognised) => assert_eq!(disposed, (false, false)),
        Ok(ReadOutcome::Completed { .. }) => assert_eq!(disposed, (false, true)),
        Err(_) => assert!(disposed.0),
    }
});
