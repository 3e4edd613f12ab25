//! Fuzz target for SyncRecord::decode
//!
//! Records arrive from authenticated peers, but a compromised or buggy peer
//! can still send anything. Decoding must fail cleanly.
//!
//! # Invariants
//!
//! - Decoding never panics
//! - Anything that decodes re-encodes and decodes to the same record

#![no_main]

use libfuzzer_sys::fuzz_target;
use murmur_sync::SyncRecord;

fuzz_target!(|data: &[u8]| {
    let Ok(record) = SyncRecord::decode(data) else {
        return;
    };
    let encoded = record.encode().unwrap();
    assert_eq!(SyncRecord::decode(&encoded).unwrap(), record);
});
