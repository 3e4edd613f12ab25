//! Fuzz target for MemoryTagRecogniser
//!
//! # Invariants
//!
//! - Recognising arbitrary tags never panics
//! - A tag is recognised at most once
//! - Recognised stream numbers lie inside the window the contact was added with

#![no_main]

use std::collections::HashSet;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use murmur_crypto::{Role, SecretKey, derive_tag_key, encode_tag};
use murmur_transport::{ContactId, MemoryTagRecogniser, TAG_LENGTH, TagRecogniser, TransportIndex};

#[derive(Debug, Arbitrary)]
enum Tag {
    /// Bytes from nowhere
    Raw([u8; TAG_LENGTH]),
    /// A tag the peer could really send for this stream number
    Genuine(u8),
}

#[derive(Debug, Arbitrary)]
struct Scenario {
    secret: [u8; 32],
    window: u8,
    first_stream: u16,
    tags: Vec<Tag>,
}

fuzz_target!(|scenario: Scenario| {
    let secret = SecretKey::from_bytes(scenario.secret);
    if secret.is_blank() {
        return;
    }

    let window = usize::from(scenario.window.max(1));
    let first = u64::from(scenario.first_stream);
    let recogniser = MemoryTagRecogniser::with_window(window);
    recogniser
        .add_contact(ContactId(1), TransportIndex(0), secret.clone(), Role::Bob, first)
        .unwrap();
    let peer_tag_key = derive_tag_key(&secret, Role::Alice).unwrap();

    let mut seen = HashSet::new();
    for tag in scenario.tags.into_iter().take(256) {
        let bytes = match tag {
            Tag::Raw(bytes) => bytes,
            Tag::Genuine(offset) => {
                let mut bytes = [0u8; TAG_LENGTH];
                encode_tag(&mut bytes, &peer_tag_key, first + u64::from(offset)).unwrap();
                bytes
            },
        };

        if let Some(context) = recogniser.recognise(&bytes).unwrap() {
            assert!(seen.insert(context.stream_number), "stream recognised twice");
            assert!(context.stream_number >= first);
            assert_eq!(context.role, Role::Bob);
        }
    }
});
