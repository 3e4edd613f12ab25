//! Fuzz target for ConnectionDecrypter
//!
//! Feeds the decrypter either raw attacker bytes or a genuine connection with
//! adversarial edits applied after the tag.
//!
//! # Invariants
//!
//! - The decrypter never panics
//! - An unmodified connection reads back exactly what was written
//! - Any edit to a genuine connection surfaces as an error, never as altered
//!   payload
//! - After the first error every further read reports `Faulted`

#![no_main]

use std::io::Cursor;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use murmur_crypto::{Role, SecretKey};
use murmur_transport::{
    ConnectionDecrypter, ConnectionEncrypter, MAX_FRAME_LENGTH, TAG_LENGTH, TransportError,
    read_tag,
};

#[derive(Debug, Arbitrary)]
enum Input {
    /// Bytes from nowhere
    Raw(Vec<u8>),
    /// A real connection, then edited
    Genuine { frames: Vec<Vec<u8>>, edits: Vec<Edit> },
}

#[derive(Debug, Arbitrary)]
enum Edit {
    FlipBit { position: u16, bit: u8 },
    Truncate { len: u16 },
    Append(Vec<u8>),
}

const SECRET: [u8; 32] = [0x42; 32];

fn read_all(bytes: Vec<u8>) -> Result<Vec<Vec<u8>>, TransportError> {
    let secret = SecretKey::from_bytes(SECRET);
    let mut input = Cursor::new(bytes);
    read_tag(&mut input)?;
    let mut decrypter = ConnectionDecrypter::new(input, MAX_FRAME_LENGTH, &secret, 0, Role::Alice)?;

    let mut frames = Vec::new();
    loop {
        match decrypter.read_frame() {
            Ok(Some(frame)) => frames.push(frame),
            Ok(None) => return Ok(frames),
            Err(e) => {
                assert_eq!(decrypter.read_frame(), Err(TransportError::Faulted));
                return Err(e);
            },
        }
    }
}

fuzz_target!(|input: Input| {
    match input {
        Input::Raw(bytes) => {
            let _ = read_all(bytes);
        },
        Input::Genuine { frames, edits } => {
            let secret = SecretKey::from_bytes(SECRET);
            let mut encrypter =
                ConnectionEncrypter::new(Vec::new(), u64::MAX, MAX_FRAME_LENGTH, &secret, 0, Role::Alice)
                    .unwrap();
            let frames: Vec<Vec<u8>> =
                frames.into_iter().take(8).map(|mut f| { f.truncate(1024); f }).collect();
            for frame in &frames {
                encrypter.write_frame(frame, false).unwrap();
            }
            encrypter.finish().unwrap();
            let original = encrypter.into_inner();

            let mut bytes = original.clone();
            for edit in edits {
                match edit {
                    Edit::FlipBit { position, bit } if bytes.len() > TAG_LENGTH => {
                        let index = TAG_LENGTH + usize::from(position) % (bytes.len() - TAG_LENGTH);
                        bytes[index] ^= 1 << (bit % 8);
                    },
                    Edit::Truncate { len } => bytes.truncate(usize::from(len)),
                    Edit::Append(extra) => bytes.extend_from_slice(&extra),
                    Edit::FlipBit { .. } => {},
                }
            }

            match read_all(bytes.clone()) {
                Ok(read) => {
                    // Trailing bytes after FINAL are ignored; anything else must match
                    if !frames.is_empty() {
                        assert_eq!(read, frames);
                        assert!(bytes.starts_with(&original));
                    }
                },
                Err(_) => assert!(frames.is_empty() || bytes != original),
            }
        },
    }
});
