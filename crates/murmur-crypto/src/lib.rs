//! Murmur Cryptographic Primitives
//!
//! Key hierarchy, connection tagging and authenticated encryption for Murmur
//! transport connections. Derivations are pure functions with deterministic
//! outputs; anything that needs randomness goes through a [`SecureRandom`]
//! handle owned by the [`CryptoEngine`].
//!
//! # Key Lifecycle
//!
//! A root secret is agreed once per contact pair. Every other key is derived
//! from it with the counter-mode KDF, so the labels below are part of the wire
//! compatibility surface.
//!
//! ```text
//! P-384 ECDH + concatenation KDF ("MASTER")
//!        │
//!        ▼
//! Root Secret ──("FIRST", transport index)──► Period 0 Secret
//!                                                │
//!                         ("ROTATE", period) ◄───┘  (one secret per period)
//!                                                │
//!                     ┌──────────────────────────┴────────────────────┐
//!                     ▼                                               ▼
//!   Tag Key ("A_TAG" / "B_TAG", 0)          Frame Key ("A_FRAME" / "B_FRAME", stream)
//!                     │                                               │
//!                     ▼                                               ▼
//!   AES block: u32(stream) || 0^12          AES-256-GCM, IV from frame number
//! ```
//!
//! # Security
//!
//! Forward Secrecy:
//! - Each rotation period has its own secret derived one-way from the previous
//! - Erasing period N's secret leaves nothing that recovers period N-1
//!
//! Direction Separation:
//! - Alice and Bob derive tag and frame keys under distinct labels, so the two
//!   directions of a contact pair never share key material
//! - Frame keys are also bound to the stream number, so no key/IV pair repeats
//!
//! Unlinkability:
//! - A tag is one raw AES block under a secret key; without the key it is
//!   indistinguishable from random bytes
//!
//! Erasure:
//! - [`SecretKey`] zeroizes on drop; intermediate MAC outputs, raw agreement
//!   output and password bytes are overwritten before release

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod agreement;
pub mod cipher;
pub mod engine;
pub mod error;
pub mod kdf;
pub mod password;
pub mod random;
pub mod secret;
pub mod tag;

pub use agreement::{
    AgreementKeyPair, SignatureKeyPair, derive_master_secret, message_digest,
    parse_agreement_public_key, verify_signature,
};
pub use cipher::{AuthenticatedCipher, FrameIvKind, encode_frame_iv};
pub use engine::{CryptoConfig, CryptoEngine};
pub use error::CryptoError;
pub use kdf::{
    Role, derive_confirmation_codes, derive_frame_key, derive_group_salt, derive_initial_secret,
    derive_invitation_nonces, derive_next_secret, derive_tag_key,
};
pub use password::{
    choose_iteration_count_with, decrypt_with_password, encrypt_with_password_params,
};
pub use random::{PlatformSeedProvider, SecureRandom, SecureRng, SeedProvider};
pub use secret::SecretKey;
pub use tag::{decode_tag, encode_tag};

/// Length of every symmetric key and derived secret (256-bit)
pub const SECRET_KEY_LENGTH: usize = 32;

/// AEAD authentication tag length (128-bit)
pub const MAC_LENGTH: usize = 16;

/// Frame cipher nonce length (96-bit)
pub const FRAME_IV_LENGTH: usize = 12;

/// Password store nonce length (128-bit)
pub const STORAGE_IV_LENGTH: usize = 16;

/// Password store salt length (128-bit)
pub const PBKDF_SALT_LENGTH: usize = 16;

/// Connection tag length: one AES block
pub const TAG_LENGTH: usize = 16;

/// Largest value accepted as a KDF context, stream number or period
pub const MAX_32_BIT_UNSIGNED: u64 = u32::MAX as u64;

/// Bits in an invitation or confirmation code
pub const CODE_BITS: u32 = 19;
