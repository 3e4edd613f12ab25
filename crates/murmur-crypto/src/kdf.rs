//! Secret and key derivation.
//!
//! Two KDFs back the whole hierarchy:
//!
//! - Counter-mode KDF (NIST SP 800-108, section 5.1) with HMAC-SHA-384 as the
//!   PRF. Input: `0x00 || label || u32_be(context) || output_length`.
//! - Concatenation KDF (NIST SP 800-56A, section 5.8) over length-prefixed
//!   fields, used once to turn raw key agreement output into a root secret.
//!
//! Labels are NUL-terminated ASCII and are part of the wire compatibility
//! surface: changing one changes every key derived under it.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha384};
use zeroize::Zeroize;

use crate::{
    CODE_BITS, MAX_32_BIT_UNSIGNED, SECRET_KEY_LENGTH, error::CryptoError, secret::SecretKey,
};

type HmacSha384 = Hmac<Sha384>;

pub(crate) const MASTER: &[u8] = b"MASTER\0";
const SALT: &[u8] = b"SALT\0";
const FIRST: &[u8] = b"FIRST\0";
const ROTATE: &[u8] = b"ROTATE\0";
const CODE: &[u8] = b"CODE\0";
const NONCE: &[u8] = b"NONCE\0";
const A_TAG: &[u8] = b"A_TAG\0";
const B_TAG: &[u8] = b"B_TAG\0";
const A_FRAME: &[u8] = b"A_FRAME\0";
const B_FRAME: &[u8] = b"B_FRAME\0";

/// Fixed symmetry-breaking role of one side of a contact pair.
///
/// Assigned once per pair (Alice is the side that initiated the key
/// agreement). Each role encrypts under its own labels, so the two directions
/// of a connection never share key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initiator of the key agreement
    Alice,
    /// Responder of the key agreement
    Bob,
}

impl Role {
    /// Role from the `alice` flag stored alongside a contact.
    pub fn from_alice(alice: bool) -> Self {
        if alice { Self::Alice } else { Self::Bob }
    }

    /// The other side of the pair.
    #[must_use]
    pub fn peer(self) -> Self {
        match self {
            Self::Alice => Self::Bob,
            Self::Bob => Self::Alice,
        }
    }

    /// Context integer distinguishing the two sides in single-label
    /// derivations (confirmation codes, invitation nonces).
    fn index(self) -> u64 {
        match self {
            Self::Alice => 0,
            Self::Bob => 1,
        }
    }
}

/// Derive the salt shared by a contact pair for group identifiers.
pub fn derive_group_salt(secret: &SecretKey) -> Result<[u8; SECRET_KEY_LENGTH], CryptoError> {
    let salt = counter_mode_kdf(secret, SALT, 0)?;
    Ok(*salt.as_bytes())
}

/// Derive the period-0 secret for one transport from the root secret.
pub fn derive_initial_secret(
    secret: &SecretKey,
    transport_index: u32,
) -> Result<SecretKey, CryptoError> {
    counter_mode_kdf(secret, FIRST, u64::from(transport_index))
}

/// Derive the secret for the next rotation period.
///
/// One-way: holding the result reveals nothing about `secret`, so erasing the
/// old period's secret gives forward secrecy.
pub fn derive_next_secret(secret: &SecretKey, period: u64) -> Result<SecretKey, CryptoError> {
    check_context(period)?;
    counter_mode_kdf(secret, ROTATE, period)
}

/// Derive the key that encrypts connection tags sent by `role`.
pub fn derive_tag_key(secret: &SecretKey, role: Role) -> Result<SecretKey, CryptoError> {
    let label = match role {
        Role::Alice => A_TAG,
        Role::Bob => B_TAG,
    };
    counter_mode_kdf(secret, label, 0)
}

/// Derive the key that encrypts frames of stream `stream_number` sent by
/// `role`.
pub fn derive_frame_key(
    secret: &SecretKey,
    stream_number: u64,
    role: Role,
) -> Result<SecretKey, CryptoError> {
    check_context(stream_number)?;
    let label = match role {
        Role::Alice => A_FRAME,
        Role::Bob => B_FRAME,
    };
    counter_mode_kdf(secret, label, stream_number)
}

/// Derive the two invitation confirmation codes `(alice, bob)`.
///
/// Each code is the first [`CODE_BITS`] bits of a KDF output, read
/// big-endian.
pub fn derive_confirmation_codes(secret: &SecretKey) -> Result<(u32, u32), CryptoError> {
    let alice = counter_mode_kdf(secret, CODE, Role::Alice.index())?;
    let bob = counter_mode_kdf(secret, CODE, Role::Bob.index())?;
    Ok((read_uint(alice.as_bytes(), CODE_BITS), read_uint(bob.as_bytes(), CODE_BITS)))
}

/// Derive the two invitation nonces `(alice, bob)`.
pub fn derive_invitation_nonces(
    secret: &SecretKey,
) -> Result<([u8; SECRET_KEY_LENGTH], [u8; SECRET_KEY_LENGTH]), CryptoError> {
    let alice = counter_mode_kdf(secret, NONCE, Role::Alice.index())?;
    let bob = counter_mode_kdf(secret, NONCE, Role::Bob.index())?;
    Ok((*alice.as_bytes(), *bob.as_bytes()))
}

/// Counter-mode KDF with HMAC-SHA-384 as the PRF.
///
/// Validates that the secret is not blank, the label is NUL-terminated and
/// the context fits in 32 bits. The 48-byte MAC is truncated to the key
/// length and the full MAC output is zeroized.
pub(crate) fn counter_mode_kdf(
    secret: &SecretKey,
    label: &[u8],
    context: u64,
) -> Result<SecretKey, CryptoError> {
    secret.check_usable()?;
    if label.last() != Some(&0) {
        return Err(CryptoError::MalformedLabel);
    }
    check_context(context)?;

    let Ok(mut prf) = HmacSha384::new_from_slice(secret.as_bytes()) else {
        unreachable!("HMAC-SHA-384 accepts any key size");
    };
    prf.update(&[0]); // Counter
    prf.update(label);
    prf.update(&(context as u32).to_be_bytes());
    prf.update(&[SECRET_KEY_LENGTH as u8]); // Output length

    let mut mac = prf.finalize().into_bytes();
    let mut output = [0u8; SECRET_KEY_LENGTH];
    output.copy_from_slice(&mac[..SECRET_KEY_LENGTH]);
    mac.as_mut_slice().zeroize();

    Ok(SecretKey::from_bytes(output))
}

/// Concatenation KDF over length-prefixed fields, hashed with the double
/// digest.
///
/// Every field must fit a one-byte length prefix.
pub(crate) fn concatenation_kdf(
    raw_secret: &[u8],
    label: &[u8],
    initiator_info: &[u8],
    responder_info: &[u8],
) -> Result<SecretKey, CryptoError> {
    let fields: [(&'static str, &[u8]); 4] = [
        ("raw_secret", raw_secret),
        ("label", label),
        ("initiator_info", initiator_info),
        ("responder_info", responder_info),
    ];

    let mut inner = Sha384::new();
    for (field, bytes) in fields {
        let len = u8::try_from(bytes.len())
            .map_err(|_| CryptoError::FieldTooLong { field, len: bytes.len() })?;
        inner.update([len]);
        inner.update(bytes);
    }

    let mut first = inner.finalize();
    let mut hash = Sha384::digest(first.as_slice());
    first.as_mut_slice().zeroize();

    let mut output = [0u8; SECRET_KEY_LENGTH];
    output.copy_from_slice(&hash[..SECRET_KEY_LENGTH]);
    hash.as_mut_slice().zeroize();

    Ok(SecretKey::from_bytes(output))
}

fn check_context(value: u64) -> Result<(), CryptoError> {
    if value > MAX_32_BIT_UNSIGNED { Err(CryptoError::ContextOutOfRange(value)) } else { Ok(()) }
}

/// Read the first `bits` bits of `bytes` as a big-endian unsigned integer.
pub(crate) fn read_uint(bytes: &[u8], bits: u32) -> u32 {
    debug_assert!(bits <= 32 && bytes.len() * 8 >= bits as usize);

    let mut result = 0u32;
    for i in 0..bits as usize {
        if bytes[i >> 3] & (0x80 >> (i & 7)) != 0 {
            result |= 1 << (bits as usize - i - 1);
        }
    }
    result
}
