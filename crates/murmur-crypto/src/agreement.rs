//! P-384 key agreement and signatures, and the root secret derivation.
//!
//! Public keys travel as SEC1 uncompressed points (97 bytes). The curve
//! arithmetic comes from the `p384` crate; this module only fixes encodings and
//! how the agreement output becomes a root secret.

use p384::{
    PublicKey,
    ecdh::diffie_hellman,
    ecdsa::{
        Signature, SigningKey, VerifyingKey,
        signature::{Signer, Verifier},
    },
    elliptic_curve::sec1::ToEncodedPoint,
};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha384};
use zeroize::Zeroize;

use crate::{
    error::CryptoError,
    kdf::{MASTER, concatenation_kdf},
    secret::SecretKey,
};

/// Encoded length of a P-384 public key (SEC1 uncompressed)
pub const PUBLIC_KEY_LENGTH: usize = 97;

/// Length of the raw ECDH output
const RAW_SECRET_LENGTH: usize = 48;

/// Length of [`message_digest`] output
pub const DIGEST_LENGTH: usize = 48;

/// Double SHA-384: `SHA-384(SHA-384(message))`.
pub fn message_digest(message: &[u8]) -> [u8; DIGEST_LENGTH] {
    let inner = Sha384::digest(message);
    let mut digest = [0u8; DIGEST_LENGTH];
    digest.copy_from_slice(&Sha384::digest(inner.as_slice()));
    digest
}

/// Decode and validate a peer's agreement public key.
pub fn parse_agreement_public_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    PublicKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidPublicKey)
}

/// Key pair for the one-off key agreement that establishes a root secret.
pub struct AgreementKeyPair {
    secret: p384::SecretKey,
    public_bytes: Vec<u8>,
}

impl AgreementKeyPair {
    /// Generate a fresh key pair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let secret = p384::SecretKey::random(rng);
        let public_bytes = secret.public_key().to_encoded_point(false).as_bytes().to_vec();
        Self { secret, public_bytes }
    }

    /// Encoded public key.
    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_bytes
    }
}

impl std::fmt::Debug for AgreementKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgreementKeyPair")
            .field("public", &self.public_bytes.len())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// ECDSA key pair over P-384 with SHA-384.
pub struct SignatureKeyPair {
    signing: SigningKey,
    public_bytes: Vec<u8>,
}

impl SignatureKeyPair {
    /// Generate a fresh key pair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let signing = SigningKey::random(rng);
        let public = PublicKey::from(signing.verifying_key());
        let public_bytes = public.to_encoded_point(false).as_bytes().to_vec();
        Self { signing, public_bytes }
    }

    /// Encoded public key.
    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_bytes
    }

    /// Sign `message`, returning the fixed-size `r || s` encoding.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing.sign(message);
        signature.to_bytes().to_vec()
    }
}

impl std::fmt::Debug for SignatureKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureKeyPair")
            .field("public", &self.public_bytes.len())
            .field("signing", &"[REDACTED]")
            .finish()
    }
}

/// Verify a signature made by [`SignatureKeyPair::sign`].
///
/// # Errors
///
/// - `InvalidPublicKey`: key bytes are not a valid point
/// - `InvalidSignature`: malformed signature or verification failed
pub fn verify_signature(
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let public = parse_agreement_public_key(public_key)?;
    let verifying = VerifyingKey::from(&public);
    let signature = Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
    verifying.verify(message, &signature).map_err(|_| CryptoError::InvalidSignature)
}

/// Derive the root secret shared with a contact.
///
/// Runs ECDH, then feeds the raw output through the concatenation KDF with the
/// digests of both public keys. The digests are ordered by role, not by key
/// content: the initiator's digest always comes first, so both sides build the
/// same input.
pub fn derive_master_secret(
    their_public_key: &[u8],
    ours: &AgreementKeyPair,
    initiator: bool,
) -> Result<SecretKey, CryptoError> {
    let theirs = parse_agreement_public_key(their_public_key)?;

    let shared = diffie_hellman(ours.secret.to_nonzero_scalar(), theirs.as_affine());
    let mut raw = [0u8; RAW_SECRET_LENGTH];
    raw.copy_from_slice(shared.raw_secret_bytes().as_slice());
    drop(shared);

    let our_hash = message_digest(ours.public_key_bytes());
    let their_hash = message_digest(their_public_key);
    let (initiator_info, responder_info) =
        if initiator { (&our_hash, &their_hash) } else { (&their_hash, &our_hash) };

    let master = concatenation_kdf(&raw, MASTER, initiator_info, responder_info);
    raw.zeroize();
    master
}
