//! Connection tags.
//!
//! A tag is one AES-256 block: `u32_be(stream_number) || 0^12` encrypted under
//! a per-direction tag key. To anyone without the key it is 16 random-looking
//! bytes; the holder of the key decrypts it and checks the zero padding to
//! recognise the sender and recover the stream number.

use aes::{
    Aes256,
    cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray},
};

use crate::{MAX_32_BIT_UNSIGNED, TAG_LENGTH, error::CryptoError, secret::SecretKey};

/// Encode `stream_number` into `buffer` under `tag_key`.
///
/// # Errors
///
/// - `BufferTooShort`: `buffer` shorter than [`TAG_LENGTH`]
/// - `ContextOutOfRange`: stream number above 2^32 - 1
/// - `BlankSecret`: tag key is all zero
pub fn encode_tag(
    buffer: &mut [u8],
    tag_key: &SecretKey,
    stream_number: u64,
) -> Result<(), CryptoError> {
    if buffer.len() < TAG_LENGTH {
        return Err(CryptoError::BufferTooShort { expected: TAG_LENGTH, actual: buffer.len() });
    }
    if stream_number > MAX_32_BIT_UNSIGNED {
        return Err(CryptoError::ContextOutOfRange(stream_number));
    }
    tag_key.check_usable()?;

    let block = &mut buffer[..TAG_LENGTH];
    block.fill(0);
    block[0..4].copy_from_slice(&(stream_number as u32).to_be_bytes());

    let cipher = Aes256::new(tag_key.as_bytes().into());
    cipher.encrypt_block(GenericArray::from_mut_slice(block));
    Ok(())
}

/// Try to decode `tag` under `tag_key`.
///
/// Returns the stream number if the padding decrypts to zero, `None`
/// otherwise. A wrong key yields `None` except with probability 2^-96.
pub fn decode_tag(tag: &[u8; TAG_LENGTH], tag_key: &SecretKey) -> Option<u64> {
    if tag_key.is_blank() {
        return None;
    }

    let mut block = *tag;
    let cipher = Aes256::new(tag_key.as_bytes().into());
    cipher.decrypt_block(GenericArray::from_mut_slice(&mut block));

    if block[4..].iter().any(|&b| b != 0) {
        return None;
    }
    let stream = u32::from_be_bytes([block[0], block[1], block[2], block[3]]);
    Some(u64::from(stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> SecretKey {
        SecretKey::from_bytes([byte; 32])
    }

    #[test]
    fn tag_roundtrip() {
        let mut tag = [0u8; TAG_LENGTH];
        encode_tag(&mut tag, &key(5), 1234).unwrap();
        assert_eq!(decode_tag(&tag, &key(5)), Some(1234));
    }

    #[test]
    fn wrong_key_does_not_recognise() {
        let mut tag = [0u8; TAG_LENGTH];
        encode_tag(&mut tag, &key(5), 7).unwrap();
        assert_eq!(decode_tag(&tag, &key(6)), None);
    }

    #[test]
    fn tag_hides_stream_number() {
        let mut tag = [0u8; TAG_LENGTH];
        encode_tag(&mut tag, &key(5), 0).unwrap();
        assert_ne!(tag, [0u8; TAG_LENGTH]);
        assert!(tag[4..].iter().any(|&b| b != 0));
    }

    #[test]
    fn encode_only_touches_tag_prefix() {
        let mut buffer = [0xEEu8; TAG_LENGTH + 4];
        encode_tag(&mut buffer, &key(1), 9).unwrap();
        assert_eq!(&buffer[TAG_LENGTH..], &[0xEE; 4]);
    }

    #[test]
    fn encode_rejects_bad_arguments() {
        let mut short = [0u8; TAG_LENGTH - 1];
        assert_eq!(
            encode_tag(&mut short, &key(1), 0),
            Err(CryptoError::BufferTooShort { expected: TAG_LENGTH, actual: TAG_LENGTH - 1 })
        );

        let mut tag = [0u8; TAG_LENGTH];
        assert_eq!(
            encode_tag(&mut tag, &key(1), MAX_32_BIT_UNSIGNED + 1),
            Err(CryptoError::ContextOutOfRange(MAX_32_BIT_UNSIGNED + 1))
        );
        assert_eq!(encode_tag(&mut tag, &key(0), 0), Err(CryptoError::BlankSecret));
    }

    #[test]
    fn max_stream_number_roundtrips() {
        let mut tag = [0u8; TAG_LENGTH];
        encode_tag(&mut tag, &key(3), MAX_32_BIT_UNSIGNED).unwrap();
        assert_eq!(decode_tag(&tag, &key(3)), Some(MAX_32_BIT_UNSIGNED));
    }
}
