//! Property-based tests for the key hierarchy
//!
//! These tests verify the invariants every connection relies on:
//!
//! 1. **Determinism**: same secret, label and context always give the same key
//! 2. **Direction separation**: Alice and Bob never share tag or frame keys
//! 3. **Period separation**: consecutive rotation periods give unrelated secrets
//! 4. **Tag round-trip**: the right tag key recovers the stream number, a wrong
//!    one recognises nothing
//! 5. **Password round-trip**: the right password opens, a wrong one is invalid

use murmur_crypto::{
    AuthenticatedCipher, FrameIvKind, MAX_32_BIT_UNSIGNED, Role, SecretKey, TAG_LENGTH,
    decode_tag, decrypt_with_password, derive_frame_key, derive_initial_secret,
    derive_next_secret, derive_tag_key, encode_frame_iv, encode_tag,
    encrypt_with_password_params,
};
use proptest::prelude::*;

/// Strategy for non-blank secrets
fn arbitrary_secret() -> impl Strategy<Value = SecretKey> {
    any::<[u8; 32]>()
        .prop_filter("blank secret", |bytes| bytes.iter().any(|&b| b != 0))
        .prop_map(SecretKey::from_bytes)
}

fn arbitrary_role() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::Alice), Just(Role::Bob)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_derivation_is_deterministic(
        secret in arbitrary_secret(),
        stream in 0..=MAX_32_BIT_UNSIGNED,
        role in arbitrary_role(),
    ) {
        prop_assert_eq!(
            derive_frame_key(&secret, stream, role).unwrap(),
            derive_frame_key(&secret, stream, role).unwrap()
        );
        prop_assert_eq!(
            derive_tag_key(&secret, role).unwrap(),
            derive_tag_key(&secret, role).unwrap()
        );
    }

    #[test]
    fn prop_directions_are_separated(
        secret in arbitrary_secret(),
        stream in 0..=MAX_32_BIT_UNSIGNED,
    ) {
        prop_assert_ne!(
            derive_frame_key(&secret, stream, Role::Alice).unwrap(),
            derive_frame_key(&secret, stream, Role::Bob).unwrap()
        );
        prop_assert_ne!(
            derive_tag_key(&secret, Role::Alice).unwrap(),
            derive_tag_key(&secret, Role::Bob).unwrap()
        );
    }

    #[test]
    fn prop_streams_are_separated(
        secret in arbitrary_secret(),
        stream in 0..MAX_32_BIT_UNSIGNED,
        role in arbitrary_role(),
    ) {
        prop_assert_ne!(
            derive_frame_key(&secret, stream, role).unwrap(),
            derive_frame_key(&secret, stream + 1, role).unwrap()
        );
    }

    #[test]
    fn prop_periods_are_separated_and_unaliased(
        secret in arbitrary_secret(),
        period in 0..MAX_32_BIT_UNSIGNED,
    ) {
        let mut period_n = derive_next_secret(&secret, period).unwrap();
        let period_n1 = derive_next_secret(&period_n, period + 1).unwrap();
        let snapshot = period_n1.clone();

        prop_assert_ne!(&period_n, &period_n1);

        period_n.erase();
        prop_assert!(period_n.is_blank());
        prop_assert_eq!(period_n1, snapshot);
    }

    #[test]
    fn prop_transports_are_separated(
        secret in arbitrary_secret(),
        a in any::<u32>(),
        b in any::<u32>(),
    ) {
        prop_assume!(a != b);
        prop_assert_ne!(
            derive_initial_secret(&secret, a).unwrap(),
            derive_initial_secret(&secret, b).unwrap()
        );
    }

    #[test]
    fn prop_tag_roundtrip(
        secret in arbitrary_secret(),
        stream in 0..=MAX_32_BIT_UNSIGNED,
        role in arbitrary_role(),
    ) {
        let key = derive_tag_key(&secret, role).unwrap();
        let mut tag = [0u8; TAG_LENGTH];
        encode_tag(&mut tag, &key, stream).unwrap();

        prop_assert_eq!(decode_tag(&tag, &key), Some(stream));

        let other = derive_tag_key(&secret, role.peer()).unwrap();
        prop_assert_eq!(decode_tag(&tag, &other), None);
    }

    #[test]
    fn prop_frame_cipher_roundtrip(
        secret in arbitrary_secret(),
        frame_number in 0..=MAX_32_BIT_UNSIGNED,
        payload in prop::collection::vec(any::<u8>(), 0..2048),
    ) {
        let cipher = AuthenticatedCipher::new(&derive_frame_key(&secret, 0, Role::Alice).unwrap());
        let iv = encode_frame_iv(frame_number, FrameIvKind::Payload);

        let sealed = cipher.seal(&iv, b"", &payload).unwrap();
        prop_assert_eq!(cipher.open(&iv, b"", &sealed).unwrap(), payload);

        let wrong_iv = encode_frame_iv(frame_number + 1, FrameIvKind::Payload);
        prop_assert!(cipher.open(&wrong_iv, b"", &sealed).is_err());
    }
}

proptest! {
    // PBKDF2 dominates the runtime; keep the case count low.
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_password_roundtrip(
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        password in "[ -~]{1,32}",
        salt in any::<[u8; 16]>(),
        iv in any::<[u8; 16]>(),
        iterations in 1u32..8,
    ) {
        let sealed = encrypt_with_password_params(&plaintext, &password, salt, iv, iterations).unwrap();
        prop_assert_eq!(decrypt_with_password(&sealed, &password), Some(plaintext));

        let wrong = format!("{password}!");
        prop_assert_eq!(decrypt_with_password(&sealed, &wrong), None);
    }
}
