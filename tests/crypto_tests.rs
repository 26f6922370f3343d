//! Integration tests for the ArtVault crypto module.

use std::collections::HashSet;

use artvault::crypto::cipher::{self, ArtifactContext};
use artvault::crypto::encryption::{open, seal};
use artvault::crypto::{
    derive, generate_salt, unwrap_key, wrap_key, KdfFloor, KdfParams, VaultMasterKey,
};
use artvault::errors::ArtVaultError;
use artvault::vault::format::{decode_record, encode_record};
use proptest::prelude::*;

const FAST: KdfParams = KdfParams {
    memory_kib: 8_192,
    iterations: 1,
    parallelism: 1,
};

fn ctx(artifact: &str) -> ArtifactContext {
    ArtifactContext::new("0b7f5a9e-3c1d-4b8e-9a51-2f6c0d4e8a17", artifact)
}

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

#[test]
fn derivation_is_deterministic_and_password_sensitive() {
    let salt = generate_salt();
    let a = derive(b"correct horse", &salt, &FAST, &KdfFloor::BUILTIN).unwrap();
    let b = derive(b"correct horse", &salt, &FAST, &KdfFloor::BUILTIN).unwrap();
    let c = derive(b"correct horsf", &salt, &FAST, &KdfFloor::BUILTIN).unwrap();

    assert_eq!(a.kek.as_bytes(), b.kek.as_bytes());
    assert_eq!(a.verifier.as_bytes(), b.verifier.as_bytes());
    assert_ne!(a.kek.as_bytes(), c.kek.as_bytes());
    assert_ne!(a.verifier.as_bytes(), a.kek.as_bytes());
}

#[test]
fn weak_parameters_are_refused() {
    let weak = KdfParams {
        memory_kib: 1_024,
        ..FAST
    };
    assert!(matches!(
        derive(b"pw", &generate_salt(), &weak, &KdfFloor::BUILTIN),
        Err(ArtVaultError::WeakParameters(_))
    ));
}

// ---------------------------------------------------------------------------
// Key wrapping
// ---------------------------------------------------------------------------

#[test]
fn wrapped_key_only_unwraps_for_its_owner() {
    let keys = derive(b"pw-123456", &generate_salt(), &FAST, &KdfFloor::BUILTIN).unwrap();
    let vmk = VaultMasterKey::generate();

    let wrapped = wrap_key(&keys.kek, &vmk, "alice-id").unwrap();
    let back = unwrap_key(&keys.kek, &wrapped, "alice-id").unwrap();
    assert!(back.same_key(&vmk));

    assert!(matches!(
        unwrap_key(&keys.kek, &wrapped, "mallory-id"),
        Err(ArtVaultError::AuthenticationFailed)
    ));
}

// ---------------------------------------------------------------------------
// Artifact cipher
// ---------------------------------------------------------------------------

#[test]
fn nonces_never_repeat() {
    let key = [0x42u8; 32];
    let mut seen = HashSet::new();
    for _ in 0..20_000 {
        let sealed = seal(&key, b"x", b"").unwrap();
        assert!(seen.insert(sealed.nonce), "nonce reused");
    }
}

#[test]
fn record_from_another_vault_key_is_a_key_mismatch() {
    let vmk = VaultMasterKey::generate();
    let other = VaultMasterKey::generate();
    let record = cipher::encrypt(&vmk, &ctx("img-1"), b"png", b"{}").unwrap();

    assert!(matches!(
        cipher::decrypt(&other, &record),
        Err(ArtVaultError::KeyDerivationMismatch)
    ));
}

#[test]
fn swapping_metadata_between_records_is_detected() {
    let vmk = VaultMasterKey::generate();
    let a = cipher::encrypt(&vmk, &ctx("img-1"), b"first", br#"{"prompt":"a"}"#).unwrap();
    let mut b = cipher::encrypt(&vmk, &ctx("img-1"), b"second", br#"{"prompt":"b"}"#).unwrap();

    // Same owner and id, so only the payload/metadata binding can catch it.
    b.metadata_nonce = a.metadata_nonce.clone();
    b.metadata_ciphertext = a.metadata_ciphertext.clone();
    assert!(matches!(
        cipher::decrypt(&vmk, &b),
        Err(ArtVaultError::AuthenticationFailed)
    ));
}

#[test]
fn fingerprint_is_keyed() {
    let vmk = VaultMasterKey::generate();
    let other = VaultMasterKey::generate();
    assert_eq!(
        cipher::fingerprint(&vmk, b"same").unwrap(),
        cipher::fingerprint(&vmk, b"same").unwrap()
    );
    assert_ne!(
        cipher::fingerprint(&vmk, b"same").unwrap(),
        cipher::fingerprint(&other, b"same").unwrap()
    );
}

#[test]
fn tampered_aad_fails_to_open() {
    let key = [0x07u8; 32];
    let sealed = seal(&key, b"payload", b"owner:alice").unwrap();
    assert!(open(&key, &sealed.nonce, &sealed.ciphertext, b"owner:alice").is_ok());
    assert!(open(&key, &sealed.nonce, &sealed.ciphertext, b"owner:bob").is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn encrypt_then_decrypt_returns_the_input(
        payload in proptest::collection::vec(any::<u8>(), 0..2048),
        metadata in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let vmk = VaultMasterKey::generate();
        let record = cipher::encrypt(&vmk, &ctx("prop"), &payload, &metadata).unwrap();

        let stored = decode_record(&encode_record(&record).unwrap()).unwrap();
        let out = cipher::decrypt(&vmk, &stored).unwrap();
        prop_assert_eq!(&out.payload[..], &payload[..]);
        prop_assert_eq!(&out.metadata[..], &metadata[..]);
    }

    #[test]
    fn any_flipped_ciphertext_bit_is_rejected(
        payload in proptest::collection::vec(any::<u8>(), 1..512),
        pos in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let vmk = VaultMasterKey::generate();
        let mut record = cipher::encrypt(&vmk, &ctx("prop"), &payload, b"{}").unwrap();
        let i = pos.index(record.ciphertext.len());
        record.ciphertext[i] ^= 1 << bit;

        prop_assert!(matches!(
            cipher::decrypt(&vmk, &record),
            Err(ArtVaultError::AuthenticationFailed)
        ));
    }

    #[test]
    fn any_flipped_metadata_bit_is_rejected(
        metadata in proptest::collection::vec(any::<u8>(), 0..256),
        pos in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let vmk = VaultMasterKey::generate();
        let mut record = cipher::encrypt(&vmk, &ctx("prop"), b"payload", &metadata).unwrap();
        // Covers the GCM tag, which is the whole ciphertext when metadata is empty.
        let i = pos.index(record.metadata_ciphertext.len());
        record.metadata_ciphertext[i] ^= 1 << bit;

        prop_assert!(matches!(
            cipher::decrypt(&vmk, &record),
            Err(ArtVaultError::AuthenticationFailed)
        ));
    }

    #[test]
    fn any_flipped_metadata_nonce_bit_is_rejected(
        pos in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let vmk = VaultMasterKey::generate();
        let mut record = cipher::encrypt(&vmk, &ctx("prop"), b"payload", b"{}").unwrap();
        let i = pos.index(record.metadata_nonce.len());
        record.metadata_nonce[i] ^= 1 << bit;

        prop_assert!(matches!(
            cipher::decrypt(&vmk, &record),
            Err(ArtVaultError::AuthenticationFailed)
        ));
    }
}
