//! AES-256-GCM authenticated encryption with associated data.
//!
//! Each call to `seal` generates a fresh random 12-byte nonce and
//! returns it next to the ciphertext.  `open` verifies the 16-byte tag
//! over ciphertext *and* associated data before releasing any bytes.

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::keys::{KeyEncryptionKey, VaultMasterKey, KEY_LEN};
use crate::errors::{ArtVaultError, Result};
use crate::vault::format::{base64_decode, base64_encode};

/// Size of the AES-256-GCM nonce in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Size of the AES-256-GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Associated-data prefix for wrapped master keys.
const WRAP_AAD: &[u8] = b"artvault-wrap-v1:";

/// Output of one `seal` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext with the 16-byte tag appended.
    pub ciphertext: Vec<u8>,
}

/// Encrypt and authenticate `plaintext`, binding `aad` into the tag.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Sealed> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| ArtVaultError::EncryptionFailed(format!("invalid key length: {e}")))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| ArtVaultError::EncryptionFailed(format!("encryption error: {e}")))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(&nonce);
    Ok(Sealed {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Verify and decrypt.  Fails closed with `AuthenticationFailed`.
pub fn open(
    key: &[u8; KEY_LEN],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if nonce.len() != NONCE_LEN || ciphertext.len() < TAG_LEN {
        return Err(ArtVaultError::AuthenticationFailed);
    }

    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|_| ArtVaultError::AuthenticationFailed)?;

    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| ArtVaultError::AuthenticationFailed)?;

    Ok(Zeroizing::new(plaintext))
}

/// A Vault Master Key sealed under a key-encryption key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub nonce: Vec<u8>,
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub ciphertext: Vec<u8>,
}

/// Wrap `vmk` under `kek`, bound to the owning user's id.
pub fn wrap_key(kek: &KeyEncryptionKey, vmk: &VaultMasterKey, owner: &str) -> Result<WrappedKey> {
    let aad = [WRAP_AAD, owner.as_bytes()].concat();
    let sealed = seal(kek.as_bytes(), vmk.as_bytes(), &aad)?;
    Ok(WrappedKey {
        nonce: sealed.nonce.to_vec(),
        ciphertext: sealed.ciphertext,
    })
}

/// Unwrap a master key previously produced by `wrap_key`.
pub fn unwrap_key(
    kek: &KeyEncryptionKey,
    wrapped: &WrappedKey,
    owner: &str,
) -> Result<VaultMasterKey> {
    let aad = [WRAP_AAD, owner.as_bytes()].concat();
    let bytes = open(kek.as_bytes(), &wrapped.nonce, &wrapped.ciphertext, &aad)?;
    VaultMasterKey::from_slice(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip_with_aad() {
        let key = [0x11u8; KEY_LEN];
        let sealed = seal(&key, b"pixels", b"ctx").unwrap();
        assert_eq!(sealed.ciphertext.len(), b"pixels".len() + TAG_LEN);
        let plain = open(&key, &sealed.nonce, &sealed.ciphertext, b"ctx").unwrap();
        assert_eq!(plain.as_slice(), b"pixels");
    }

    #[test]
    fn open_with_different_aad_fails() {
        let key = [0x22u8; KEY_LEN];
        let sealed = seal(&key, b"data", b"owner-a").unwrap();
        let result = open(&key, &sealed.nonce, &sealed.ciphertext, b"owner-b");
        assert!(matches!(result, Err(ArtVaultError::AuthenticationFailed)));
    }

    #[test]
    fn open_rejects_truncated_input() {
        let key = [0x33u8; KEY_LEN];
        assert!(open(&key, &[0u8; 5], &[0u8; 32], b"").is_err());
        assert!(open(&key, &[0u8; NONCE_LEN], &[0u8; 4], b"").is_err());
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        let kek = KeyEncryptionKey::new([0x55; KEY_LEN]);
        let vmk = VaultMasterKey::generate();
        let wrapped = wrap_key(&kek, &vmk, "user-1").unwrap();
        let back = unwrap_key(&kek, &wrapped, "user-1").unwrap();
        assert!(back.same_key(&vmk));
    }

    #[test]
    fn unwrap_for_other_owner_fails() {
        let kek = KeyEncryptionKey::new([0x66; KEY_LEN]);
        let vmk = VaultMasterKey::generate();
        let wrapped = wrap_key(&kek, &vmk, "user-1").unwrap();
        assert!(unwrap_key(&kek, &wrapped, "user-2").is_err());
    }

    #[test]
    fn unwrap_with_wrong_kek_fails() {
        let vmk = VaultMasterKey::generate();
        let wrapped = wrap_key(&KeyEncryptionKey::new([1; KEY_LEN]), &vmk, "u").unwrap();
        let result = unwrap_key(&KeyEncryptionKey::new([2; KEY_LEN]), &wrapped, "u");
        assert!(matches!(result, Err(ArtVaultError::AuthenticationFailed)));
    }
}
