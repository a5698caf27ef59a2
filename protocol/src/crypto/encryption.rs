//! # Keeper Secret Sealing
//!
//! Keepers hand their secrets (salts, seeds) to the caller for storage, and
//! those secrets must never leave in the clear. Each secret is sealed with
//! AES-256-GCM under a key derived from the controller's passcode salt, so
//! only a client that knows the passcode can open them again. The key does
//! not depend on the controller's rotation index: rotating the controller's
//! signing key leaves every sealed secret readable.
//!
//! A sealed secret is unpadded base64url of `nonce || ciphertext || tag`,
//! with a fresh random 96-bit nonce per seal.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use thiserror::Error;

use super::hash::domain_separated_hash;
use super::salter::Salter;
use crate::config::{AES_NONCE_LENGTH, KEEPER_ENCRYPTION_CONTEXT};

/// Failures sealing or opening a secret.
///
/// A wrong key and a corrupted blob are indistinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncryptionError {
    #[error("sealing failed")]
    SealFailed,

    #[error("sealed secret could not be opened")]
    OpenFailed,

    #[error("sealed secret shorter than its {AES_NONCE_LENGTH}-byte nonce")]
    Truncated,

    #[error("sealed secret is not valid base64url text")]
    InvalidEncoding,
}

/// Seals and opens keeper secrets under a key bound to the controller.
#[derive(Clone)]
pub struct KeyCipher {
    aead: Aes256Gcm,
}

impl KeyCipher {
    /// Derive the cipher key from the controller's passcode salt.
    pub fn for_controller(salter: &Salter) -> Self {
        let key = domain_separated_hash(KEEPER_ENCRYPTION_CONTEXT, salter.raw());
        Self {
            aead: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Seal a text secret.
    pub fn seal(&self, secret: &str) -> Result<String, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .aead
            .encrypt(&nonce, secret.as_bytes())
            .map_err(|_| EncryptionError::SealFailed)?;
        let blob: Vec<u8> = nonce.iter().copied().chain(ciphertext).collect();
        Ok(URL_SAFE_NO_PAD.encode(blob))
    }

    /// Open a secret sealed by [`KeyCipher::seal`] under the same key.
    pub fn open(&self, sealed: &str) -> Result<String, EncryptionError> {
        let blob = URL_SAFE_NO_PAD
            .decode(sealed.as_bytes())
            .map_err(|_| EncryptionError::InvalidEncoding)?;
        if blob.len() < AES_NONCE_LENGTH {
            return Err(EncryptionError::Truncated);
        }
        let (nonce, ciphertext) = blob.split_at(AES_NONCE_LENGTH);
        let plain = self
            .aead
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| EncryptionError::OpenFailed)?;
        String::from_utf8(plain).map_err(|_| EncryptionError::OpenFailed)
    }
}

impl std::fmt::Debug for KeyCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyCipher(<redacted>)")
    }
}
