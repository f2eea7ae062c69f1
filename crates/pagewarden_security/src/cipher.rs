//! AES-256-GCM encryption for event payloads.
//!
//! Ciphertext format: `pw1$` marker followed by base64(nonce || ciphertext).
//! The (scan, partition) pair is bound as associated data, so a payload
//! cannot be decrypted under a different scan's identity.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use pagewarden_protocol::{PartitionKey, ScanId};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Marker prefixed to every ciphertext this cipher produces.
const MARKER: &str = "pw1$";
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    Encrypt,

    #[error("Decryption failed (wrong key or tampered payload)")]
    Decrypt,

    #[error("Value is not a Pagewarden ciphertext")]
    NotEncrypted,

    #[error("Malformed ciphertext: {0}")]
    Malformed(String),
}

/// Metadata bound to a payload as associated data.
#[derive(Debug, Clone)]
pub struct PayloadMeta {
    pub scan_id: ScanId,
    pub partition_key: PartitionKey,
}

impl PayloadMeta {
    pub fn new(scan_id: ScanId, partition_key: PartitionKey) -> Self {
        Self {
            scan_id,
            partition_key,
        }
    }

    fn aad(&self) -> Vec<u8> {
        format!("{}/{}", self.scan_id, self.partition_key).into_bytes()
    }
}

/// Symmetric cipher for findings payloads. Cheap to clone.
#[derive(Clone)]
pub struct FindingsCipher {
    cipher: Aes256Gcm,
}

impl FindingsCipher {
    /// Derive the key from a passphrase via SHA-256.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let key: [u8; 32] = digest.into();
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    /// Encrypt a plaintext under the given metadata.
    pub fn encrypt(&self, plaintext: &str, meta: &PayloadMeta) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: &meta.aad(),
                },
            )
            .map_err(|_| CryptoError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        Ok(format!(
            "{}{}",
            MARKER,
            base64::engine::general_purpose::STANDARD.encode(blob)
        ))
    }

    /// Decrypt a ciphertext produced by [`encrypt`](Self::encrypt) under the
    /// same metadata.
    pub fn decrypt(&self, value: &str, meta: &PayloadMeta) -> Result<String, CryptoError> {
        let encoded = value.strip_prefix(MARKER).ok_or(CryptoError::NotEncrypted)?;
        let blob = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::Malformed(e.to_string()))?;
        if blob.len() < NONCE_LEN {
            return Err(CryptoError::Malformed("truncated nonce".to_string()));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad: &meta.aad(),
                },
            )
            .map_err(|_| CryptoError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::Malformed(e.to_string()))
    }

    /// Whether a stored value is one of this cipher's ciphertexts.
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> PayloadMeta {
        PayloadMeta::new("scan-1".into(), "SPACE".into())
    }

    #[test]
    fn round_trip() {
        let cipher = FindingsCipher::from_passphrase("hunter2");
        for input in ["", "x", "{\"findings\":[]}", "unicode: héllo ✓"] {
            let ct = cipher.encrypt(input, &meta()).unwrap();
            assert!(FindingsCipher::is_encrypted(&ct));
            assert_eq!(cipher.decrypt(&ct, &meta()).unwrap(), input);
        }
    }

    #[test]
    fn classifies_plaintext_vs_ciphertext() {
        let cipher = FindingsCipher::from_passphrase("k");
        let ct = cipher.encrypt("data", &meta()).unwrap();
        assert!(FindingsCipher::is_encrypted(&ct));
        assert!(!FindingsCipher::is_encrypted("data"));
        assert!(!FindingsCipher::is_encrypted(""));
    }

    #[test]
    fn wrong_key_fails() {
        let cipher = FindingsCipher::from_passphrase("a");
        let other = FindingsCipher::from_passphrase("b");
        let ct = cipher.encrypt("secret", &meta()).unwrap();
        assert!(matches!(
            other.decrypt(&ct, &meta()),
            Err(CryptoError::Decrypt)
        ));
    }

    #[test]
    fn metadata_is_bound() {
        let cipher = FindingsCipher::from_passphrase("k");
        let ct = cipher.encrypt("secret", &meta()).unwrap();
        let other_meta = PayloadMeta::new("scan-2".into(), "SPACE".into());
        assert!(matches!(
            cipher.decrypt(&ct, &other_meta),
            Err(CryptoError::Decrypt)
        ));
    }

    #[test]
    fn nonces_differ_across_calls() {
        let cipher = FindingsCipher::from_passphrase("k");
        let a = cipher.encrypt("same", &meta()).unwrap();
        let b = cipher.encrypt("same", &meta()).unwrap();
        assert_ne!(a, b);
    }
}
