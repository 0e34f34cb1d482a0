#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pii-crypto** – Per-record authenticated encryption for sensitive PII
//! scan fields.
//!
//! Every call to [`CryptoService::encrypt`] derives a fresh 256-bit key from
//! the process-wide KEK via HKDF-SHA256, salted per record, and seals the
//! plaintext with AES-256-GCM. The emitted token carries everything needed
//! to reverse the operation except the KEK itself:
//! `ENC:v1:<salt_b64>:<iv_b64>:<ciphertext_with_tag_b64>`. Key provisioning
//! (how the KEK reaches this process) is out of scope for this crate; it
//! only ever sees 32 already-decoded bytes.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

const TOKEN_PREFIX: &str = "ENC:v1:";
const SALT_LEN: usize = 32;
const IV_LEN: usize = 12;
const DEK_INFO_LABEL: &[u8] = b"pii-scan-engine/record-dek/v1";

/// Errors raised by encryption and decryption.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncryptionError {
    /// The AEAD cipher rejected the ciphertext: either the tag failed to
    /// verify, the key was wrong, or the AAD did not match what was sealed.
    #[error("decryption failed: integrity check did not pass")]
    IntegrityCheckFailed,

    /// The token did not start with `ENC:v1:` or did not have the expected
    /// `salt:iv:ciphertext` segment structure.
    #[error("malformed encryption token")]
    MalformedToken,

    /// A base64 segment of the token failed to decode.
    #[error("invalid base64 in token: {0}")]
    InvalidBase64(String),

    /// A decoded segment did not have the expected byte length.
    #[error("invalid {field} length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Name of the offending segment.
        field: &'static str,
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        actual: usize,
    },
}

/// Additional authenticated data bound to a ciphertext but not itself
/// encrypted: the PII type and span of the value being protected. Any
/// change to these fields after encryption causes decryption to fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionMetadata {
    /// PII type name (e.g. `"EMAIL_ADDRESS"`).
    pub pii_type: String,
    /// Start offset of the protected span in the source text.
    pub position_begin: usize,
    /// End offset of the protected span in the source text.
    pub position_end: usize,
}

impl EncryptionMetadata {
    /// Construct the AAD bytes: `type|begin|end`.
    fn aad_bytes(&self) -> Vec<u8> {
        format!(
            "{}|{}|{}",
            self.pii_type, self.position_begin, self.position_end
        )
        .into_bytes()
    }
}

/// Stateless encryption/decryption service over a single process-wide KEK.
///
/// The KEK is held in a [`Zeroizing`] buffer and wiped on drop. No key
/// material is ever persisted or logged by this crate.
pub struct CryptoService {
    kek: Zeroizing<[u8; 32]>,
}

impl CryptoService {
    /// Construct a service from 32 already-decoded KEK bytes.
    pub fn new(kek: [u8; 32]) -> Self {
        Self {
            kek: Zeroizing::new(kek),
        }
    }

    fn derive_dek(&self, salt: &[u8]) -> Zeroizing<[u8; 32]> {
        let hk = Hkdf::<Sha256>::new(Some(salt), self.kek.as_slice());
        let mut dek = Zeroizing::new([0u8; 32]);
        hk.expand(DEK_INFO_LABEL, dek.as_mut_slice())
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        dek
    }

    /// Encrypt `plaintext`, binding `metadata` as AAD, and return the
    /// `ENC:v1:...` token.
    pub fn encrypt(
        &self,
        plaintext: &str,
        metadata: &EncryptionMetadata,
    ) -> Result<String, EncryptionError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let dek = self.derive_dek(&salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(dek.as_slice()));
        let nonce = Nonce::from_slice(&iv);

        let ct = cipher
            .encrypt(
                nonce,
                aes_gcm::aead::Payload {
                    msg: plaintext.as_bytes(),
                    aad: &metadata.aad_bytes(),
                },
            )
            .map_err(|_| EncryptionError::IntegrityCheckFailed)?;

        Ok(format!(
            "{TOKEN_PREFIX}{}:{}:{}",
            BASE64.encode(salt),
            BASE64.encode(iv),
            BASE64.encode(ct)
        ))
    }

    /// Decrypt a `ENC:v1:...` token, verifying it against `metadata`.
    pub fn decrypt(
        &self,
        token: &str,
        metadata: &EncryptionMetadata,
    ) -> Result<String, EncryptionError> {
        let body = token
            .strip_prefix(TOKEN_PREFIX)
            .ok_or(EncryptionError::MalformedToken)?;
        let mut parts = body.splitn(3, ':');
        let (salt_b64, iv_b64, ct_b64) = match (parts.next(), parts.next(), parts.next()) {
            (Some(s), Some(i), Some(c)) => (s, i, c),
            _ => return Err(EncryptionError::MalformedToken),
        };

        let salt = BASE64
            .decode(salt_b64)
            .map_err(|e| EncryptionError::InvalidBase64(e.to_string()))?;
        let iv = BASE64
            .decode(iv_b64)
            .map_err(|e| EncryptionError::InvalidBase64(e.to_string()))?;
        let ct = BASE64
            .decode(ct_b64)
            .map_err(|e| EncryptionError::InvalidBase64(e.to_string()))?;

        if salt.len() != SALT_LEN {
            return Err(EncryptionError::InvalidLength {
                field: "salt",
                expected: SALT_LEN,
                actual: salt.len(),
            });
        }
        if iv.len() != IV_LEN {
            return Err(EncryptionError::InvalidLength {
                field: "iv",
                expected: IV_LEN,
                actual: iv.len(),
            });
        }

        let dek = self.derive_dek(&salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(dek.as_slice()));
        let nonce = Nonce::from_slice(&iv);

        let plaintext = cipher
            .decrypt(
                nonce,
                aes_gcm::aead::Payload {
                    msg: &ct,
                    aad: &metadata.aad_bytes(),
                },
            )
            .map_err(|_| EncryptionError::IntegrityCheckFailed)?;

        String::from_utf8(plaintext).map_err(|_| EncryptionError::IntegrityCheckFailed)
    }

    /// `true` if `value` is shaped like a token this service produced
    /// (carries the `ENC:v1:` prefix). Does not verify the token decodes or
    /// decrypts successfully.
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(TOKEN_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> CryptoService {
        CryptoService::new([7u8; 32])
    }

    fn metadata() -> EncryptionMetadata {
        EncryptionMetadata {
            pii_type: "EMAIL".to_string(),
            position_begin: 0,
            position_end: 7,
        }
    }

    #[test]
    fn round_trips_plaintext() {
        let svc = service();
        let meta = metadata();
        let token = svc.encrypt("a@b.com", &meta).unwrap();
        assert!(CryptoService::is_encrypted(&token));
        let decrypted = svc.decrypt(&token, &meta).unwrap();
        assert_eq!(decrypted, "a@b.com");
    }

    #[test]
    fn rejects_mismatched_metadata() {
        let svc = service();
        let token = svc.encrypt("a@b.com", &metadata()).unwrap();
        let mut tampered = metadata();
        tampered.position_end = 8;
        assert!(svc.decrypt(&token, &tampered).is_err());
    }

    #[test]
    fn rejects_malformed_token() {
        let svc = service();
        assert!(svc.decrypt("not-a-token", &metadata()).is_err());
        assert!(svc.decrypt("ENC:v1:onlyonepart", &metadata()).is_err());
    }

    #[test]
    fn is_encrypted_checks_prefix_only() {
        assert!(CryptoService::is_encrypted("ENC:v1:a:b:c"));
        assert!(!CryptoService::is_encrypted("plain text"));
    }

    #[test]
    fn tokens_are_not_deterministic() {
        let svc = service();
        let meta = metadata();
        let t1 = svc.encrypt("a@b.com", &meta).unwrap();
        let t2 = svc.encrypt("a@b.com", &meta).unwrap();
        assert_ne!(t1, t2);
    }

    #[test]
    fn different_keks_cannot_decrypt_each_others_tokens() {
        let svc_a = CryptoService::new([1u8; 32]);
        let svc_b = CryptoService::new([2u8; 32]);
        let token = svc_a.encrypt("secret", &metadata()).unwrap();
        assert!(svc_b.decrypt(&token, &metadata()).is_err());
    }
}
