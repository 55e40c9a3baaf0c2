//! Authenticated encryption for credential material at rest.
//!
//! [`CredentialVault`] seals token plaintext into a base64 envelope:
//!
//! ```text
//! base64( version(1) ‖ salt(16) ‖ nonce(12) ‖ ciphertext+tag )
//! ```
//!
//! A fresh random salt and nonce are generated per `seal`, so sealing the
//! same plaintext twice yields different blobs. The symmetric key is derived
//! from a long-lived master secret and the per-blob salt via
//! PBKDF2-HMAC-SHA256 with a configurable iteration count (floor 100,000).
//!
//! The leading version byte makes "is this encrypted" a structural check:
//! blobs written before encryption was introduced (or raw bearer tokens)
//! fail that check and pass through unchanged, while a well-formed envelope
//! whose authentication tag does not verify is a hard failure.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::Sha256;
use thiserror::Error;

/// Envelope format version. Bump on any layout change.
const FORMAT_VERSION: u8 = 1;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Smallest byte length a well-formed envelope can have (empty plaintext).
const MIN_ENVELOPE_LEN: usize = 1 + SALT_LEN + NONCE_LEN + TAG_LEN;

/// Iteration floor for the key derivation function.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Errors from vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Constructor rejected a KDF iteration count below the floor
    #[error("kdf iteration count {0} is below the minimum of {MIN_KDF_ITERATIONS}")]
    WeakKdf(u32),

    /// Constructor rejected an empty master secret
    #[error("master secret must not be empty")]
    EmptyMasterSecret,

    /// AEAD encryption failed
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Well-formed envelope whose authentication tag failed to verify.
    /// Signals tampering or corruption, never a recoverable condition.
    #[error("authentication failed: blob is tampered or corrupted")]
    TamperDetected,

    /// Decrypted bytes were not valid UTF-8
    #[error("decrypted payload is not valid utf-8")]
    InvalidPlaintext,
}

/// Result of [`CredentialVault::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opened {
    /// The blob was a sealed envelope and decrypted successfully
    Decrypted(String),
    /// The blob was not an envelope; returned unchanged (legacy plaintext)
    Passthrough(String),
}

impl Opened {
    /// The plaintext, regardless of how it was obtained.
    pub fn into_inner(self) -> String {
        match self {
            Self::Decrypted(s) | Self::Passthrough(s) => s,
        }
    }

    /// Whether the blob was actually encrypted.
    pub fn was_sealed(&self) -> bool {
        matches!(self, Self::Decrypted(_))
    }
}

/// AES-256-GCM vault keyed from a master secret.
///
/// Cheap to clone is not a goal; construct once and share behind an `Arc`.
pub struct CredentialVault {
    master_secret: Vec<u8>,
    kdf_iterations: u32,
}

impl CredentialVault {
    /// Create a vault from a master secret and a KDF iteration count.
    ///
    /// Rejects empty secrets and iteration counts below
    /// [`MIN_KDF_ITERATIONS`].
    pub fn new(master_secret: impl Into<Vec<u8>>, kdf_iterations: u32) -> Result<Self, VaultError> {
        let master_secret = master_secret.into();
        if master_secret.is_empty() {
            return Err(VaultError::EmptyMasterSecret);
        }
        if kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(VaultError::WeakKdf(kdf_iterations));
        }
        Ok(Self { master_secret, kdf_iterations })
    }

    /// Encrypt plaintext into a base64 envelope.
    pub fn seal(&self, plaintext: &str) -> Result<String, VaultError> {
        let salt: [u8; SALT_LEN] = rand::random();
        let key = self.derive_key(&salt);

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| VaultError::Encryption(e.to_string()))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        let mut envelope = Vec::with_capacity(MIN_ENVELOPE_LEN + plaintext.len());
        envelope.push(FORMAT_VERSION);
        envelope.extend_from_slice(&salt);
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(envelope))
    }

    /// Decrypt a blob, passing legacy plaintext through unchanged.
    ///
    /// Anything that is not base64, lacks the version byte, or is shorter
    /// than the structural minimum is treated as pre-encryption plaintext.
    /// A structurally valid envelope that fails authentication is a hard
    /// [`VaultError::TamperDetected`].
    pub fn open(&self, blob: &str) -> Result<Opened, VaultError> {
        let bytes = match BASE64.decode(blob) {
            Ok(bytes) => bytes,
            Err(_) => return Ok(Opened::Passthrough(blob.to_string())),
        };
        if bytes.len() < MIN_ENVELOPE_LEN || bytes[0] != FORMAT_VERSION {
            return Ok(Opened::Passthrough(blob.to_string()));
        }

        let salt = &bytes[1..1 + SALT_LEN];
        let nonce_bytes = &bytes[1 + SALT_LEN..1 + SALT_LEN + NONCE_LEN];
        let ciphertext = &bytes[1 + SALT_LEN + NONCE_LEN..];

        let key = self.derive_key(salt);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| VaultError::Encryption(e.to_string()))?;
        let nonce_array: [u8; NONCE_LEN] =
            nonce_bytes.try_into().map_err(|_| VaultError::TamperDetected)?;
        let plaintext = cipher
            .decrypt(&Nonce::from(nonce_array), ciphertext)
            .map_err(|_| VaultError::TamperDetected)?;

        String::from_utf8(plaintext)
            .map(Opened::Decrypted)
            .map_err(|_| VaultError::InvalidPlaintext)
    }

    fn derive_key(&self, salt: &[u8]) -> [u8; 32] {
        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(&self.master_secret, salt, self.kdf_iterations, &mut key);
        key
    }
}

// Never expose the master secret through Debug output
impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault")
            .field("master_secret", &"[REDACTED]")
            .field("kdf_iterations", &self.kdf_iterations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> CredentialVault {
        CredentialVault::new(b"test-master-secret".to_vec(), MIN_KDF_ITERATIONS).unwrap()
    }

    #[test]
    fn seal_open_round_trip() {
        let v = vault();
        let blob = v.seal("ya29.a0AfB-secret-access-token").unwrap();
        let opened = v.open(&blob).unwrap();
        assert_eq!(opened, Opened::Decrypted("ya29.a0AfB-secret-access-token".to_string()));
        assert!(opened.was_sealed());
    }

    #[test]
    fn sealing_twice_yields_different_blobs() {
        let v = vault();
        let a = v.seal("same-plaintext").unwrap();
        let b = v.seal("same-plaintext").unwrap();
        assert_ne!(a, b);
        assert_eq!(v.open(&a).unwrap().into_inner(), "same-plaintext");
        assert_eq!(v.open(&b).unwrap().into_inner(), "same-plaintext");
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let v = vault();
        let blob = v.seal("").unwrap();
        assert_eq!(v.open(&blob).unwrap().into_inner(), "");
    }

    #[test]
    fn tampered_ciphertext_is_a_hard_failure() {
        let v = vault();
        let blob = v.seal("secret").unwrap();
        let mut bytes = BASE64.decode(&blob).unwrap();
        // Flip one bit inside the ciphertext/tag region
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = BASE64.encode(bytes);
        assert!(matches!(v.open(&tampered), Err(VaultError::TamperDetected)));
    }

    #[test]
    fn tampered_tag_is_a_hard_failure() {
        let v = vault();
        let blob = v.seal("secret-with-some-length").unwrap();
        let mut bytes = BASE64.decode(&blob).unwrap();
        let mid = 1 + SALT_LEN + NONCE_LEN + 2;
        bytes[mid] ^= 0x80;
        let tampered = BASE64.encode(bytes);
        assert!(matches!(v.open(&tampered), Err(VaultError::TamperDetected)));
    }

    #[test]
    fn plaintext_bearer_token_passes_through() {
        let v = vault();
        // Raw OAuth bearer tokens contain '.' and '-', not valid base64
        let legacy = "ya29.a0AfH6SMBx-legacy-token";
        let opened = v.open(legacy).unwrap();
        assert_eq!(opened, Opened::Passthrough(legacy.to_string()));
        assert!(!opened.was_sealed());
    }

    #[test]
    fn short_base64_passes_through() {
        let v = vault();
        // Valid base64 but far below the structural minimum
        let short = BASE64.encode(b"tiny");
        assert_eq!(v.open(&short).unwrap(), Opened::Passthrough(short.clone()));
    }

    #[test]
    fn unknown_version_byte_passes_through() {
        let v = vault();
        let mut bytes = vec![0x7f];
        bytes.extend_from_slice(&[0u8; MIN_ENVELOPE_LEN]);
        let blob = BASE64.encode(bytes);
        assert!(matches!(v.open(&blob).unwrap(), Opened::Passthrough(_)));
    }

    #[test]
    fn weak_iteration_count_rejected() {
        let err = CredentialVault::new(b"secret".to_vec(), 10_000).unwrap_err();
        assert!(matches!(err, VaultError::WeakKdf(10_000)));
    }

    #[test]
    fn empty_master_secret_rejected() {
        let err = CredentialVault::new(Vec::new(), MIN_KDF_ITERATIONS).unwrap_err();
        assert!(matches!(err, VaultError::EmptyMasterSecret));
    }

    #[test]
    fn wrong_master_secret_fails_to_open() {
        let v = vault();
        let blob = v.seal("secret").unwrap();
        let other =
            CredentialVault::new(b"different-secret".to_vec(), MIN_KDF_ITERATIONS).unwrap();
        assert!(matches!(other.open(&blob), Err(VaultError::TamperDetected)));
    }

    #[test]
    fn debug_redacts_master_secret() {
        let rendered = format!("{:?}", vault());
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("test-master-secret"));
    }
}
