//! Snapshot envelope encryption.
//!
//! Plaintext is gzip-compressed, then sealed with AES-256-GCM under a
//! fresh 96-bit nonce. The envelope stores the nonce and ciphertext as
//! base64 next to a `compressed` flag so older uncompressed envelopes
//! still open.

use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{SyncError, SyncResult};
use crate::sync::compression::{compress, decompress, CompressionLevel, CompressionType};
use crate::sync::snapshot::SnapshotPayload;

/// Passphrase used when the settings do not provide one.
pub const DEFAULT_PASSPHRASE: &str = "snapvault-sync-envelope-v1";

const NONCE_SIZE: usize = 12;

/// On-disk and on-wire snapshot payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Base64 nonce.
    pub iv: String,
    /// Base64 ciphertext with the GCM tag appended.
    pub data: String,
    /// Whether the plaintext was gzip-compressed before encryption.
    #[serde(default)]
    pub compressed: bool,
}

impl EncryptedEnvelope {
    /// Serialize as the JSON document stored in snapshot files.
    pub fn to_json(&self) -> SyncResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a snapshot file.
    pub fn from_json(bytes: &[u8]) -> SyncResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| SyncError::CorruptEnvelope(format!("not an envelope document: {}", e)))
    }
}

/// Symmetric encrypt/compress codec.
#[derive(Clone)]
pub struct CryptoCodec {
    cipher: Aes256Gcm,
    level: CompressionLevel,
}

impl std::fmt::Debug for CryptoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoCodec")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl Default for CryptoCodec {
    fn default() -> Self {
        Self::from_passphrase(DEFAULT_PASSPHRASE)
    }
}

impl CryptoCodec {
    /// Derive the 256-bit key as SHA-256 of the passphrase.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let key = Sha256::digest(passphrase.as_bytes());
        Self {
            cipher: Aes256Gcm::new(GenericArray::from_slice(&key)),
            level: CompressionLevel::default(),
        }
    }

    /// Compress, then encrypt under a fresh nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> SyncResult<EncryptedEnvelope> {
        let compressed = compress(plaintext, CompressionType::Gzip, self.level)
            .map_err(|e| SyncError::CorruptEnvelope(format!("compression failed: {}", e)))?;
        self.seal(&compressed, true)
    }

    /// Encrypt without compressing. Produces `compressed: false` envelopes.
    pub fn encrypt_uncompressed(&self, plaintext: &[u8]) -> SyncResult<EncryptedEnvelope> {
        self.seal(plaintext, false)
    }

    fn seal(&self, bytes: &[u8], compressed: bool) -> SyncResult<EncryptedEnvelope> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, bytes)
            .map_err(|_| SyncError::CorruptEnvelope("encryption failed".to_string()))?;

        Ok(EncryptedEnvelope {
            iv: STANDARD.encode(nonce_bytes),
            data: STANDARD.encode(ciphertext),
            compressed,
        })
    }

    /// Reverse [`encrypt`](Self::encrypt). Skips decompression when the
    /// envelope says the plaintext was stored as-is.
    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> SyncResult<Vec<u8>> {
        let iv = STANDARD
            .decode(envelope.iv.trim())
            .map_err(|e| SyncError::CorruptEnvelope(format!("iv is not base64: {}", e)))?;
        if iv.len() != NONCE_SIZE {
            return Err(SyncError::CorruptEnvelope(format!(
                "iv must be {} bytes, got {}",
                NONCE_SIZE,
                iv.len()
            )));
        }
        let data = STANDARD
            .decode(envelope.data.trim())
            .map_err(|e| SyncError::CorruptEnvelope(format!("data is not base64: {}", e)))?;

        let opened = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), data.as_slice())
            .map_err(|_| SyncError::CorruptEnvelope("wrong key or tampered ciphertext".to_string()))?;

        decompress(&opened, CompressionType::from_flag(envelope.compressed))
            .map_err(|e| SyncError::CorruptEnvelope(format!("{:#}", e)))
    }

    /// Serialize and encrypt a snapshot payload.
    pub fn seal_payload(&self, payload: &SnapshotPayload) -> SyncResult<EncryptedEnvelope> {
        let json = serde_json::to_vec(payload)?;
        self.encrypt(&json)
    }

    /// Decrypt and parse a snapshot payload.
    pub fn open_payload(&self, envelope: &EncryptedEnvelope) -> SyncResult<SnapshotPayload> {
        let plaintext = self.decrypt(envelope)?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| SyncError::CorruptEnvelope(format!("payload is not a snapshot: {}", e)))
    }
}
