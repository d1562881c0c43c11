// Decryption collaborator: streams ciphertext through the attachment cipher.

use aes::Aes256;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use ctr::cipher::{KeyIvInit, StreamCipher};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{MediaCacheError, Result};

/// The only algorithm [`AttachmentDecryptor`] understands
pub const ALGORITHM_A256CTR: &str = "A256CTR";

const CHUNK_SIZE: usize = 64 * 1024;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Key material attached to an encrypted resource.
///
/// Binary fields are base64 strings: `key` is unpadded base64url (the JWK
/// `k` member), `iv` and `expected_hash` (SHA-256 of the ciphertext) use the
/// standard alphabet. Padding is tolerated on all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionMaterial {
    pub algorithm: String,
    pub key: String,
    pub iv: String,
    pub expected_hash: String,
}

impl DecryptionMaterial {
    pub fn a256ctr(
        key: impl Into<String>,
        iv: impl Into<String>,
        expected_hash: impl Into<String>,
    ) -> Self {
        Self {
            algorithm: ALGORITHM_A256CTR.to_string(),
            key: key.into(),
            iv: iv.into(),
            expected_hash: expected_hash.into(),
        }
    }
}

#[async_trait]
pub trait Decryptor: Send + Sync {
    /// Read ciphertext from `input` and write plaintext to `output`.
    ///
    /// Any failure may leave `output` partially written; the caller discards it.
    async fn decrypt(
        &self,
        input: &mut (dyn AsyncRead + Unpin + Send),
        material: &DecryptionMaterial,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()>;
}

/// AES-256-CTR attachment decryption with SHA-256 ciphertext verification
#[derive(Debug, Clone, Copy, Default)]
pub struct AttachmentDecryptor;

fn decode_field(name: &str, value: &str, expected_len: usize) -> Result<Vec<u8>> {
    let trimmed = value.trim_end_matches('=');
    let bytes = STANDARD_NO_PAD
        .decode(trimmed)
        .or_else(|_| URL_SAFE_NO_PAD.decode(trimmed))
        .map_err(|e| MediaCacheError::DecryptionFailure(format!("Invalid {name}: {e}")))?;

    if bytes.len() != expected_len {
        return Err(MediaCacheError::DecryptionFailure(format!(
            "{name} has incorrect length: {} bytes (expected {expected_len})",
            bytes.len()
        )));
    }
    Ok(bytes)
}

#[async_trait]
impl Decryptor for AttachmentDecryptor {
    async fn decrypt(
        &self,
        input: &mut (dyn AsyncRead + Unpin + Send),
        material: &DecryptionMaterial,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()> {
        if !material.algorithm.eq_ignore_ascii_case(ALGORITHM_A256CTR) {
            return Err(MediaCacheError::DecryptionFailure(format!(
                "Unsupported decryption algorithm: {}",
                material.algorithm
            )));
        }

        let key = decode_field("key", &material.key, 32)?;
        let iv = decode_field("iv", &material.iv, 16)?;
        let expected_hash = decode_field("hash", &material.expected_hash, 32)?;

        let mut cipher = Aes256Ctr::new_from_slices(&key, &iv).map_err(|e| {
            MediaCacheError::DecryptionFailure(format!("Failed to initialize AES decryptor: {e}"))
        })?;
        let mut hasher = Sha256::new();

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = input.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            let chunk = &mut buffer[..n];
            hasher.update(&*chunk);
            cipher.apply_keystream(chunk);
            output.write_all(chunk).await?;
            total += n as u64;
        }
        output.flush().await?;

        if hasher.finalize().as_slice() != expected_hash.as_slice() {
            return Err(MediaCacheError::DecryptionFailure(
                "Ciphertext hash does not match the expected hash".to_string(),
            ));
        }

        debug!(bytes = total, "Decrypted attachment");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::encrypt_attachment;

    async fn run(ciphertext: &[u8], material: &DecryptionMaterial) -> Result<Vec<u8>> {
        let mut input = ciphertext;
        let mut output = Vec::new();
        AttachmentDecryptor
            .decrypt(&mut input, material, &mut output)
            .await?;
        Ok(output)
    }

    #[tokio::test]
    async fn test_decrypts_and_verifies_hash() {
        // Larger than one chunk so the counter crosses read boundaries
        let plaintext: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let (ciphertext, material) = encrypt_attachment(&plaintext);
        assert_ne!(ciphertext, plaintext);

        let output = run(&ciphertext, &material).await.unwrap();
        assert_eq!(output, plaintext);
    }

    #[tokio::test]
    async fn test_hash_mismatch_fails() {
        let (mut ciphertext, material) = encrypt_attachment(b"secret attachment");
        ciphertext[0] ^= 0xff;

        let err = run(&ciphertext, &material).await.unwrap_err();
        assert_eq!(err.kind(), crate::FailureKind::Decryption);
    }

    #[tokio::test]
    async fn test_unsupported_algorithm_fails() {
        let (ciphertext, mut material) = encrypt_attachment(b"x");
        material.algorithm = "A128CBC".to_string();
        let err = run(&ciphertext, &material).await.unwrap_err();
        assert!(err.to_string().contains("Unsupported"));
    }

    #[tokio::test]
    async fn test_malformed_key_fails() {
        let (ciphertext, mut material) = encrypt_attachment(b"x");
        material.key = "c2hvcnQ".to_string();
        let err = run(&ciphertext, &material).await.unwrap_err();
        assert_eq!(err.kind(), crate::FailureKind::Decryption);
        assert!(err.to_string().contains("key"));
    }

    #[test]
    fn test_material_serde_shape() {
        let material = DecryptionMaterial::a256ctr("k", "iv", "h");
        let json = serde_json::to_value(&material).unwrap();
        assert_eq!(json["algorithm"], "A256CTR");
        let back: DecryptionMaterial = serde_json::from_value(json).unwrap();
        assert_eq!(back, material);
    }
}
