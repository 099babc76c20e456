//! AES-256-GCM framing shared by wrapped keys, record data and envelopes
//!
//! Format (binary):
//! ```text
//! [12 bytes: random nonce][N bytes: ciphertext][16 bytes: GCM tag]
//! ```

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use ksm_core::{KsmError, KsmResult};
use rand::RngCore;
use zeroize::Zeroize;

use crate::keys::SymmetricKey;
use crate::{NONCE_SIZE, TAG_SIZE};

/// Encrypt `plaintext` under `key` with a fresh random nonce.
///
/// Returns: `[12-byte nonce][ciphertext][16-byte tag]`
pub fn encrypt_aes_gcm(key: &SymmetricKey, plaintext: &[u8]) -> KsmResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| KsmError::Decryption(format!("AES-GCM encryption failed: {e}")))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt `[nonce][ciphertext][tag]` produced by [`encrypt_aes_gcm`].
pub fn decrypt_aes_gcm(key: &SymmetricKey, encrypted: &[u8]) -> KsmResult<Vec<u8>> {
    if encrypted.len() < NONCE_SIZE + TAG_SIZE {
        return Err(KsmError::Decryption(format!(
            "ciphertext too short: {} bytes (minimum {})",
            encrypted.len(),
            NONCE_SIZE + TAG_SIZE
        )));
    }

    let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    cipher.decrypt(nonce, ciphertext).map_err(|_| {
        KsmError::Decryption("AES-GCM tag mismatch: wrong key or corrupted data".into())
    })
}

/// Wrap (encrypt) `key` under `wrapping_key`.
pub fn wrap_key(wrapping_key: &SymmetricKey, key: &SymmetricKey) -> KsmResult<Vec<u8>> {
    encrypt_aes_gcm(wrapping_key, key.as_bytes())
}

/// Unwrap a key produced by [`wrap_key`]. The plaintext must be a 32-byte key.
pub fn unwrap_key(wrapping_key: &SymmetricKey, wrapped: &[u8]) -> KsmResult<SymmetricKey> {
    let mut plaintext = decrypt_aes_gcm(wrapping_key, wrapped)?;
    let key = SymmetricKey::from_slice(&plaintext);
    plaintext.zeroize();
    key
}
