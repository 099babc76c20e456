//! Symmetric key type and client id derivation

use hmac::{Hmac, Mac};
use ksm_core::{KsmError, KsmResult};
use rand::RngCore;
use sha2::Sha512;
use zeroize::Zeroize;

use crate::KEY_SIZE;

const CLIENT_ID_INFO: &[u8] = b"KEEPER_SECRETS_MANAGER_CLIENT_ID";

/// A 256-bit AES key (app, folder, record, file or transmission key).
/// Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
}

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Build a key from a decrypted or decoded buffer, which must be exactly
    /// 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> KsmResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(KsmError::Decryption(format!(
                "key has wrong size: {} bytes (expected {})",
                bytes.len(),
                KEY_SIZE
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// `base64url(HMAC-SHA512(client_key, "KEEPER_SECRETS_MANAGER_CLIENT_ID"))`
pub fn derive_client_id(client_key: &[u8]) -> KsmResult<String> {
    let mut mac = Hmac::<Sha512>::new_from_slice(client_key)
        .map_err(|e| KsmError::Configuration(format!("HMAC init failed: {e}")))?;
    mac.update(CLIENT_ID_INFO);
    let digest = mac.finalize().into_bytes();
    Ok(crate::encoding::encode_url(&digest))
}
