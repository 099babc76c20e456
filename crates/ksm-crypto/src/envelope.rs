//! Signed request envelopes
//!
//! ```text
//! body      = AES-GCM(transmission_key.raw, payload_json)   // [nonce][ct][tag]
//! signature = ECDSA-P256-SHA256(private_key, wrapped_transmission_key || body)
//! ```
//! The response body is an AES-GCM envelope under the same raw key.

use ksm_core::{KsmError, KsmResult};
use p256::SecretKey;

use crate::cipher::{decrypt_aes_gcm, encrypt_aes_gcm};
use crate::ecc;
use crate::transmission::TransmissionKey;

/// An encrypted request body plus its signature.
#[derive(Debug, Clone)]
pub struct EncryptedPayload {
    pub encrypted_payload: Vec<u8>,
    pub signature: Vec<u8>,
}

fn signature_base(transmission_key: &TransmissionKey, encrypted_payload: &[u8]) -> Vec<u8> {
    let wrapped = transmission_key.wrapped_key();
    let mut base = Vec::with_capacity(wrapped.len() + encrypted_payload.len());
    base.extend_from_slice(wrapped);
    base.extend_from_slice(encrypted_payload);
    base
}

/// Encrypt `payload` under the transmission key and sign it with the
/// client identity key.
pub fn encrypt_and_sign(
    payload: &[u8],
    transmission_key: &TransmissionKey,
    private_key: &SecretKey,
) -> KsmResult<EncryptedPayload> {
    let encrypted_payload = encrypt_aes_gcm(transmission_key.raw_key(), payload)?;
    let signature = ecc::sign(
        private_key,
        &signature_base(transmission_key, &encrypted_payload),
    );
    Ok(EncryptedPayload {
        encrypted_payload,
        signature,
    })
}

/// Check a request signature (used by test servers and for self-checks).
pub fn verify_signature(
    payload: &EncryptedPayload,
    transmission_key: &TransmissionKey,
    public_key: &[u8],
) -> KsmResult<()> {
    ecc::verify(
        public_key,
        &signature_base(transmission_key, &payload.encrypted_payload),
        &payload.signature,
    )
}

/// Decrypt a response body. A tag failure is a transport error: the body
/// was not produced under this request's transmission key.
pub fn decrypt_response(body: &[u8], transmission_key: &TransmissionKey) -> KsmResult<Vec<u8>> {
    decrypt_aes_gcm(transmission_key.raw_key(), body).map_err(|e| {
        KsmError::transport(None, format!("response envelope did not verify: {e}"))
    })
}

/// Server side: encrypt a response body under the transmission key.
pub fn encrypt_response(body: &[u8], transmission_key: &TransmissionKey) -> KsmResult<Vec<u8>> {
    encrypt_aes_gcm(transmission_key.raw_key(), body)
}
