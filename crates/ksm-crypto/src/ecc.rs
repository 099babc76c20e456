//! P-256 identity keys, ECDSA signatures and ECIES public-key encryption
//!
//! ECIES output format:
//! ```text
//! [65 bytes: ephemeral public key, uncompressed][12-byte nonce][ciphertext][16-byte tag]
//! AES key = SHA-256(ECDH(ephemeral, recipient).x)
//! ```

use ksm_core::{KsmError, KsmResult};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::cipher::{decrypt_aes_gcm, encrypt_aes_gcm};
use crate::keys::SymmetricKey;
use crate::PUBLIC_KEY_SIZE;

/// Generate a new client identity key.
pub fn generate_private_key() -> SecretKey {
    SecretKey::random(&mut OsRng)
}

/// PKCS#8 DER encoding, the form persisted as `privateKey`.
pub fn private_key_to_der(key: &SecretKey) -> KsmResult<Vec<u8>> {
    let doc = key
        .to_pkcs8_der()
        .map_err(|e| KsmError::Configuration(format!("encoding private key: {e}")))?;
    Ok(doc.as_bytes().to_vec())
}

/// Parse a stored private key: PKCS#8 DER, or a bare 32-byte scalar.
pub fn private_key_from_der(der: &[u8]) -> KsmResult<SecretKey> {
    if der.len() == 32 {
        return SecretKey::from_slice(der)
            .map_err(|e| KsmError::Configuration(format!("invalid raw private key: {e}")));
    }
    SecretKey::from_pkcs8_der(der)
        .map_err(|e| KsmError::Configuration(format!("invalid PKCS#8 private key: {e}")))
}

/// Uncompressed SEC1 encoding of the public half.
pub fn public_key_bytes(key: &SecretKey) -> Vec<u8> {
    key.public_key().to_encoded_point(false).as_bytes().to_vec()
}

fn parse_public_key(bytes: &[u8]) -> KsmResult<PublicKey> {
    PublicKey::from_sec1_bytes(bytes)
        .map_err(|_| KsmError::Configuration("invalid P-256 public key".into()))
}

/// ECDSA P-256 / SHA-256 signature, DER encoded.
pub fn sign(key: &SecretKey, data: &[u8]) -> Vec<u8> {
    let signing_key = SigningKey::from(key);
    let signature: Signature = signing_key.sign(data);
    signature.to_der().as_bytes().to_vec()
}

/// Verify a DER signature against an uncompressed public key.
pub fn verify(public_key: &[u8], data: &[u8], signature: &[u8]) -> KsmResult<()> {
    let verifying_key = VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|_| KsmError::Configuration("invalid P-256 public key".into()))?;
    let signature = Signature::from_der(signature)
        .map_err(|_| KsmError::AccessDenied("malformed signature".into()))?;
    verifying_key
        .verify(data, &signature)
        .map_err(|_| KsmError::AccessDenied("signature verification failed".into()))
}

fn shared_aes_key(shared_x: &[u8]) -> KsmResult<SymmetricKey> {
    let mut digest = Sha256::digest(shared_x);
    let key = SymmetricKey::from_slice(&digest);
    digest.as_mut_slice().zeroize();
    key
}

/// Encrypt `data` to the holder of `recipient` (uncompressed SEC1 bytes).
pub fn public_encrypt(data: &[u8], recipient: &[u8]) -> KsmResult<Vec<u8>> {
    let recipient = parse_public_key(recipient)?;
    let ephemeral = p256::ecdh::EphemeralSecret::random(&mut OsRng);
    let shared = ephemeral.diffie_hellman(&recipient);
    let key = shared_aes_key(shared.raw_secret_bytes().as_slice())?;

    let encrypted = encrypt_aes_gcm(&key, data)?;
    let ephemeral_public = ephemeral.public_key().to_encoded_point(false);

    let mut out = Vec::with_capacity(PUBLIC_KEY_SIZE + encrypted.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&encrypted);
    Ok(out)
}

/// Reverse of [`public_encrypt`].
pub fn private_decrypt(data: &[u8], key: &SecretKey) -> KsmResult<Vec<u8>> {
    if data.len() < PUBLIC_KEY_SIZE {
        return Err(KsmError::Decryption(format!(
            "ECIES payload too short: {} bytes",
            data.len()
        )));
    }
    let (ephemeral, encrypted) = data.split_at(PUBLIC_KEY_SIZE);
    let ephemeral = PublicKey::from_sec1_bytes(ephemeral)
        .map_err(|_| KsmError::Decryption("invalid ephemeral public key".into()))?;
    let shared = p256::ecdh::diffie_hellman(key.to_nonzero_scalar(), ephemeral.as_affine());
    let aes_key = shared_aes_key(shared.raw_secret_bytes().as_slice())?;
    decrypt_aes_gcm(&aes_key, encrypted)
}
