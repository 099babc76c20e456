//! ksm-crypto: client-side envelope encryption for the secrets vault protocol
//!
//! Key hierarchy:
//! ```text
//! Client key (one-time token secret, used once during binding)
//!   └── App Key (AES-256, delivered as encryptedAppKey)
//!         ├── Folder Key (wrapped by app key)
//!         │     └── Record Key (wrapped by folder key)
//!         └── Record Key (wrapped by app key)
//!               └── File Key (wrapped by record key)
//! ```
//!
//! Every wrapped key and data blob uses the same framing:
//! `[12-byte nonce][ciphertext][16-byte GCM tag]`.
//!
//! Requests travel inside a per-request transmission key, itself wrapped to
//! one of the server's P-256 public keys (ECIES) and signed with the client's
//! ECDSA identity key.

pub mod cipher;
pub mod ecc;
pub mod encoding;
pub mod envelope;
pub mod keys;
pub mod transmission;

pub use cipher::{decrypt_aes_gcm, encrypt_aes_gcm, unwrap_key, wrap_key};
pub use ecc::{generate_private_key, private_decrypt, public_encrypt, sign, verify};
pub use envelope::{decrypt_response, encrypt_and_sign, EncryptedPayload};
pub use keys::{derive_client_id, SymmetricKey};
pub use transmission::{generate_transmission_key, ServerKeyTable, TransmissionKey};

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Uncompressed SEC1 P-256 point: 0x04 || X || Y
pub const PUBLIC_KEY_SIZE: usize = 65;
