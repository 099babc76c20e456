//! Per-request transmission keys and the server public key table
//!
//! A transmission key is 32 random bytes, ECIES-wrapped to the server public
//! key selected by `key_id`. The wrapped form is always 125 bytes:
//! `65 (ephemeral point) + 12 (nonce) + 32 (key) + 16 (tag)`.
//! Server key rotation adds a new table entry; the server tells the client
//! which id to use.

use std::collections::BTreeMap;

use ksm_core::{KsmError, KsmResult};
use p256::SecretKey;
use zeroize::Zeroize;

use crate::ecc::{private_decrypt, public_encrypt};
use crate::encoding;
use crate::keys::SymmetricKey;

/// Key id used before the server has asked for anything else.
pub const DEFAULT_KEY_ID: u32 = 7;

/// Size of a wrapped transmission key.
pub const WRAPPED_KEY_SIZE: usize = 125;

const BUILTIN_SERVER_KEYS: &[(u32, &str)] = &[
    (7, "BK9w6TZFxE6nFNbMfIpULCup2a8xc6w2tUTABjxny7yFmxW0dAEojwC6j6zb5nTlmb1dAx8nwo3qF7RPYGmloRM"),
    (8, "BKnhy0obglZJK-igwthNLdknoSXRrGB-mvFRzyb_L-DKKefWjYdFD2888qN1ROczz4n3keYSfKz9Koj90Z6w_tQ"),
    (9, "BAsPQdCpLIGXdWNLdAwx-3J5lNqUtKbaOMV56hUj8VzxE2USLHuHHuKDeno0ymJt-acxWV1xPlBfNUShhRTR77g"),
    (10, "BNYIh_Sv03nRZUUJveE8d2mxKLIDXv654UbshaItHrCJhd6cT7pdZ_XwbdyxAOCWMkBb9AZ4t1XRCsM8-wkEBRg"),
    (11, "BA6uNfeYSvqagwu4TOY6wFK4JyU5C200vJna0lH4PJ-SzGVXej8l9dElyQ58_ljfPs5Rq6zVVXpdDe8A7Y3WRhk"),
    (12, "BMjTIlXfohI8TDymsHxo0DqYysCy7yZGJ80WhgOBR4QUd6LBDA6-_318a-jCGW96zxXKMm8clDTKpE8w75KG-FY"),
    (13, "BJBDU1P1H21IwIdT2brKkPqbQR0Zl0TIHf7Bz_OO9jaNgIwydMkxt4GpBmkYoprZ_DHUGOrno2faB7pmTR7HhuI"),
    (14, "BJFF8j-dH7pDEw_U347w2CBM6xYM8Dk5fPPAktjib-opOqzvvbsER-WDHM4ONCSBf9O_obAHzCyygxmtpktDuiE"),
    (15, "BDKyWBvLbyZ-jMueORl3JwJnnEpCiZdN7yUvT0vOyjwpPBCDf6zfL4RWzvSkhAAFnwOni_1tQSl8dfXHbXqXsQ8"),
    (16, "BDXyZZnrl0tc2jdC5I61JjwkjK2kr7uet9tZjt8StTiJTAQQmnVOYBgbtP08PWDbecxnHghx3kJ8QXq1XE68y8c"),
    (17, "BFX68cb97m9_sweGdOVavFM3j5ot6gveg6xT4BtGahfGhKib-zdZyO9pwvv1cBda9ahkSzo1BQ4NVXp9qRyqVGU"),
];

/// Versioned table of server public keys (uncompressed P-256 points).
#[derive(Debug, Clone)]
pub struct ServerKeyTable {
    keys: BTreeMap<u32, Vec<u8>>,
}

impl ServerKeyTable {
    /// The production key table.
    pub fn builtin() -> KsmResult<Self> {
        let mut keys = BTreeMap::new();
        for (id, encoded) in BUILTIN_SERVER_KEYS {
            let bytes = encoding::decode(encoded).map_err(|e| {
                KsmError::Configuration(format!("built-in server key {id} is not valid base64: {e}"))
            })?;
            keys.insert(*id, bytes);
        }
        Ok(Self { keys })
    }

    /// A custom table, e.g. for a private deployment or a test server.
    pub fn from_entries(entries: impl IntoIterator<Item = (u32, Vec<u8>)>) -> Self {
        Self {
            keys: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, key_id: u32) -> Option<&[u8]> {
        self.keys.get(&key_id).map(Vec::as_slice)
    }

    pub fn contains(&self, key_id: u32) -> bool {
        self.keys.contains_key(&key_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.keys.keys().copied()
    }
}

/// Ephemeral per-request key. Never persisted; the raw key is zeroized on drop.
pub struct TransmissionKey {
    pub key_id: u32,
    raw_key: SymmetricKey,
    wrapped_key: Vec<u8>,
}

impl TransmissionKey {
    pub fn raw_key(&self) -> &SymmetricKey {
        &self.raw_key
    }

    pub fn wrapped_key(&self) -> &[u8] {
        &self.wrapped_key
    }
}

impl std::fmt::Debug for TransmissionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransmissionKey")
            .field("key_id", &self.key_id)
            .field("raw_key", &"[REDACTED]")
            .field("wrapped_key_len", &self.wrapped_key.len())
            .finish()
    }
}

/// Draw a fresh transmission key and wrap it to server key `key_id`.
pub fn generate_transmission_key(table: &ServerKeyTable, key_id: u32) -> KsmResult<TransmissionKey> {
    let server_key = table
        .get(key_id)
        .ok_or_else(|| KsmError::Configuration(format!("unknown server public key id: {key_id}")))?;

    let raw_key = SymmetricKey::generate();
    let wrapped_key = public_encrypt(raw_key.as_bytes(), server_key)?;
    tracing::trace!(key_id, wrapped_len = wrapped_key.len(), "generated transmission key");

    Ok(TransmissionKey {
        key_id,
        raw_key,
        wrapped_key,
    })
}

/// Server side of [`generate_transmission_key`]: recover the raw key.
pub fn unwrap_transmission_key(
    key_id: u32,
    wrapped: &[u8],
    server_key: &SecretKey,
) -> KsmResult<TransmissionKey> {
    let mut raw = private_decrypt(wrapped, server_key)?;
    let raw_key = SymmetricKey::from_slice(&raw);
    raw.zeroize();
    Ok(TransmissionKey {
        key_id,
        raw_key: raw_key?,
        wrapped_key: wrapped.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecc::{generate_private_key, public_key_bytes};
    use crate::{KEY_SIZE, PUBLIC_KEY_SIZE};

    fn test_table() -> (ServerKeyTable, Vec<(u32, SecretKey)>) {
        let secrets: Vec<(u32, SecretKey)> =
            (1..=4).map(|id| (id, generate_private_key())).collect();
        let table = ServerKeyTable::from_entries(
            secrets.iter().map(|(id, sk)| (*id, public_key_bytes(sk))),
        );
        (table, secrets)
    }

    #[test]
    fn test_wrapped_size_for_every_key_id() {
        let (table, _) = test_table();
        for id in table.ids() {
            let tk = generate_transmission_key(&table, id).unwrap();
            assert_eq!(tk.wrapped_key().len(), WRAPPED_KEY_SIZE);
            assert_eq!(tk.raw_key().as_bytes().len(), KEY_SIZE);
            assert_eq!(tk.key_id, id);
        }
    }

    #[test]
    fn test_unknown_key_id_is_configuration_error() {
        let (table, _) = test_table();
        let err = generate_transmission_key(&table, 99).unwrap_err();
        assert!(matches!(err, KsmError::Configuration(_)));
    }

    #[test]
    fn test_server_recovers_raw_key() {
        let (table, secrets) = test_table();
        let (id, server_secret) = &secrets[2];
        let tk = generate_transmission_key(&table, *id).unwrap();
        let recovered = unwrap_transmission_key(*id, tk.wrapped_key(), server_secret).unwrap();
        assert_eq!(recovered.raw_key(), tk.raw_key());
    }

    #[test]
    fn test_builtin_table_shape() {
        let table = ServerKeyTable::builtin().unwrap();
        assert!(table.contains(DEFAULT_KEY_ID));
        assert_eq!(table.ids().count(), BUILTIN_SERVER_KEYS.len());
        for id in table.ids() {
            let key = table.get(id).unwrap();
            assert_eq!(key.len(), PUBLIC_KEY_SIZE, "key {id}");
            assert_eq!(key[0], 0x04, "key {id} must be an uncompressed point");
        }
    }

    #[test]
    fn test_builtin_keys_wrap_to_fixed_size() {
        let table = ServerKeyTable::builtin().unwrap();
        for id in table.ids() {
            let tk = generate_transmission_key(&table, id).unwrap();
            assert_eq!(tk.wrapped_key().len(), WRAPPED_KEY_SIZE, "key {id}");
            assert_eq!(tk.raw_key().as_bytes().len(), KEY_SIZE);
        }
    }

    #[test]
    fn test_debug_redacts_raw_key() {
        let (table, _) = test_table();
        let tk = generate_transmission_key(&table, 1).unwrap();
        assert!(format!("{tk:?}").contains("REDACTED"));
    }
}
