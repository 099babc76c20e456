//! Process-local identity store. Nothing is written anywhere; the identity
//! disappears with the process.

use ksm_core::types::{config_from_json, config_to_json};
use ksm_core::{ConfigKey, ConfigMap, KsmError, KsmResult};

use crate::ConfigStore;

#[derive(Debug, Default, Clone)]
pub struct MemoryConfigStore {
    config: ConfigMap,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(config: ConfigMap) -> Self {
        Self { config }
    }

    /// Seed from the portable JSON object, or from its base64 encoding
    /// (the single-string form handed to CI systems).
    pub fn from_json(config: &str) -> KsmResult<Self> {
        let trimmed = config.trim();
        let json = if trimmed.starts_with('{') {
            trimmed.to_string()
        } else {
            let decoded = decode_base64(trimmed)?;
            String::from_utf8(decoded)
                .map_err(|_| KsmError::Configuration("config string is not valid UTF-8".into()))?
        };
        let value: serde_json::Value = serde_json::from_str(&json)
            .map_err(|e| KsmError::Configuration(format!("config string is not valid JSON: {e}")))?;
        Ok(Self {
            config: config_from_json(&value)?,
        })
    }

    /// Render the identity as the portable JSON object.
    pub fn to_json(&self) -> String {
        config_to_json(&self.config).to_string()
    }
}

fn decode_base64(s: &str) -> KsmResult<Vec<u8>> {
    use base64::engine::general_purpose::STANDARD_NO_PAD;
    use base64::Engine;

    STANDARD_NO_PAD
        .decode(s.trim_end_matches('='))
        .map_err(|_| KsmError::Configuration("config string is not valid base64".into()))
}

impl ConfigStore for MemoryConfigStore {
    fn read_storage(&self) -> KsmResult<ConfigMap> {
        Ok(self.config.clone())
    }

    fn save_storage(&mut self, _config: &ConfigMap) -> KsmResult<()> {
        Ok(())
    }

    fn get(&self, key: ConfigKey) -> KsmResult<Option<String>> {
        Ok(self.config.get(&key).cloned())
    }

    fn set(&mut self, key: ConfigKey, value: &str) -> KsmResult<()> {
        self.config.insert(key, value.to_string());
        Ok(())
    }

    fn delete(&mut self, key: ConfigKey) -> KsmResult<()> {
        self.config.remove(&key);
        Ok(())
    }

    fn delete_all(&mut self) -> KsmResult<()> {
        self.config.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete() {
        let mut store = MemoryConfigStore::new();
        assert!(store.is_empty().unwrap());

        store.set(ConfigKey::ClientKey, "token").unwrap();
        assert!(store.contains(ConfigKey::ClientKey).unwrap());

        store.delete(ConfigKey::ClientKey).unwrap();
        assert!(!store.contains(ConfigKey::ClientKey).unwrap());
    }

    #[test]
    fn save_storage_is_noop() {
        let mut store = MemoryConfigStore::new();
        store.set(ConfigKey::Hostname, "h").unwrap();
        store.save_storage(&ConfigMap::new()).unwrap();
        assert_eq!(store.get(ConfigKey::Hostname).unwrap().as_deref(), Some("h"));
    }

    #[test]
    fn from_json_plain_and_base64() {
        let json = r#"{"hostname":"keepersecurity.com","clientId":"cid"}"#;
        let plain = MemoryConfigStore::from_json(json).unwrap();
        assert_eq!(plain.get(ConfigKey::ClientId).unwrap().as_deref(), Some("cid"));

        // base64 of the same JSON
        let b64 = "eyJob3N0bmFtZSI6ImtlZXBlcnNlY3VyaXR5LmNvbSIsImNsaWVudElkIjoiY2lkIn0=";
        let decoded = MemoryConfigStore::from_json(b64).unwrap();
        assert_eq!(
            decoded.get(ConfigKey::Hostname).unwrap().as_deref(),
            Some("keepersecurity.com")
        );
    }

    #[test]
    fn to_json_roundtrip() {
        let mut store = MemoryConfigStore::new();
        store.set(ConfigKey::ServerPublicKeyId, "10").unwrap();
        let again = MemoryConfigStore::from_json(&store.to_json()).unwrap();
        assert_eq!(again.get(ConfigKey::ServerPublicKeyId).unwrap().as_deref(), Some("10"));
    }
}
