//! Identity kept as a single blob in an external secret store
//!
//! Entry layout, per profile:
//! ```text
//! <profile>            {"data": "<serialized config JSON>"}
//! <profile>.integrity  BLAKE3 hex of the serialized config
//! ```
//! A profile without a sidecar (written by older clients) is trusted as-is.
//! A sidecar that does not match the stored data is an integrity violation.

use std::cell::RefCell;

use ksm_core::types::{config_from_json, config_to_json};
use ksm_core::{ConfigMap, KsmError, KsmResult};

use crate::secret_backend::SecretBackend;
use crate::ConfigStore;

pub struct SecureConfigStore<B: SecretBackend> {
    backend: B,
    profile: String,
    sidecar: bool,
    last_saved_hash: RefCell<Option<String>>,
}

fn content_hash(serialized: &str) -> String {
    blake3::hash(serialized.as_bytes()).to_hex().to_string()
}

impl<B: SecretBackend> SecureConfigStore<B> {
    pub fn new(backend: B, profile: &str) -> Self {
        Self {
            backend,
            profile: profile.to_string(),
            sidecar: true,
            last_saved_hash: RefCell::new(None),
        }
    }

    /// Whether to write the integrity sidecar on save. With it disabled, a
    /// save removes any sidecar still stored for the profile. Existing
    /// sidecars are always checked on load.
    pub fn with_sidecar(mut self, enabled: bool) -> Self {
        self.sidecar = enabled;
        self
    }

    fn sidecar_name(&self) -> String {
        format!("{}.integrity", self.profile)
    }

    fn backend_err(&self, op: &str, e: anyhow::Error) -> KsmError {
        KsmError::Storage(format!("secure storage {op} for profile '{}': {e:#}", self.profile))
    }

    /// Store `config` under the profile. Skipped when the serialized config
    /// is identical to the last one written.
    pub fn save_profile(&mut self, config: &ConfigMap) -> KsmResult<()> {
        let serialized = serde_json::to_string(&config_to_json(config))?;
        let hash = content_hash(&serialized);

        if self.last_saved_hash.borrow().as_deref() == Some(hash.as_str()) {
            tracing::trace!(profile = %self.profile, "config unchanged, skipping secure storage write");
            return Ok(());
        }

        if !self.sidecar {
            // a sidecar left by an earlier save would no longer match
            self.backend
                .delete(&self.sidecar_name())
                .map_err(|e| self.backend_err("sidecar delete", e))?;
        }
        let blob = serde_json::json!({ "data": serialized }).to_string();
        self.backend
            .set(&self.profile, &blob)
            .map_err(|e| self.backend_err("write", e))?;
        if self.sidecar {
            self.backend
                .set(&self.sidecar_name(), &hash)
                .map_err(|e| self.backend_err("sidecar write", e))?;
        }

        tracing::debug!(profile = %self.profile, "saved config to secure storage");
        *self.last_saved_hash.borrow_mut() = Some(hash);
        Ok(())
    }

    /// Load the profile. A missing profile is an empty config.
    pub fn load_profile(&self) -> KsmResult<ConfigMap> {
        let Some(blob) = self
            .backend
            .get(&self.profile)
            .map_err(|e| self.backend_err("read", e))?
        else {
            return Ok(ConfigMap::new());
        };

        let wrapper: serde_json::Value = serde_json::from_str(&blob).map_err(|e| {
            KsmError::Configuration(format!("secure storage blob is not JSON: {e}"))
        })?;
        let serialized = wrapper
            .get("data")
            .and_then(|d| d.as_str())
            .ok_or_else(|| KsmError::Configuration("secure storage blob has no 'data' string".into()))?;

        let actual = content_hash(serialized);
        match self
            .backend
            .get(&self.sidecar_name())
            .map_err(|e| self.backend_err("sidecar read", e))?
        {
            Some(expected) if expected.trim() != actual => {
                return Err(KsmError::IntegrityViolation(format!(
                    "stored config for profile '{}' does not match its integrity hash",
                    self.profile
                )));
            }
            Some(_) => {}
            None => tracing::debug!(profile = %self.profile, "no integrity sidecar, trusting stored config"),
        }

        let value: serde_json::Value = serde_json::from_str(serialized).map_err(|e| {
            KsmError::Configuration(format!("stored config is malformed JSON: {e}"))
        })?;
        let config = config_from_json(&value)?;
        *self.last_saved_hash.borrow_mut() = Some(actual);
        Ok(config)
    }

    pub fn delete_profile(&mut self) -> KsmResult<()> {
        self.backend
            .delete(&self.profile)
            .map_err(|e| self.backend_err("delete", e))?;
        self.backend
            .delete(&self.sidecar_name())
            .map_err(|e| self.backend_err("sidecar delete", e))?;
        *self.last_saved_hash.borrow_mut() = None;
        Ok(())
    }
}

impl<B: SecretBackend> ConfigStore for SecureConfigStore<B> {
    fn read_storage(&self) -> KsmResult<ConfigMap> {
        self.load_profile()
    }

    fn save_storage(&mut self, config: &ConfigMap) -> KsmResult<()> {
        self.save_profile(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret_backend::InMemorySecretBackend;
    use ksm_core::ConfigKey;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample() -> ConfigMap {
        let mut config = ConfigMap::new();
        config.insert(ConfigKey::ClientId, "cid".into());
        config.insert(ConfigKey::AppKey, "YXBwLWtleQ==".into());
        config
    }

    #[test]
    fn save_then_load() {
        let backend = InMemorySecretBackend::new();
        let mut store = SecureConfigStore::new(backend.clone(), "default");
        store.save_profile(&sample()).unwrap();

        let fresh = SecureConfigStore::new(backend.clone(), "default");
        assert_eq!(fresh.load_profile().unwrap(), sample());
        assert!(backend.get("default.integrity").unwrap().is_some());
    }

    #[test]
    fn tampered_blob_is_integrity_violation() {
        let backend = InMemorySecretBackend::new();
        let mut store = SecureConfigStore::new(backend.clone(), "default");
        store.save_profile(&sample()).unwrap();

        backend
            .set("default", r#"{"data":"{\"clientId\":\"attacker\"}"}"#)
            .unwrap();
        let err = SecureConfigStore::new(backend, "default")
            .load_profile()
            .unwrap_err();
        assert!(matches!(err, KsmError::IntegrityViolation(_)), "{err}");
    }

    #[test]
    fn legacy_entry_without_sidecar_loads() {
        let backend = InMemorySecretBackend::new();
        backend
            .set("legacy", r#"{"data":"{\"clientId\":\"cid\",\"unknownKey\":1}"}"#)
            .unwrap();
        let config = SecureConfigStore::new(backend, "legacy").load_profile().unwrap();
        assert_eq!(config.get(&ConfigKey::ClientId).map(String::as_str), Some("cid"));
        assert_eq!(config.len(), 1);
    }

    #[test]
    fn missing_profile_is_empty() {
        let store = SecureConfigStore::new(InMemorySecretBackend::new(), "none");
        assert!(store.load_profile().unwrap().is_empty());
    }

    struct CountingBackend {
        inner: InMemorySecretBackend,
        writes: AtomicUsize,
    }

    impl SecretBackend for CountingBackend {
        fn get(&self, name: &str) -> anyhow::Result<Option<String>> {
            self.inner.get(name)
        }
        fn set(&self, name: &str, value: &str) -> anyhow::Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set(name, value)
        }
        fn delete(&self, name: &str) -> anyhow::Result<()> {
            self.inner.delete(name)
        }
    }

    #[test]
    fn identical_save_is_skipped() {
        let mut store = SecureConfigStore::new(
            CountingBackend {
                inner: InMemorySecretBackend::new(),
                writes: AtomicUsize::new(0),
            },
            "p",
        );
        store.save_profile(&sample()).unwrap();
        let after_first = store.backend.writes.load(Ordering::SeqCst);
        assert_eq!(after_first, 2, "blob + sidecar");

        store.save_profile(&sample()).unwrap();
        assert_eq!(store.backend.writes.load(Ordering::SeqCst), after_first);

        let mut changed = sample();
        changed.insert(ConfigKey::ServerPublicKeyId, "8".into());
        store.save_profile(&changed).unwrap();
        assert_eq!(store.backend.writes.load(Ordering::SeqCst), after_first + 2);
    }

    #[test]
    fn sidecar_disabled_writes_blob_only() {
        let backend = InMemorySecretBackend::new();
        let mut store = SecureConfigStore::new(backend.clone(), "p").with_sidecar(false);
        store.save_profile(&sample()).unwrap();
        assert!(backend.get("p.integrity").unwrap().is_none());
        assert_eq!(store.load_profile().unwrap(), sample());
    }

    #[test]
    fn disabling_sidecar_drops_stale_hash() {
        let backend = InMemorySecretBackend::new();
        SecureConfigStore::new(backend.clone(), "p")
            .save_profile(&sample())
            .unwrap();
        assert!(backend.get("p.integrity").unwrap().is_some());

        let mut changed = sample();
        changed.insert(ConfigKey::ServerPublicKeyId, "9".into());
        let mut store = SecureConfigStore::new(backend.clone(), "p").with_sidecar(false);
        store.save_profile(&changed).unwrap();

        assert!(backend.get("p.integrity").unwrap().is_none());
        assert_eq!(store.load_profile().unwrap(), changed);
        assert_eq!(
            SecureConfigStore::new(backend, "p").load_profile().unwrap(),
            changed
        );
    }

    #[test]
    fn delete_profile_removes_both_entries() {
        let backend = InMemorySecretBackend::new();
        let mut store = SecureConfigStore::new(backend.clone(), "p");
        store.save_profile(&sample()).unwrap();
        store.delete_profile().unwrap();
        assert!(backend.get("p").unwrap().is_none());
        assert!(backend.get("p.integrity").unwrap().is_none());
    }
}
