//! ksm-storage: persistence for the client's cryptographic identity
//!
//! Backends (all implement [`ConfigStore`]):
//!   - [`FileConfigStore`]: portable JSON file, mode 0600, permission-checked on read
//!   - [`MemoryConfigStore`]: process-local map, nothing persisted
//!   - [`SecureConfigStore`]: one opaque blob in an external secret store, through a
//!     [`SecretBackend`] (platform keychain or a hash-verified helper binary)
//!
//! A store holds exactly one identity. Stores are not safe for concurrent
//! read-modify-write; callers serialize access per identity.

pub mod file;
pub mod helper;
pub mod keychain;
pub mod memory;
pub mod secret_backend;
pub mod secure;

pub use file::FileConfigStore;
pub use helper::HelperBackend;
pub use keychain::KeyringBackend;
pub use memory::MemoryConfigStore;
pub use secret_backend::{InMemorySecretBackend, SecretBackend};
pub use secure::SecureConfigStore;

use ksm_core::config::{ClientSettings, StorageBackend};
use ksm_core::{ConfigKey, ConfigMap, KsmError, KsmResult};

/// Key-value persistence for one identity.
pub trait ConfigStore {
    /// Load the whole identity.
    fn read_storage(&self) -> KsmResult<ConfigMap>;

    /// Replace the whole identity.
    fn save_storage(&mut self, config: &ConfigMap) -> KsmResult<()>;

    fn get(&self, key: ConfigKey) -> KsmResult<Option<String>> {
        Ok(self.read_storage()?.remove(&key))
    }

    fn set(&mut self, key: ConfigKey, value: &str) -> KsmResult<()> {
        let mut config = self.read_storage()?;
        config.insert(key, value.to_string());
        self.save_storage(&config)
    }

    fn delete(&mut self, key: ConfigKey) -> KsmResult<()> {
        let mut config = self.read_storage()?;
        if config.remove(&key).is_some() {
            self.save_storage(&config)?;
        }
        Ok(())
    }

    fn delete_all(&mut self) -> KsmResult<()> {
        self.save_storage(&ConfigMap::new())
    }

    fn contains(&self, key: ConfigKey) -> KsmResult<bool> {
        Ok(self.read_storage()?.contains_key(&key))
    }

    fn is_empty(&self) -> KsmResult<bool> {
        Ok(self.read_storage()?.is_empty())
    }
}

/// Outcome of loading an identity, for callers that branch on the failure
/// kind instead of propagating it.
#[derive(Debug)]
pub enum ConfigLoad {
    Loaded(ConfigMap),
    Missing,
    Malformed(String),
    PermissionDenied(String),
    IntegrityMismatch(String),
}

impl ConfigLoad {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ConfigLoad::Loaded(_))
    }
}

impl From<KsmResult<ConfigMap>> for ConfigLoad {
    fn from(result: KsmResult<ConfigMap>) -> Self {
        match result {
            Ok(config) if config.is_empty() => ConfigLoad::Missing,
            Ok(config) => ConfigLoad::Loaded(config),
            Err(KsmError::AccessDenied(msg)) => ConfigLoad::PermissionDenied(msg),
            Err(KsmError::IntegrityViolation(msg)) => ConfigLoad::IntegrityMismatch(msg),
            Err(KsmError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => ConfigLoad::Missing,
            Err(KsmError::Io(e)) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                ConfigLoad::PermissionDenied(e.to_string())
            }
            Err(e) => ConfigLoad::Malformed(e.to_string()),
        }
    }
}

/// Open the store described by the `[storage]` and `[secure_storage]` settings.
pub fn open_store(settings: &ClientSettings) -> KsmResult<Box<dyn ConfigStore>> {
    let storage = &settings.storage;
    let secure = &settings.secure_storage;
    tracing::debug!(backend = ?storage.backend, "opening identity store");

    Ok(match storage.backend {
        StorageBackend::File => Box::new(
            FileConfigStore::open(&storage.path)?.strict_permissions(storage.strict_permissions),
        ),
        StorageBackend::Memory => Box::new(MemoryConfigStore::new()),
        StorageBackend::Keyring => Box::new(
            SecureConfigStore::new(KeyringBackend::new(&secure.service), &storage.profile)
                .with_sidecar(secure.integrity_sidecar),
        ),
        StorageBackend::Helper => {
            let path = secure.helper_path.as_ref().ok_or_else(|| {
                KsmError::Configuration("helper backend selected but helper_path is not set".into())
            })?;
            let backend = HelperBackend::new(
                path,
                &secure.service,
                secure.helper_hash_policy,
                &secure.helper_known_hashes,
            )?;
            Box::new(
                SecureConfigStore::new(backend, &storage.profile)
                    .with_sidecar(secure.integrity_sidecar),
            )
        }
    })
}
