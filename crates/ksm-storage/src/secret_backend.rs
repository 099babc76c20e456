use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;

/// A named-secret store (platform keychain, HSM bridge, helper binary).
/// Values are opaque strings; `get` returns `None` for a missing entry.
pub trait SecretBackend {
    fn get(&self, name: &str) -> Result<Option<String>>;
    fn set(&self, name: &str, value: &str) -> Result<()>;
    fn delete(&self, name: &str) -> Result<()>;
}

/// Map-backed secret store. Clones share the same entries, so a handle kept
/// by the caller observes (and can tamper with) what the store wrote.
#[derive(Debug, Clone, Default)]
pub struct InMemorySecretBackend {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemorySecretBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("in-memory secret backend lock poisoned"))
    }
}

impl SecretBackend for InMemorySecretBackend {
    fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        self.lock()?.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.lock()?.remove(name);
        Ok(())
    }
}
