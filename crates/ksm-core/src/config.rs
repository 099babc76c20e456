use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{KsmError, KsmResult};
use crate::logging::LogFormat;

/// Client settings (loaded from ksm.toml). Identity material never lives
/// here, only where to find it and how to talk to the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub client: ClientSection,
    pub storage: StorageSettings,
    pub secure_storage: SecureStorageSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// Overrides the hostname derived from the one-time token region
    pub hostname: Option<String>,
    /// Server public key id used until the server asks for another one
    pub server_public_key_id: String,
    /// Verify the server TLS certificate (passed through to the transport)
    pub verify_ssl_certs: bool,
}

/// Which identity store backend to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    File,
    Memory,
    Keyring,
    Helper,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    /// JSON config file path (file backend)
    pub path: PathBuf,
    /// Treat a group/world-readable config file as an error instead of a warning
    pub strict_permissions: bool,
    /// Profile name (secure backends)
    pub profile: String,
}

/// What to do when a helper binary's hash is not in the known-good set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashPolicy {
    Enforce,
    Warn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecureStorageSettings {
    /// Service/application name the secret store entries are filed under
    pub service: String,
    /// External helper binary (helper backend)
    pub helper_path: Option<PathBuf>,
    pub helper_hash_policy: HashPolicy,
    /// SHA-256 hex digests accepted for the helper binary in addition to the
    /// set built into the crate
    pub helper_known_hashes: Vec<String>,
    /// Write and check the integrity sidecar entry
    pub integrity_sidecar: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            hostname: None,
            server_public_key_id: "7".into(),
            verify_ssl_certs: true,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            path: PathBuf::from("client-config.json"),
            strict_permissions: false,
            profile: "default".into(),
        }
    }
}

impl Default for SecureStorageSettings {
    fn default() -> Self {
        Self {
            service: "ksm".into(),
            helper_path: None,
            helper_hash_policy: HashPolicy::Enforce,
            helper_known_hashes: Vec::new(),
            integrity_sidecar: true,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

impl ClientSettings {
    /// Load settings from a TOML file, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: &Path) -> KsmResult<Self> {
        if !path.exists() {
            tracing::warn!("settings file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            KsmError::Configuration(format!("reading settings {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
            .map_err(|e| KsmError::Configuration(format!("parsing settings {}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
