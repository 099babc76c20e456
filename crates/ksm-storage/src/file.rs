//! JSON file identity store
//!
//! The file holds the portable config object (`clientId`, `privateKey`, ...)
//! shared with other SDK implementations. It is created with mode 0600 and
//! its mode is checked on every read:
//!   - broader than owner read/write → "too open" warning (error in strict mode)
//!   - owner read bit missing → `AccessDenied`
//!
//! An empty file is initialised to `{}`; malformed JSON and non-UTF-8 content
//! are reported separately.

use std::io::Write;
use std::path::{Path, PathBuf};

use ksm_core::types::{config_from_json, config_to_json};
use ksm_core::{ConfigMap, KsmError, KsmResult};

use crate::{ConfigLoad, ConfigStore};

/// Result of the permission check performed before each read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionCheck {
    Ok,
    TooOpen { mode: u32 },
}

pub struct FileConfigStore {
    path: PathBuf,
    strict_permissions: bool,
}

impl FileConfigStore {
    /// Open (and create with mode 0600 if absent) the config file at `path`.
    pub fn open(path: &Path) -> KsmResult<Self> {
        let store = Self {
            path: path.to_path_buf(),
            strict_permissions: false,
        };
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            write_private(path, b"{}")?;
            tracing::debug!("created config file: {}", path.display());
        }
        Ok(store)
    }

    /// Load without creating the file.
    pub fn load(path: &Path) -> ConfigLoad {
        if !path.exists() {
            return ConfigLoad::Missing;
        }
        let store = Self {
            path: path.to_path_buf(),
            strict_permissions: false,
        };
        store.read_storage().into()
    }

    /// Treat a too-open file as an error instead of a warning.
    pub fn strict_permissions(mut self, strict: bool) -> Self {
        self.strict_permissions = strict;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inspect the file mode. Fails with `AccessDenied` when the owner
    /// cannot read the file.
    pub fn check_permissions(&self) -> KsmResult<PermissionCheck> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let metadata = std::fs::metadata(&self.path)?;
            let mode = metadata.permissions().mode() & 0o777;
            if mode & 0o400 == 0 {
                return Err(KsmError::AccessDenied(format!(
                    "config file {} is not readable (mode {mode:04o})",
                    self.path.display()
                )));
            }
            if mode & 0o077 != 0 {
                return Ok(PermissionCheck::TooOpen { mode });
            }
        }
        Ok(PermissionCheck::Ok)
    }

    fn read_bytes(&self) -> KsmResult<Vec<u8>> {
        std::fs::read(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => KsmError::AccessDenied(format!(
                "cannot read config file {}: {e}",
                self.path.display()
            )),
            std::io::ErrorKind::NotFound => KsmError::Configuration(format!(
                "config file {} does not exist",
                self.path.display()
            )),
            _ => KsmError::Io(e),
        })
    }
}

impl ConfigStore for FileConfigStore {
    fn read_storage(&self) -> KsmResult<ConfigMap> {
        if let PermissionCheck::TooOpen { mode } = self.check_permissions()? {
            let msg = format!(
                "config file {} is too open (mode {mode:04o}); expected 0600",
                self.path.display()
            );
            if self.strict_permissions {
                return Err(KsmError::AccessDenied(msg));
            }
            tracing::warn!("{msg}");
        }

        let bytes = self.read_bytes()?;
        let text = String::from_utf8(bytes).map_err(|_| {
            KsmError::Configuration(format!(
                "config file {} is not UTF-8 encoded",
                self.path.display()
            ))
        })?;

        if text.trim().is_empty() {
            tracing::debug!("config file {} is empty, initialising", self.path.display());
            write_private(&self.path, b"{}")?;
            return Ok(ConfigMap::new());
        }

        let value: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            KsmError::Configuration(format!(
                "config file {} contains malformed JSON: {e}",
                self.path.display()
            ))
        })?;
        config_from_json(&value)
    }

    fn save_storage(&mut self, config: &ConfigMap) -> KsmResult<()> {
        let json = serde_json::to_string_pretty(&config_to_json(config))?;
        atomic_replace(&self.path, json.as_bytes())
    }
}

/// Write `content` to a sibling temp file with mode 0600, then rename over
/// `path` so readers never see a partial file.
fn atomic_replace(path: &Path, content: &[u8]) -> KsmResult<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));

    if tmp_path.exists() {
        std::fs::remove_file(&tmp_path)?;
    }
    write_private(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    tracing::debug!("config file saved: {}", path.display());
    Ok(())
}

fn write_private(path: &Path, content: &[u8]) -> KsmResult<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(content)?;
    file.sync_all()?;
    Ok(())
}
