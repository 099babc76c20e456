//! External helper binary backend
//!
//! For secret stores without a native binding (cloud KMS bridges, HSM
//! agents) a helper executable is invoked per operation:
//!
//! ```text
//! <helper> get    <service> <name>    value on stdout, exit 2 if absent
//! <helper> set    <service> <name>    value on stdin
//! <helper> delete <service> <name>
//! ```
//!
//! Values never travel in argv. The binary's SHA-256 must be in the
//! known-good set before it is ever run; a mismatch is fatal unless the
//! policy is downgraded to `warn`. The set is fixed when the crate is
//! built (`KSM_HELPER_SHA256`, comma separated) and may be extended by
//! `helper_known_hashes` in the settings file. The digest accepted at
//! construction is pinned and checked again before every invocation.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use ksm_core::config::HashPolicy;
use ksm_core::{KsmError, KsmResult};
use sha2::{Digest, Sha256};

use crate::secret_backend::SecretBackend;

const EXIT_NOT_FOUND: i32 = 2;

/// Helper releases trusted by this build, set by the packager at compile time.
const KNOWN_HELPER_HASHES: Option<&str> = option_env!("KSM_HELPER_SHA256");

pub struct HelperBackend {
    path: PathBuf,
    service: String,
    /// Digest of the binary as verified in `new`.
    pinned: String,
}

/// SHA-256 of a file, lowercase hex.
pub fn file_sha256(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading helper {}", path.display()))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

fn builtin_hashes() -> impl Iterator<Item = &'static str> {
    KNOWN_HELPER_HASHES
        .into_iter()
        .flat_map(|list| list.split(','))
        .map(str::trim)
        .filter(|h| !h.is_empty())
}

/// Where a helper digest was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trust {
    Builtin,
    Settings,
    Unknown,
}

fn trust_of<'a>(actual: &str, builtin: impl IntoIterator<Item = &'a str>, extra: &[String]) -> Trust {
    let same = |h: &str| h.trim().eq_ignore_ascii_case(actual);
    if builtin.into_iter().any(same) {
        Trust::Builtin
    } else if extra.iter().any(|h| same(h.as_str())) {
        Trust::Settings
    } else {
        Trust::Unknown
    }
}

impl HelperBackend {
    /// Verify the helper against the built-in known-good set plus
    /// `extra_hashes` and build the backend.
    pub fn new(
        path: &Path,
        service: &str,
        policy: HashPolicy,
        extra_hashes: &[String],
    ) -> KsmResult<Self> {
        let actual = file_sha256(path)
            .map_err(|e| KsmError::Configuration(format!("secure storage helper: {e:#}")))?;

        match trust_of(&actual, builtin_hashes(), extra_hashes) {
            Trust::Builtin => tracing::debug!(helper = %path.display(), "helper hash verified"),
            Trust::Settings => tracing::warn!(
                helper = %path.display(),
                "helper trusted through helper_known_hashes in the settings file, not a built-in hash"
            ),
            Trust::Unknown => {
                let msg = format!("helper {} has unrecognised SHA-256 {actual}", path.display());
                match policy {
                    HashPolicy::Enforce => return Err(KsmError::IntegrityViolation(msg)),
                    HashPolicy::Warn => tracing::warn!("{msg} (hash policy downgraded to warn)"),
                }
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            service: service.to_string(),
            pinned: actual,
        })
    }

    /// Build the invocation, refusing a binary that changed since `new`.
    fn command(&self, op: &str, name: &str) -> Result<Command> {
        let actual = file_sha256(&self.path)?;
        if actual != self.pinned {
            return Err(KsmError::IntegrityViolation(format!(
                "helper {} changed since it was verified (SHA-256 {actual})",
                self.path.display()
            ))
            .into());
        }
        let mut cmd = Command::new(&self.path);
        cmd.args([op, self.service.as_str(), name])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        Ok(cmd)
    }
}

impl SecretBackend for HelperBackend {
    fn get(&self, name: &str) -> Result<Option<String>> {
        let output = self
            .command("get", name)?
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("spawning helper {}", self.path.display()))?;

        if output.status.code() == Some(EXIT_NOT_FOUND) {
            return Ok(None);
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("helper get '{name}' failed ({}): {}", output.status, stderr.trim());
        }

        let mut value = String::from_utf8(output.stdout).context("helper output is not valid UTF-8")?;
        if value.ends_with('\n') {
            value.pop();
        }
        Ok(Some(value))
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        let mut child = self
            .command("set", name)?
            .stdin(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning helper {}", self.path.display()))?;

        // stdin is dropped at the end of the match: EOF for the helper
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(value.as_bytes()),
            None => Ok(()),
        };
        let output = child.wait_with_output().context("waiting for helper")?;
        written.context("writing to helper stdin")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("helper set '{name}' failed ({}): {}", output.status, stderr.trim());
        }
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let output = self
            .command("delete", name)?
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("spawning helper {}", self.path.display()))?;
        if !output.status.success() && output.status.code() != Some(EXIT_NOT_FOUND) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("helper delete '{name}' failed ({}): {}", output.status, stderr.trim());
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"#!/bin/sh
dir="$(dirname "$0")/store"
mkdir -p "$dir"
f="$dir/$2.$3"
case "$1" in
  get) [ -f "$f" ] || exit 2; cat "$f" ;;
  set) cat > "$f" ;;
  delete) rm -f "$f" ;;
  *) echo "unknown op $1" >&2; exit 64 ;;
esac
"#;

    fn install_script(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("ksm-helper");
        std::fs::write(&path, SCRIPT).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    // One test drives every subprocess so no other test thread can fork while
    // the script file is still open for writing.
    #[test]
    fn helper_lifecycle_and_hash_policy() {
        let dir = tempfile::tempdir().unwrap();
        let script = install_script(dir.path());
        let good = file_sha256(&script).unwrap();

        let err = HelperBackend::new(&script, "ksm", HashPolicy::Enforce, &["00".repeat(32)])
            .err()
            .unwrap();
        assert!(matches!(err, KsmError::IntegrityViolation(_)));

        assert!(HelperBackend::new(&script, "ksm", HashPolicy::Warn, &[]).is_ok());

        let backend =
            HelperBackend::new(&script, "ksm", HashPolicy::Enforce, &[good.to_uppercase()]).unwrap();
        assert_eq!(backend.get("profile").unwrap(), None);

        backend.set("profile", "{\"data\":\"{}\"}").unwrap();
        assert_eq!(backend.get("profile").unwrap().as_deref(), Some("{\"data\":\"{}\"}"));

        backend.delete("profile").unwrap();
        assert_eq!(backend.get("profile").unwrap(), None);

        // a helper that exits without reading its input
        let deaf = dir.path().join("ksm-helper-deaf");
        std::fs::copy(&script, &deaf).unwrap();
        std::fs::write(&deaf, "#!/bin/sh\nexit 0\n").unwrap();
        let deaf_hash = file_sha256(&deaf).unwrap();
        let quiet = HelperBackend::new(&deaf, "ksm", HashPolicy::Enforce, &[deaf_hash]).unwrap();
        let err = quiet.set("profile", &"x".repeat(1 << 20)).unwrap_err();
        assert!(err.to_string().contains("helper stdin"), "{err:#}");

        // swapped after verification: refused before it runs
        std::fs::write(&script, format!("{SCRIPT}# replaced\n")).unwrap();
        let err = backend.get("profile").unwrap_err();
        assert!(
            matches!(err.downcast_ref::<KsmError>(), Some(KsmError::IntegrityViolation(_))),
            "{err:#}"
        );
        assert!(!dir.path().join("store").join("ksm.profile").exists());
    }

    #[test]
    fn built_in_hashes_outrank_settings() {
        let digest = "ab".repeat(32);
        let settings = vec![digest.to_uppercase()];
        assert_eq!(trust_of(&digest, [digest.as_str()], &Vec::new()), Trust::Builtin);
        assert_eq!(trust_of(&digest, [digest.as_str()], &settings), Trust::Builtin);
        assert_eq!(trust_of(&digest, Vec::<&str>::new(), &settings), Trust::Settings);
        assert_eq!(trust_of(&digest, ["cd".repeat(32).as_str()], &Vec::new()), Trust::Unknown);
    }
}
