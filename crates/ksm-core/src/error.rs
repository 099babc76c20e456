use thiserror::Error;

pub type KsmResult<T> = Result<T, KsmError>;

#[derive(Debug, Error)]
pub enum KsmError {
    /// Missing, unreadable or malformed identity material, or an unknown key id.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("throttled by server: {0}")]
    Throttled(String),

    /// Server asked for a different public key id. Consumed by the client's
    /// single rotation retry and only surfaced if that retry is not possible.
    #[error("server requested transmission key rotation to key id {key_id}")]
    KeyRotation { key_id: String },

    /// Non-2xx response or an envelope that failed to verify.
    #[error("transport error{}: {message}", status_suffix(.status))]
    Transport { status: Option<u16>, message: String },

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("operation requires a client-key binding: {0}")]
    BindingRequired(String),

    #[error("notation error: {0}")]
    Notation(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl KsmError {
    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        KsmError::Transport {
            status,
            message: message.into(),
        }
    }

    /// Errors that abort a whole call rather than a single entity.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, KsmError::Decryption(_) | KsmError::KeyRotation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_display_includes_status() {
        let e = KsmError::transport(Some(400), "bad payload");
        assert_eq!(e.to_string(), "transport error (HTTP 400): bad payload");

        let e = KsmError::transport(None, "tag mismatch");
        assert_eq!(e.to_string(), "transport error: tag mismatch");
    }

    #[test]
    fn decryption_is_not_fatal() {
        assert!(!KsmError::Decryption("record x".into()).is_fatal());
        assert!(KsmError::Configuration("no app key".into()).is_fatal());
    }
}
