use serde::{Deserialize, Serialize};

use crate::error::{KsmError, KsmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

/// Install a global tracing subscriber. `RUST_LOG` wins over `level`.
///
/// Intended for the embedding application; the library itself only emits
/// events and never installs a subscriber on its own.
pub fn init(level: &str, format: LogFormat) -> KsmResult<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let result = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init(),
    };

    result.map_err(|e| KsmError::Configuration(format!("installing tracing subscriber: {e}")))
}
