pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use error::{KsmError, KsmResult};
pub use types::{ConfigKey, ConfigMap};
