use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::KsmError;

/// Keys an identity store may hold. The JSON names are shared with every
/// other SDK that reads the same config file and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigKey {
    Url,
    ClientId,
    ClientKey,
    AppKey,
    PrivateKey,
    AppOwnerPublicKey,
    ServerPublicKeyId,
    BindingToken,
    BindingKey,
    Hostname,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 10] = [
        ConfigKey::Url,
        ConfigKey::ClientId,
        ConfigKey::ClientKey,
        ConfigKey::AppKey,
        ConfigKey::PrivateKey,
        ConfigKey::AppOwnerPublicKey,
        ConfigKey::ServerPublicKeyId,
        ConfigKey::BindingToken,
        ConfigKey::BindingKey,
        ConfigKey::Hostname,
    ];

    /// Name used in the persisted JSON object.
    pub fn json_name(self) -> &'static str {
        match self {
            ConfigKey::Url => "url",
            ConfigKey::ClientId => "clientId",
            ConfigKey::ClientKey => "clientKey",
            ConfigKey::AppKey => "appKey",
            ConfigKey::PrivateKey => "privateKey",
            ConfigKey::AppOwnerPublicKey => "appOwnerPublicKey",
            ConfigKey::ServerPublicKeyId => "serverPublicKeyId",
            ConfigKey::BindingToken => "bat",
            ConfigKey::BindingKey => "bindingKey",
            ConfigKey::Hostname => "hostname",
        }
    }

    pub fn from_json_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.json_name() == name)
    }

    /// Whether the value is key material that must never be logged.
    pub fn is_secret(self) -> bool {
        matches!(
            self,
            ConfigKey::ClientKey
                | ConfigKey::AppKey
                | ConfigKey::PrivateKey
                | ConfigKey::BindingToken
                | ConfigKey::BindingKey
        )
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.json_name())
    }
}

impl FromStr for ConfigKey {
    type Err = KsmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_json_name(s)
            .ok_or_else(|| KsmError::Configuration(format!("unknown config key: {s}")))
    }
}

/// In-memory view of one identity: config key → string value.
pub type ConfigMap = BTreeMap<ConfigKey, String>;

/// Render a config map as the portable JSON object (sorted keys).
pub fn config_to_json(map: &ConfigMap) -> serde_json::Value {
    let obj: serde_json::Map<String, serde_json::Value> = map
        .iter()
        .map(|(k, v)| (k.json_name().to_string(), serde_json::Value::String(v.clone())))
        .collect();
    serde_json::Value::Object(obj)
}

/// Parse the portable JSON object. Unknown keys are skipped, numeric values
/// (older configs wrote `serverPublicKeyId` as a number) become strings.
pub fn config_from_json(value: &serde_json::Value) -> Result<ConfigMap, KsmError> {
    let obj = value
        .as_object()
        .ok_or_else(|| KsmError::Configuration("config root is not a JSON object".into()))?;

    let mut map = ConfigMap::new();
    for (name, v) in obj {
        let Some(key) = ConfigKey::from_json_name(name) else {
            tracing::debug!(key = %name, "ignoring unknown config key");
            continue;
        };
        let value = match v {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Null => continue,
            other => {
                return Err(KsmError::Configuration(format!(
                    "config key '{name}' has non-string value: {other}"
                )))
            }
        };
        map.insert(key, value);
    }
    Ok(map)
}
