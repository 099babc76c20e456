//! Static registry of record field types, keyed by schema version.
//!
//! Built once on first use. Record edits are validated against it so a
//! typo in a field type is caught before anything is encrypted.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use ksm_core::{KsmError, KsmResult};
use serde_json::Value;

pub const CURRENT_VERSION: &str = "v3";

/// Expected JSON shape of each element of a field's value list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    Text,
    Number,
    Bool,
    /// Object whose keys must come from the listed set.
    Object(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldType {
    pub name: &'static str,
    pub shape: ValueShape,
}

#[derive(Debug)]
pub struct FieldRegistry {
    version: &'static str,
    types: BTreeMap<&'static str, FieldType>,
}

const HOST: &[&str] = &["hostName", "port"];
const NAME: &[&str] = &["first", "middle", "last"];
const PHONE: &[&str] = &["region", "number", "ext", "type"];
const ADDRESS: &[&str] = &["street1", "street2", "city", "state", "zip", "country"];
const PAYMENT_CARD: &[&str] = &["cardNumber", "cardExpirationDate", "cardSecurityCode"];
const BANK_ACCOUNT: &[&str] = &["accountType", "routingNumber", "accountNumber", "otherType"];
const KEY_PAIR: &[&str] = &["publicKey", "privateKey"];
const SECURITY_QUESTION: &[&str] = &["question", "answer"];
const SCRIPT: &[&str] = &["fileRef", "command", "recordRef"];
const PASSKEY: &[&str] = &[
    "privateKey",
    "credentialId",
    "signCount",
    "userId",
    "relyingParty",
    "username",
    "createdDate",
];
const APP_FILLER: &[&str] = &["applicationTitle", "contentFilter", "macroSequence"];
const PAM_RESOURCES: &[&str] = &["controllerUid", "folderUid", "resourceRef"];

const V3_TYPES: &[FieldType] = &[
    FieldType { name: "text", shape: ValueShape::Text },
    FieldType { name: "multiline", shape: ValueShape::Text },
    FieldType { name: "secret", shape: ValueShape::Text },
    FieldType { name: "note", shape: ValueShape::Text },
    FieldType { name: "login", shape: ValueShape::Text },
    FieldType { name: "password", shape: ValueShape::Text },
    FieldType { name: "url", shape: ValueShape::Text },
    FieldType { name: "email", shape: ValueShape::Text },
    FieldType { name: "oneTimeCode", shape: ValueShape::Text },
    FieldType { name: "otp", shape: ValueShape::Text },
    FieldType { name: "pinCode", shape: ValueShape::Text },
    FieldType { name: "accountNumber", shape: ValueShape::Text },
    FieldType { name: "licenseNumber", shape: ValueShape::Text },
    FieldType { name: "fileRef", shape: ValueShape::Text },
    FieldType { name: "addressRef", shape: ValueShape::Text },
    FieldType { name: "cardRef", shape: ValueShape::Text },
    FieldType { name: "recordRef", shape: ValueShape::Text },
    FieldType { name: "dropdown", shape: ValueShape::Text },
    FieldType { name: "wifiEncryption", shape: ValueShape::Text },
    FieldType { name: "databaseType", shape: ValueShape::Text },
    FieldType { name: "directoryType", shape: ValueShape::Text },
    FieldType { name: "trafficEncryptionSeed", shape: ValueShape::Text },
    FieldType { name: "date", shape: ValueShape::Number },
    FieldType { name: "birthDate", shape: ValueShape::Number },
    FieldType { name: "expirationDate", shape: ValueShape::Number },
    FieldType { name: "checkbox", shape: ValueShape::Bool },
    FieldType { name: "isSSIDHidden", shape: ValueShape::Bool },
    FieldType { name: "host", shape: ValueShape::Object(HOST) },
    FieldType { name: "pamHostname", shape: ValueShape::Object(HOST) },
    FieldType { name: "name", shape: ValueShape::Object(NAME) },
    FieldType { name: "phone", shape: ValueShape::Object(PHONE) },
    FieldType { name: "address", shape: ValueShape::Object(ADDRESS) },
    FieldType { name: "paymentCard", shape: ValueShape::Object(PAYMENT_CARD) },
    FieldType { name: "bankAccount", shape: ValueShape::Object(BANK_ACCOUNT) },
    FieldType { name: "keyPair", shape: ValueShape::Object(KEY_PAIR) },
    FieldType { name: "securityQuestion", shape: ValueShape::Object(SECURITY_QUESTION) },
    FieldType { name: "script", shape: ValueShape::Object(SCRIPT) },
    FieldType { name: "passkey", shape: ValueShape::Object(PASSKEY) },
    FieldType { name: "appFiller", shape: ValueShape::Object(APP_FILLER) },
    FieldType { name: "pamResources", shape: ValueShape::Object(PAM_RESOURCES) },
];

fn registries() -> &'static BTreeMap<&'static str, FieldRegistry> {
    static REGISTRIES: OnceLock<BTreeMap<&'static str, FieldRegistry>> = OnceLock::new();
    REGISTRIES.get_or_init(|| {
        let mut map = BTreeMap::new();
        map.insert(
            CURRENT_VERSION,
            FieldRegistry {
                version: CURRENT_VERSION,
                types: V3_TYPES.iter().map(|t| (t.name, *t)).collect(),
            },
        );
        map
    })
}

/// Registry for a schema version tag, e.g. `"v3"`.
pub fn registry(version: &str) -> Option<&'static FieldRegistry> {
    registries().get(version)
}

/// Registry for the schema version this client writes.
pub fn current() -> &'static FieldRegistry {
    &registries()[CURRENT_VERSION]
}

impl FieldRegistry {
    pub fn version(&self) -> &'static str {
        self.version
    }

    pub fn get(&self, name: &str) -> Option<&FieldType> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Check that `field_type` exists and every element of `values` has its shape.
    pub fn validate(&self, field_type: &str, values: &[Value]) -> KsmResult<()> {
        let entry = self.get(field_type).ok_or_else(|| {
            KsmError::Validation(format!(
                "unknown field type '{field_type}' for schema {}",
                self.version
            ))
        })?;
        for (i, value) in values.iter().enumerate() {
            if !entry.shape.accepts(value) {
                return Err(KsmError::Validation(format!(
                    "value {i} of '{field_type}' field does not match {:?}",
                    entry.shape
                )));
            }
        }
        Ok(())
    }
}

impl ValueShape {
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ValueShape::Text, Value::String(_)) => true,
            (ValueShape::Number, Value::Number(_)) => true,
            (ValueShape::Bool, Value::Bool(_)) => true,
            (ValueShape::Object(keys), Value::Object(map)) => {
                map.keys().all(|k| keys.iter().any(|allowed| *allowed == k.as_str()))
            }
            _ => false,
        }
    }
}
