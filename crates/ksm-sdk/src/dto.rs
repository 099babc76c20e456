//! Decrypted vault entities.

use std::cell::OnceCell;
use std::fmt;

use ksm_core::KsmResult;
use ksm_crypto::{decrypt_aes_gcm, SymmetricKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use zeroize::Zeroizing;

/// One typed field. Unknown attributes (`required`, `privacyScreen`, ...)
/// are kept so a saved record round-trips byte-compatible JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub value: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Field {
    pub fn new(field_type: &str, label: Option<&str>, value: Vec<Value>) -> Self {
        Self {
            field_type: field_type.to_string(),
            label: label.map(str::to_string),
            value,
            extra: Map::new(),
        }
    }

    /// Matches `name` by label first, then by type.
    pub fn is_named(&self, name: &str) -> bool {
        self.label.as_deref() == Some(name) || self.field_type == name
    }
}

/// Plaintext JSON of a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordData {
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub record_type: String,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub custom: Vec<Field>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone)]
pub struct Record {
    pub uid: String,
    pub folder_uid: Option<String>,
    pub revision: i64,
    pub is_editable: bool,
    pub data: RecordData,
    pub files: Vec<KeeperFile>,
    /// Uids of attachments whose key or metadata did not decrypt.
    pub bad_files: Vec<String>,
    record_key: SymmetricKey,
    password: Option<Zeroizing<String>>,
}

impl Record {
    pub(crate) fn new(
        uid: String,
        folder_uid: Option<String>,
        revision: i64,
        is_editable: bool,
        data: RecordData,
        files: Vec<KeeperFile>,
        record_key: SymmetricKey,
    ) -> Self {
        let password = login_password(&data);
        Self {
            uid,
            folder_uid,
            revision,
            is_editable,
            data,
            files,
            bad_files: Vec::new(),
            record_key,
            password,
        }
    }

    pub fn title(&self) -> &str {
        &self.data.title
    }

    pub fn record_type(&self) -> &str {
        &self.data.record_type
    }

    pub fn notes(&self) -> Option<&str> {
        self.data.notes.as_deref()
    }

    /// Cached password of a `login` record.
    pub fn password(&self) -> Option<&str> {
        self.password.as_ref().map(|p| p.as_str())
    }

    pub fn record_key(&self) -> &SymmetricKey {
        &self.record_key
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.data.fields.iter().find(|f| f.is_named(name))
    }

    pub fn custom_field(&self, name: &str) -> Option<&Field> {
        self.data.custom.iter().find(|f| f.is_named(name))
    }

    pub fn file(&self, name: &str) -> Option<&KeeperFile> {
        self.files
            .iter()
            .find(|f| f.uid == name || f.name == name || f.title == name)
    }
}

/// First `password` field of a login record. An empty value list leaves
/// the accessor unset.
fn login_password(data: &RecordData) -> Option<Zeroizing<String>> {
    if data.record_type != "login" {
        return None;
    }
    let field = data.fields.iter().find(|f| f.field_type == "password")?;
    match field.value.first() {
        Some(Value::String(s)) if !s.is_empty() => Some(Zeroizing::new(s.clone())),
        _ => None,
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("uid", &self.uid)
            .field("type", &self.data.record_type)
            .field("title", &self.data.title)
            .field("folder_uid", &self.folder_uid)
            .field("revision", &self.revision)
            .field("fields", &self.data.fields.len())
            .field("custom", &self.data.custom.len())
            .field("files", &self.files.len())
            .field("bad_files", &self.bad_files)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Folder {
    pub uid: String,
    pub parent_uid: Option<String>,
    pub name: Option<String>,
    pub records: Vec<Record>,
    key: SymmetricKey,
}

impl Folder {
    pub(crate) fn new(
        uid: String,
        parent_uid: Option<String>,
        name: Option<String>,
        records: Vec<Record>,
        key: SymmetricKey,
    ) -> Self {
        Self {
            uid,
            parent_uid,
            name,
            records,
            key,
        }
    }

    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }
}

/// File attachment. Content is fetched by the caller (the core makes no
/// download calls) and decrypted once, on first access.
#[derive(Clone)]
pub struct KeeperFile {
    pub uid: String,
    pub name: String,
    pub title: String,
    pub mime_type: String,
    pub size: u64,
    pub last_modified: i64,
    pub url: Option<String>,
    file_key: SymmetricKey,
    content: OnceCell<Vec<u8>>,
}

impl KeeperFile {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        uid: String,
        name: String,
        title: String,
        mime_type: String,
        size: u64,
        last_modified: i64,
        url: Option<String>,
        file_key: SymmetricKey,
    ) -> Self {
        Self {
            uid,
            name,
            title,
            mime_type,
            size,
            last_modified,
            url,
            file_key,
            content: OnceCell::new(),
        }
    }

    pub fn file_key(&self) -> &SymmetricKey {
        &self.file_key
    }

    /// Decrypted content, calling `fetch` for the encrypted bytes only if
    /// nothing is cached yet.
    pub fn content_with<F>(&self, fetch: F) -> KsmResult<&[u8]>
    where
        F: FnOnce(&KeeperFile) -> KsmResult<Vec<u8>>,
    {
        if self.content.get().is_none() {
            let encrypted = fetch(self)?;
            let plaintext = decrypt_aes_gcm(&self.file_key, &encrypted)?;
            tracing::debug!(file_uid = %self.uid, bytes = plaintext.len(), "decrypted file content");
            let _ = self.content.set(plaintext);
        }
        Ok(self.content.get().map(Vec::as_slice).unwrap_or_default())
    }

    /// Decrypt already-downloaded bytes and cache the result.
    pub fn decrypt_content(&self, encrypted: &[u8]) -> KsmResult<&[u8]> {
        self.content_with(|_| Ok(encrypted.to_vec()))
    }

    pub fn cached_content(&self) -> Option<&[u8]> {
        self.content.get().map(Vec::as_slice)
    }
}

impl fmt::Debug for KeeperFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeeperFile")
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size)
            .field("cached", &self.content.get().is_some())
            .finish_non_exhaustive()
    }
}
