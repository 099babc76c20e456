//! JSON shapes exchanged with the server, before encryption and after
//! decryption. Key material and data blobs are base64 strings; the server
//! uses camelCase names.

use serde::{Deserialize, Deserializer, Serialize};

/// `null` and absent both mean "empty".
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ── Requests ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPayload {
    pub client_version: String,
    pub client_id: String,
    /// Present only on the binding request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_records: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayload {
    pub client_version: String,
    pub client_id: String,
    pub record_uid: String,
    pub data: String,
    pub revision: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePayload {
    pub client_version: String,
    pub client_id: String,
    pub record_uid: String,
    /// Record key wrapped with the app key.
    pub record_key: String,
    pub folder_uid: String,
    /// Record key wrapped with the folder key.
    pub folder_key: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePayload {
    pub client_version: String,
    pub client_id: String,
    pub record_uids: Vec<String>,
}

// ── Responses ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_app_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_owner_public_key: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub folders: Vec<FolderBlob>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub records: Vec<RecordBlob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_on: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderBlob {
    pub folder_uid: String,
    pub folder_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Encrypted `{"name": ...}` under the folder key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub records: Vec<RecordBlob>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordBlob {
    pub record_uid: String,
    /// Absent for a single-record share: the resolving key is the record key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_key: Option<String>,
    pub data: String,
    #[serde(default)]
    pub revision: i64,
    #[serde(default)]
    pub is_editable: bool,
    #[serde(default, alias = "innerFolderUid", skip_serializing_if = "Option::is_none")]
    pub folder_uid: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub files: Vec<FileBlob>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileBlob {
    pub file_uid: String,
    pub file_key: String,
    /// Encrypted metadata under the file key.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// Plaintext of [`FileBlob::data`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "type")]
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub last_modified: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub records: Vec<DeleteStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteStatus {
    pub record_uid: String,
    pub response_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Plaintext JSON body of a non-2xx response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Number or string depending on server version.
    #[serde(default)]
    pub key_id: Option<serde_json::Value>,
}

impl ServerError {
    pub fn key_id(&self) -> Option<String> {
        match self.key_id.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_tolerates_nulls_and_missing_lists() {
        let response: SecretsResponse =
            serde_json::from_str(r#"{"folders":null,"expiresOn":1700000000}"#).unwrap();
        assert!(response.folders.is_empty());
        assert!(response.records.is_empty());
        assert_eq!(response.expires_on, Some(1_700_000_000));
    }

    #[test]
    fn inner_folder_uid_alias() {
        let record: RecordBlob =
            serde_json::from_str(r#"{"recordUid":"r","data":"","innerFolderUid":"f"}"#).unwrap();
        assert_eq!(record.folder_uid.as_deref(), Some("f"));
    }

    #[test]
    fn binding_payload_carries_public_key_only_when_set() {
        let payload = GetPayload {
            client_version: "mr0".into(),
            client_id: "cid".into(),
            public_key: None,
            requested_records: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, serde_json::json!({"clientVersion": "mr0", "clientId": "cid"}));
    }

    #[test]
    fn server_error_key_id_number_or_string() {
        let numeric: ServerError = serde_json::from_str(r#"{"error":"key","key_id":2}"#).unwrap();
        let text: ServerError = serde_json::from_str(r#"{"error":"key","key_id":"2"}"#).unwrap();
        assert_eq!(numeric.key_id().as_deref(), Some("2"));
        assert_eq!(text.key_id().as_deref(), Some("2"));
    }
}
