//! Key hierarchy: app key ▶ folder keys ▶ record keys ▶ file keys.
//!
//! A record inside a shared folder arrives either nested under
//! `folders[].records[]` or flat in `records[]` with a `folderUid`; both
//! routes resolve to the same folder key and decrypt identically. A flat
//! record whose folder is unknown or undecryptable is retried with the app
//! key. Failures are collected per entity and never abort the batch; each
//! uid appears at most once across `records` and `bad_records`.

use std::collections::{HashMap, HashSet};

use ksm_core::{KsmError, KsmResult};
use ksm_crypto::{decrypt_aes_gcm, encoding, unwrap_key, SymmetricKey};

use crate::dto::{Folder, KeeperFile, Record, RecordData};
use crate::payload::{FileBlob, FolderBlob, RecordBlob, SecretsResponse};

/// An entity that could not be decrypted.
#[derive(Debug)]
pub struct BadEntity {
    pub uid: String,
    pub error: KsmError,
}

#[derive(Debug, Default)]
pub struct DecryptedSecrets {
    pub records: Vec<Record>,
    pub folders: Vec<Folder>,
    pub bad_records: Vec<BadEntity>,
    pub bad_folders: Vec<BadEntity>,
}

/// Unwrap a base64 wrapped key with `resolving_key`.
pub fn unwrap(wrapped: &str, resolving_key: &SymmetricKey) -> KsmResult<SymmetricKey> {
    let bytes = encoding::decode(wrapped)?;
    unwrap_key(resolving_key, &bytes)
}

fn decrypt_json<T: serde::de::DeserializeOwned>(blob: &str, key: &SymmetricKey) -> KsmResult<T> {
    let plaintext = decrypt_aes_gcm(key, &encoding::decode(blob)?)?;
    serde_json::from_slice(&plaintext)
        .map_err(|e| KsmError::Decryption(format!("decrypted data is not valid JSON: {e}")))
}

#[derive(serde::Deserialize)]
struct FolderData {
    #[serde(default)]
    name: Option<String>,
}

/// Decrypt a shared folder and the records nested in it. Nested records that
/// fail go to `bad_records`; the folder itself only fails if its key does.
pub fn decrypt_folder(
    blob: &FolderBlob,
    app_key: &SymmetricKey,
    bad_records: &mut Vec<BadEntity>,
) -> KsmResult<Folder> {
    let folder_key = unwrap(&blob.folder_key, app_key)?;

    let name = match blob.data.as_deref() {
        Some(data) => match decrypt_json::<FolderData>(data, &folder_key) {
            Ok(data) => data.name,
            Err(e) => {
                tracing::warn!(folder_uid = %blob.folder_uid, "folder name did not decrypt: {e}");
                None
            }
        },
        None => None,
    };

    let mut records = Vec::with_capacity(blob.records.len());
    for record in &blob.records {
        match decrypt_record(record, &folder_key, Some(&blob.folder_uid)) {
            Ok(r) => records.push(r),
            Err(error) => {
                tracing::warn!(record_uid = %record.record_uid, folder_uid = %blob.folder_uid, "record did not decrypt: {error}");
                bad_records.push(BadEntity {
                    uid: record.record_uid.clone(),
                    error,
                });
            }
        }
    }

    Ok(Folder::new(
        blob.folder_uid.clone(),
        blob.parent.clone(),
        name,
        records,
        folder_key,
    ))
}

/// Decrypt one record. Without a `recordKey` the resolving key is the
/// record key.
pub fn decrypt_record(
    blob: &RecordBlob,
    resolving_key: &SymmetricKey,
    folder_uid: Option<&str>,
) -> KsmResult<Record> {
    let record_key = match blob.record_key.as_deref() {
        Some(wrapped) if !wrapped.is_empty() => unwrap(wrapped, resolving_key)?,
        _ => resolving_key.clone(),
    };
    let data: RecordData = decrypt_json(&blob.data, &record_key)?;

    let mut files = Vec::with_capacity(blob.files.len());
    let mut bad_files = Vec::new();
    for file in &blob.files {
        match decrypt_file(file, &record_key) {
            Ok(f) => files.push(f),
            Err(e) => {
                tracing::warn!(record_uid = %blob.record_uid, file_uid = %file.file_uid, "file did not decrypt: {e}");
                bad_files.push(file.file_uid.clone());
            }
        }
    }

    let mut record = Record::new(
        blob.record_uid.clone(),
        folder_uid.map(str::to_string).or_else(|| blob.folder_uid.clone()),
        blob.revision,
        blob.is_editable,
        data,
        files,
        record_key,
    );
    record.bad_files = bad_files;
    Ok(record)
}

/// Decrypt file metadata. Content stays encrypted until requested.
pub fn decrypt_file(blob: &FileBlob, record_key: &SymmetricKey) -> KsmResult<KeeperFile> {
    let file_key = unwrap(&blob.file_key, record_key)?;
    let meta: crate::payload::FileMetadata = decrypt_json(&blob.data, &file_key)?;
    Ok(KeeperFile::new(
        blob.file_uid.clone(),
        meta.name,
        meta.title,
        meta.mime_type,
        meta.size,
        meta.last_modified,
        blob.url.clone(),
        file_key,
    ))
}

/// Run the whole hierarchy over a decrypted `get_secret` response.
///
/// `records` lists every decrypted record once: nested ones first, in
/// folder order, then flat ones not already seen.
pub fn decrypt_secrets(response: &SecretsResponse, app_key: &SymmetricKey) -> DecryptedSecrets {
    let mut out = DecryptedSecrets::default();
    let mut folder_keys: HashMap<String, SymmetricKey> = HashMap::new();

    for blob in &response.folders {
        match decrypt_folder(blob, app_key, &mut out.bad_records) {
            Ok(folder) => {
                folder_keys.insert(folder.uid.clone(), folder.key().clone());
                out.folders.push(folder);
            }
            Err(error) => {
                tracing::warn!(folder_uid = %blob.folder_uid, "folder did not decrypt: {error}");
                out.bad_folders.push(BadEntity {
                    uid: blob.folder_uid.clone(),
                    error,
                });
            }
        }
    }

    let mut seen: HashSet<String> = HashSet::new();
    for record in out.folders.iter().flat_map(|f| f.records.iter()) {
        if seen.insert(record.uid.clone()) {
            out.records.push(record.clone());
        }
    }
    let mut reported = HashSet::new();
    out.bad_records
        .retain(|bad| !seen.contains(&bad.uid) && reported.insert(bad.uid.clone()));

    for blob in &response.records {
        if seen.contains(&blob.record_uid) {
            continue;
        }
        let resolving_key = match blob.folder_uid.as_deref() {
            Some(uid) => folder_keys.get(uid).unwrap_or_else(|| {
                tracing::debug!(record_uid = %blob.record_uid, folder_uid = uid, "folder not available, using app key");
                app_key
            }),
            None => app_key,
        };
        match decrypt_record(blob, resolving_key, None) {
            Ok(record) => {
                // a copy reached by another key supersedes an earlier failure
                out.bad_records.retain(|bad| bad.uid != record.uid);
                seen.insert(record.uid.clone());
                out.records.push(record);
            }
            Err(_) if out.bad_records.iter().any(|bad| bad.uid == blob.record_uid) => {
                tracing::debug!(record_uid = %blob.record_uid, "record already reported as undecryptable");
            }
            Err(error) => {
                tracing::warn!(record_uid = %blob.record_uid, "record did not decrypt: {error}");
                out.bad_records.push(BadEntity {
                    uid: blob.record_uid.clone(),
                    error,
                });
            }
        }
    }

    tracing::debug!(
        records = out.records.len(),
        folders = out.folders.len(),
        bad_records = out.bad_records.len(),
        bad_folders = out.bad_folders.len(),
        "decrypted secrets response"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksm_crypto::{encrypt_aes_gcm, wrap_key};
    use serde_json::json;

    fn seal(key: &SymmetricKey, value: &serde_json::Value) -> String {
        encoding::encode(&encrypt_aes_gcm(key, value.to_string().as_bytes()).unwrap())
    }

    fn wrap(wrapping: &SymmetricKey, key: &SymmetricKey) -> String {
        encoding::encode(&wrap_key(wrapping, key).unwrap())
    }

    fn record_blob(uid: &str, wrapping: &SymmetricKey, title: &str) -> (RecordBlob, SymmetricKey) {
        let key = SymmetricKey::generate();
        let blob = RecordBlob {
            record_uid: uid.into(),
            record_key: Some(wrap(wrapping, &key)),
            data: seal(&key, &json!({"type": "login", "title": title, "fields": []})),
            revision: 3,
            is_editable: true,
            ..Default::default()
        };
        (blob, key)
    }

    #[test]
    fn missing_record_key_uses_resolving_key() {
        let share_key = SymmetricKey::generate();
        let blob = RecordBlob {
            record_uid: "single".into(),
            record_key: None,
            data: seal(&share_key, &json!({"type": "login", "title": "shared"})),
            ..Default::default()
        };
        let record = decrypt_record(&blob, &share_key, None).unwrap();
        assert_eq!(record.title(), "shared");
        assert_eq!(record.record_key(), &share_key);
    }

    #[test]
    fn bad_record_does_not_abort_batch() {
        let app_key = SymmetricKey::generate();
        let (good, _) = record_blob("good", &app_key, "Good");
        let (bad, _) = record_blob("bad", &SymmetricKey::generate(), "Bad");

        let response = SecretsResponse {
            records: vec![bad, good],
            ..Default::default()
        };
        let out = decrypt_secrets(&response, &app_key);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].uid, "good");
        assert_eq!(out.bad_records.len(), 1);
        assert_eq!(out.bad_records[0].uid, "bad");
        assert!(matches!(out.bad_records[0].error, KsmError::Decryption(_)));
    }

    #[test]
    fn corrupt_folder_goes_to_bad_folders() {
        let app_key = SymmetricKey::generate();
        let response = SecretsResponse {
            folders: vec![FolderBlob {
                folder_uid: "sf".into(),
                folder_key: encoding::encode(b"not a wrapped key"),
                ..Default::default()
            }],
            ..Default::default()
        };
        let out = decrypt_secrets(&response, &app_key);
        assert!(out.folders.is_empty());
        assert_eq!(out.bad_folders.len(), 1);
        assert_eq!(out.bad_folders[0].uid, "sf");
    }

    #[test]
    fn folder_name_and_file_metadata() {
        let app_key = SymmetricKey::generate();
        let folder_key = SymmetricKey::generate();
        let (mut record, record_key) = record_blob("r1", &folder_key, "With file");
        let file_key = SymmetricKey::generate();
        record.files.push(FileBlob {
            file_uid: "f1".into(),
            file_key: wrap(&record_key, &file_key),
            data: seal(
                &file_key,
                &json!({"name": "cert.pem", "title": "Cert", "type": "application/x-pem-file", "size": 42, "lastModified": 1700}),
            ),
            url: Some("https://files.example/f1".into()),
            thumbnail_url: None,
        });

        let response = SecretsResponse {
            folders: vec![FolderBlob {
                folder_uid: "sf".into(),
                folder_key: wrap(&app_key, &folder_key),
                parent: None,
                data: Some(seal(&folder_key, &json!({"name": "Shared"}))),
                records: vec![record],
            }],
            ..Default::default()
        };
        let out = decrypt_secrets(&response, &app_key);
        assert_eq!(out.folders[0].name.as_deref(), Some("Shared"));
        let record = &out.records[0];
        assert_eq!(record.folder_uid.as_deref(), Some("sf"));
        let file = record.file("cert.pem").unwrap();
        assert_eq!(file.size, 42);
        assert_eq!(file.mime_type, "application/x-pem-file");
        assert_eq!(file.file_key(), &file_key);
    }

    #[test]
    fn undecryptable_file_is_listed_on_record() {
        let app_key = SymmetricKey::generate();
        let (mut blob, _) = record_blob("r1", &app_key, "Broken attachment");
        let stray_key = SymmetricKey::generate();
        let file_key = SymmetricKey::generate();
        blob.files.push(FileBlob {
            file_uid: "f-bad".into(),
            file_key: wrap(&stray_key, &file_key),
            data: seal(&file_key, &json!({"name": "x.bin"})),
            ..Default::default()
        });

        let record = decrypt_record(&blob, &app_key, None).unwrap();
        assert!(record.files.is_empty());
        assert_eq!(record.bad_files, ["f-bad"]);
    }
}
