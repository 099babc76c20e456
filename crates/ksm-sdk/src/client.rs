//! Protocol client
//!
//! Lifecycle of an identity:
//!
//! ```text
//! Unbound (clientKey only) ──first get_secret──▶ Bound (clientId, privateKey, appKey)
//! ```
//!
//! Binding derives `clientId` from the one-time client key, creates the
//! ECDSA identity key, sends the public half with the first request and
//! stores the returned app key. The client key is deleted once the app
//! key is stored.
//!
//! Every request uses a fresh transmission key. A `403 {"error":"key"}`
//! response names the server key id to use instead: it is persisted and
//! the call is retried exactly once.

use ksm_core::config::ClientSettings;
use ksm_core::{ConfigKey, ConfigMap, KsmError, KsmResult};
use ksm_crypto::ecc::{private_key_from_der, private_key_to_der, public_key_bytes};
use ksm_crypto::transmission::DEFAULT_KEY_ID;
use ksm_crypto::{
    decrypt_response, derive_client_id, encoding, encrypt_aes_gcm, encrypt_and_sign,
    generate_private_key, generate_transmission_key, unwrap_key, wrap_key, ServerKeyTable,
    SymmetricKey,
};
use ksm_storage::ConfigStore;
use p256::SecretKey;
use rand::RngCore;
use serde::Serialize;
use zeroize::Zeroizing;

use crate::decrypt::{decrypt_secrets, BadEntity};
use crate::dto::{Folder, Record, RecordData};
use crate::edit::RecordEdit;
use crate::notation::{Notation, NotationValue};
use crate::payload::{
    CreatePayload, DeletePayload, DeleteResponse, DeleteStatus, GetPayload, SecretsResponse,
    ServerError, UpdatePayload,
};
use crate::token::OneTimeToken;
use crate::transport::{
    HttpRequest, HttpResponse, Operation, Transport, CONTENT_TYPE_ENVELOPE, HEADER_AUTHORIZATION,
    HEADER_CONTENT_TYPE, HEADER_PUBLIC_KEY_ID, HEADER_TRANSMISSION_KEY,
};
use crate::CLIENT_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    /// Only a one-time client key is stored.
    Unbound,
    /// Bound with a client key: app key stored, all operations allowed.
    Bound,
    /// Bound with a device token (`bat` + `bindingKey`): read-only.
    DeviceToken,
}

#[derive(Debug, Default)]
pub struct FetchResult {
    pub records: Vec<Record>,
    pub folders: Vec<Folder>,
    pub bad_records: Vec<BadEntity>,
    pub bad_folders: Vec<BadEntity>,
    /// This call completed binding.
    pub just_bound: bool,
    pub expires_on: Option<i64>,
    pub warnings: Vec<String>,
}

/// Material needed to sign and decrypt one call.
struct Identity {
    hostname: String,
    client_id: String,
    private_key: SecretKey,
    app_key: Option<SymmetricKey>,
    client_key: Option<Zeroizing<Vec<u8>>>,
    state: BindingState,
}

pub struct ProtocolClient {
    store: Box<dyn ConfigStore>,
    transport: Box<dyn Transport>,
    server_keys: ServerKeyTable,
}

impl ProtocolClient {
    /// Client over an existing identity store, using the built-in server
    /// key table.
    pub fn new(store: Box<dyn ConfigStore>, transport: Box<dyn Transport>) -> KsmResult<Self> {
        Ok(Self {
            store,
            transport,
            server_keys: ServerKeyTable::builtin()?,
        })
    }

    /// Seed an unbound identity from a one-time token. Ignored (with a log
    /// line) if the store already holds a bound identity.
    pub fn with_token(
        mut store: Box<dyn ConfigStore>,
        transport: Box<dyn Transport>,
        token: &str,
        hostname: Option<&str>,
    ) -> KsmResult<Self> {
        let token = OneTimeToken::parse(token)?;
        if store.contains(ConfigKey::AppKey)? {
            tracing::info!("identity already bound, ignoring one-time token");
        } else {
            let hostname = hostname.or(token.hostname()).ok_or_else(|| {
                KsmError::Configuration("one-time token has no region and no hostname was given".into())
            })?;
            store.set(ConfigKey::Hostname, hostname)?;
            store.set(ConfigKey::ClientKey, token.client_key())?;
            tracing::debug!(hostname, "stored one-time token");
        }
        Self::new(store, transport)
    }

    /// Open the store described by `settings` and fill in the hostname and
    /// server key id it configures, unless the identity already has them.
    pub fn from_settings(settings: &ClientSettings, transport: Box<dyn Transport>) -> KsmResult<Self> {
        let mut store = ksm_storage::open_store(settings)?;
        if let Some(hostname) = &settings.client.hostname {
            if !store.contains(ConfigKey::Hostname)? {
                store.set(ConfigKey::Hostname, hostname)?;
            }
        }
        if !store.contains(ConfigKey::ServerPublicKeyId)? {
            store.set(ConfigKey::ServerPublicKeyId, &settings.client.server_public_key_id)?;
        }
        Self::new(store, transport)
    }

    /// Replace the server public key table (private deployments, tests).
    pub fn with_server_keys(mut self, server_keys: ServerKeyTable) -> Self {
        self.server_keys = server_keys;
        self
    }

    pub fn store(&self) -> &dyn ConfigStore {
        self.store.as_ref()
    }

    pub fn state(&self) -> KsmResult<BindingState> {
        Ok(binding_state(&self.store.read_storage()?))
    }

    /// Fetch and decrypt everything shared with this client, or only the
    /// records in `uids`. Completes binding if the identity is unbound.
    pub fn fetch(&mut self, uids: Option<&[&str]>) -> KsmResult<FetchResult> {
        let identity = self.identity()?;
        let binding = identity.state == BindingState::Unbound;

        let payload = GetPayload {
            client_version: CLIENT_VERSION.to_string(),
            client_id: identity.client_id.clone(),
            public_key: binding.then(|| encoding::encode(&public_key_bytes(&identity.private_key))),
            requested_records: uids.map(|u| u.iter().map(|s| s.to_string()).collect()),
        };
        let body = self.post(Operation::GetSecret, &payload, &identity)?;
        let response: SecretsResponse = serde_json::from_slice(&body)
            .map_err(|e| KsmError::transport(None, format!("get_secret response is not valid JSON: {e}")))?;

        let app_key = match &identity.app_key {
            Some(key) => key.clone(),
            None => self.complete_binding(&identity, &response)?,
        };

        let secrets = decrypt_secrets(&response, &app_key);
        Ok(FetchResult {
            records: secrets.records,
            folders: secrets.folders,
            bad_records: secrets.bad_records,
            bad_folders: secrets.bad_folders,
            just_bound: binding,
            expires_on: response.expires_on,
            warnings: response.warnings,
        })
    }

    /// Apply `edit` to `record` and send it back, encrypted with the
    /// record's existing key.
    pub fn save(&mut self, record: &Record, edit: &RecordEdit) -> KsmResult<()> {
        let identity = self.writable_identity("save")?;
        let data = edit.commit(record)?;

        let payload = UpdatePayload {
            client_version: CLIENT_VERSION.to_string(),
            client_id: identity.client_id.clone(),
            record_uid: record.uid.clone(),
            data: seal(record.record_key(), &data)?,
            revision: record.revision,
        };
        self.post(Operation::UpdateSecret, &payload, &identity)?;
        tracing::info!(record_uid = %record.uid, "record saved");
        Ok(())
    }

    /// Create a record in a shared folder. Returns the new record uid.
    pub fn create(&mut self, folder: &Folder, data: &RecordData) -> KsmResult<String> {
        let identity = self.writable_identity("create")?;
        let app_key = identity
            .app_key
            .as_ref()
            .ok_or_else(|| KsmError::BindingRequired("no app key".into()))?;

        for field in data.fields.iter().chain(data.custom.iter()) {
            crate::field_types::current().validate(&field.field_type, &field.value)?;
        }

        let record_key = SymmetricKey::generate();
        let mut uid_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut uid_bytes);
        let record_uid = encoding::encode_url(&uid_bytes);

        let payload = CreatePayload {
            client_version: CLIENT_VERSION.to_string(),
            client_id: identity.client_id.clone(),
            record_uid: record_uid.clone(),
            record_key: encoding::encode(&wrap_key(app_key, &record_key)?),
            folder_uid: folder.uid.clone(),
            folder_key: encoding::encode(&wrap_key(folder.key(), &record_key)?),
            data: seal(&record_key, data)?,
        };
        self.post(Operation::CreateSecret, &payload, &identity)?;
        tracing::info!(record_uid = %record_uid, folder_uid = %folder.uid, "record created");
        Ok(record_uid)
    }

    /// Delete records. Returns the server's per-record status.
    pub fn delete(&mut self, uids: &[&str]) -> KsmResult<Vec<DeleteStatus>> {
        let identity = self.writable_identity("delete")?;
        let payload = DeletePayload {
            client_version: CLIENT_VERSION.to_string(),
            client_id: identity.client_id.clone(),
            record_uids: uids.iter().map(|s| s.to_string()).collect(),
        };
        let body = self.post(Operation::DeleteSecret, &payload, &identity)?;
        if body.is_empty() {
            return Ok(Vec::new());
        }
        let response: DeleteResponse = serde_json::from_slice(&body)
            .map_err(|e| KsmError::transport(None, format!("delete_secret response is not valid JSON: {e}")))?;
        Ok(response.records)
    }

    /// Fetch and resolve one `keeper://` locator.
    pub fn get_notation(&mut self, locator: &str) -> KsmResult<NotationValue> {
        let notation = Notation::parse(locator)?;
        let result = self.fetch(None)?;
        notation.resolve(&result.records)
    }

    // ── identity ─────────────────────────────────────────────────────────

    /// Load the identity, deriving `clientId` and creating the private key
    /// on first use.
    fn identity(&mut self) -> KsmResult<Identity> {
        let config = self.store.read_storage()?;
        let state = binding_state(&config);
        if state == BindingState::Bound && config.contains_key(&ConfigKey::ClientKey) {
            // binding was interrupted after the app key was stored
            self.store.delete(ConfigKey::ClientKey)?;
            tracing::info!("erased one-time client key left over from binding");
        }

        let hostname = config
            .get(&ConfigKey::Hostname)
            .cloned()
            .ok_or_else(|| KsmError::Configuration("no hostname configured".into()))?;

        let client_key = match config.get(&ConfigKey::ClientKey) {
            Some(key) if state == BindingState::Unbound => Some(Zeroizing::new(
                encoding::decode(key)
                    .map_err(|_| KsmError::Configuration("clientKey is not base64".into()))?,
            )),
            _ => None,
        };

        let client_id = match (config.get(&ConfigKey::ClientId), &client_key) {
            (Some(id), _) => id.clone(),
            (None, Some(key)) => {
                let id = derive_client_id(key)?;
                self.store.set(ConfigKey::ClientId, &id)?;
                id
            }
            (None, None) => {
                return Err(KsmError::Configuration(
                    "no clientId and no one-time client key; initialize with a token".into(),
                ))
            }
        };

        let private_key = match config.get(&ConfigKey::PrivateKey) {
            Some(der) => private_key_from_der(&encoding::decode(der).map_err(|_| {
                KsmError::Configuration("privateKey is not base64".into())
            })?)?,
            None if state == BindingState::Unbound => {
                let key = generate_private_key();
                self.store
                    .set(ConfigKey::PrivateKey, &encoding::encode(&private_key_to_der(&key)?))?;
                tracing::debug!("generated client identity key");
                key
            }
            None => return Err(KsmError::Configuration("no privateKey configured".into())),
        };

        let app_key = match state {
            BindingState::Bound => Some(config_key(&config, ConfigKey::AppKey)?),
            BindingState::DeviceToken => Some(config_key(&config, ConfigKey::BindingKey)?),
            BindingState::Unbound => None,
        };

        Ok(Identity {
            hostname,
            client_id,
            private_key,
            app_key,
            client_key,
            state,
        })
    }

    fn writable_identity(&mut self, op: &str) -> KsmResult<Identity> {
        let identity = self.identity()?;
        match identity.state {
            BindingState::Bound => Ok(identity),
            BindingState::DeviceToken => Err(KsmError::BindingRequired(format!(
                "{op} needs an identity bound with a one-time client key, not a device token"
            ))),
            BindingState::Unbound => Err(KsmError::BindingRequired(format!(
                "{op} needs a bound identity; fetch once to complete binding"
            ))),
        }
    }

    fn complete_binding(
        &mut self,
        identity: &Identity,
        response: &SecretsResponse,
    ) -> KsmResult<SymmetricKey> {
        let encrypted = response.encrypted_app_key.as_deref().ok_or_else(|| {
            KsmError::Configuration("server did not return an app key for binding".into())
        })?;
        let client_key = identity
            .client_key
            .as_ref()
            .ok_or_else(|| KsmError::Configuration("binding needs the one-time client key".into()))?;

        let app_key = unwrap_key(&SymmetricKey::from_slice(client_key)?, &encoding::decode(encrypted)?)
            .map_err(|e| KsmError::Configuration(format!("app key did not decrypt with the client key: {e}")))?;

        self.store
            .set(ConfigKey::AppKey, &encoding::encode(app_key.as_bytes()))?;
        if let Some(owner) = &response.app_owner_public_key {
            self.store.set(ConfigKey::AppOwnerPublicKey, owner)?;
        }
        self.store.delete(ConfigKey::ClientKey)?;
        tracing::info!(client_id = %identity.client_id, "binding complete");
        Ok(app_key)
    }

    // ── requests ─────────────────────────────────────────────────────────

    /// Send one operation, retrying once if the server rotates its key.
    fn post<P: Serialize>(&mut self, op: Operation, payload: &P, identity: &Identity) -> KsmResult<Vec<u8>> {
        let json = Zeroizing::new(serde_json::to_vec(payload)?);
        match self.post_once(op, &json, identity) {
            Err(KsmError::KeyRotation { key_id }) => {
                tracing::info!(op = op.path(), key_id = %key_id, "server rotated public key, retrying");
                self.store.set(ConfigKey::ServerPublicKeyId, &key_id)?;
                match self.post_once(op, &json, identity) {
                    Err(KsmError::KeyRotation { key_id }) => Err(KsmError::AccessDenied(format!(
                        "server rejected the rotated public key (asked for key id {key_id})"
                    ))),
                    other => other,
                }
            }
            other => other,
        }
    }

    fn post_once(&self, op: Operation, json: &[u8], identity: &Identity) -> KsmResult<Vec<u8>> {
        let key_id = self.server_key_id()?;
        let transmission_key = generate_transmission_key(&self.server_keys, key_id)?;
        let envelope = encrypt_and_sign(json, &transmission_key, &identity.private_key)?;

        let request = HttpRequest {
            url: op.url(&identity.hostname),
            headers: vec![
                (HEADER_CONTENT_TYPE.into(), CONTENT_TYPE_ENVELOPE.into()),
                (HEADER_PUBLIC_KEY_ID.into(), key_id.to_string()),
                (
                    HEADER_TRANSMISSION_KEY.into(),
                    encoding::encode_url(transmission_key.wrapped_key()),
                ),
                (
                    HEADER_AUTHORIZATION.into(),
                    format!("Signature {}", encoding::encode_url(&envelope.signature)),
                ),
            ],
            body: envelope.encrypted_payload,
        };

        tracing::debug!(op = op.path(), key_id, "sending request");
        let response = self.transport.post(&request)?;
        if !response.is_success() {
            return Err(map_error_response(&response));
        }
        if response.body.is_empty() {
            return Ok(Vec::new());
        }
        decrypt_response(&response.body, &transmission_key)
    }

    fn server_key_id(&self) -> KsmResult<u32> {
        match self.store.get(ConfigKey::ServerPublicKeyId)? {
            Some(id) => id.trim().parse().map_err(|_| {
                KsmError::Configuration(format!("serverPublicKeyId is not a number: {id}"))
            }),
            None => Ok(DEFAULT_KEY_ID),
        }
    }
}

fn binding_state(config: &ConfigMap) -> BindingState {
    if config.contains_key(&ConfigKey::AppKey) {
        BindingState::Bound
    } else if config.contains_key(&ConfigKey::BindingToken) && config.contains_key(&ConfigKey::BindingKey) {
        BindingState::DeviceToken
    } else {
        BindingState::Unbound
    }
}

fn config_key(config: &ConfigMap, key: ConfigKey) -> KsmResult<SymmetricKey> {
    let value = config
        .get(&key)
        .ok_or_else(|| KsmError::Configuration(format!("{key} is not configured")))?;
    let bytes = Zeroizing::new(
        encoding::decode(value).map_err(|_| KsmError::Configuration(format!("{key} is not base64")))?,
    );
    SymmetricKey::from_slice(&bytes).map_err(|_| KsmError::Configuration(format!("{key} is not a 256-bit key")))
}

fn seal(key: &SymmetricKey, data: &RecordData) -> KsmResult<String> {
    let plaintext = Zeroizing::new(serde_json::to_vec(data)?);
    Ok(encoding::encode(&encrypt_aes_gcm(key, &plaintext)?))
}

/// Map a non-2xx response to an error. Error bodies are plaintext JSON.
fn map_error_response(response: &HttpResponse) -> KsmError {
    let body = String::from_utf8_lossy(&response.body).into_owned();
    match response.status {
        403 => {
            let parsed: ServerError = serde_json::from_str(&body).unwrap_or_default();
            let message = parsed.message.clone().unwrap_or_else(|| body.clone());
            match parsed.error.as_deref() {
                Some("key") => match parsed.key_id() {
                    Some(key_id) => KsmError::KeyRotation { key_id },
                    None => KsmError::AccessDenied(format!("key rotation without key_id: {body}")),
                },
                Some("throttled") => KsmError::Throttled(message),
                _ => KsmError::AccessDenied(message),
            }
        }
        status => KsmError::transport(Some(status), body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn error_mapping() {
        assert!(matches!(
            map_error_response(&response(403, r#"{"error":"key","key_id":3}"#)),
            KsmError::KeyRotation { key_id } if key_id == "3"
        ));
        assert!(matches!(
            map_error_response(&response(403, r#"{"error":"throttled","message":"slow down"}"#)),
            KsmError::Throttled(m) if m == "slow down"
        ));
        assert!(matches!(
            map_error_response(&response(403, r#"{"error":"access_denied","message":"Signature is invalid"}"#)),
            KsmError::AccessDenied(m) if m == "Signature is invalid"
        ));
        assert!(matches!(
            map_error_response(&response(400, "bad payload")),
            KsmError::Transport { status: Some(400), message } if message == "bad payload"
        ));
        assert!(matches!(
            map_error_response(&response(502, "")),
            KsmError::Transport { status: Some(502), .. }
        ));
    }

    #[test]
    fn state_from_config() {
        let mut config = ConfigMap::new();
        config.insert(ConfigKey::ClientKey, "k".into());
        assert_eq!(binding_state(&config), BindingState::Unbound);

        config.insert(ConfigKey::BindingToken, "bat".into());
        config.insert(ConfigKey::BindingKey, "bk".into());
        assert_eq!(binding_state(&config), BindingState::DeviceToken);

        config.insert(ConfigKey::AppKey, "ak".into());
        assert_eq!(binding_state(&config), BindingState::Bound);
    }
}
