//! In-process vault server for client tests.
//!
//! Holds the server's P-256 keys, unwraps each request's transmission key,
//! verifies the signature and answers with an envelope under the same key.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use ksm_core::{KsmError, KsmResult};
use ksm_crypto::ecc::public_key_bytes;
use ksm_crypto::envelope::{encrypt_response, verify_signature};
use ksm_crypto::transmission::unwrap_transmission_key;
use ksm_crypto::{
    decrypt_aes_gcm, encoding, encrypt_aes_gcm, generate_private_key, wrap_key, EncryptedPayload,
    ServerKeyTable, SymmetricKey,
};
use ksm_sdk::payload::{DeleteResponse, DeleteStatus, RecordBlob, SecretsResponse};
use ksm_sdk::{HttpRequest, HttpResponse, Transport};
use p256::SecretKey;
use serde_json::{json, Value};

pub const HOSTNAME: &str = "keepersecurity.com";

pub struct ServerState {
    pub server_keys: HashMap<u32, SecretKey>,
    /// Requests wrapped to any other key id get `403 {"error":"key"}`.
    pub accepted_key_id: u32,
    pub client_key: Vec<u8>,
    pub app_key: SymmetricKey,
    pub client_public_key: Option<Vec<u8>>,
    pub secrets: SecretsResponse,
    /// Returned verbatim, one per request, before any processing.
    pub scripted: VecDeque<HttpResponse>,
    /// `(op, key id)` of every request received.
    pub attempts: Vec<(String, u32)>,
    /// `(op, decrypted payload)` of every request accepted.
    pub accepted: Vec<(String, Value)>,
}

#[derive(Clone)]
pub struct FakeServer(Arc<Mutex<ServerState>>);

impl FakeServer {
    pub fn new() -> Self {
        let mut client_key = vec![0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut client_key);
        let server_keys = [2u32, 7]
            .into_iter()
            .map(|id| (id, generate_private_key()))
            .collect();
        Self(Arc::new(Mutex::new(ServerState {
            server_keys,
            accepted_key_id: 7,
            client_key,
            app_key: SymmetricKey::generate(),
            client_public_key: None,
            secrets: SecretsResponse::default(),
            scripted: VecDeque::new(),
            attempts: Vec::new(),
            accepted: Vec::new(),
        })))
    }

    pub fn state(&self) -> MutexGuard<'_, ServerState> {
        self.0.lock().unwrap()
    }

    /// Public half of every server key, as the client's key table.
    pub fn key_table(&self) -> ServerKeyTable {
        let state = self.state();
        ServerKeyTable::from_entries(
            state
                .server_keys
                .iter()
                .map(|(id, sk)| (*id, public_key_bytes(sk))),
        )
    }

    /// One-time token for this server's client key.
    pub fn token(&self) -> String {
        format!("US:{}", encoding::encode_url(&self.state().client_key))
    }

    pub fn app_key(&self) -> SymmetricKey {
        self.state().app_key.clone()
    }

    pub fn script(&self, status: u16, body: &str) {
        self.state().scripted.push_back(HttpResponse {
            status,
            body: body.as_bytes().to_vec(),
        });
    }

    pub fn accepted_ops(&self) -> Vec<String> {
        self.state().accepted.iter().map(|(op, _)| op.clone()).collect()
    }

    pub fn last_payload(&self, op: &str) -> Option<Value> {
        self.state()
            .accepted
            .iter()
            .rev()
            .find(|(o, _)| o == op)
            .map(|(_, p)| p.clone())
    }
}

fn respond(status: u16, body: Value) -> KsmResult<HttpResponse> {
    Ok(HttpResponse {
        status,
        body: body.to_string().into_bytes(),
    })
}

impl Transport for FakeServer {
    fn post(&self, request: &HttpRequest) -> KsmResult<HttpResponse> {
        let mut state = self.state();
        let op = request.url.rsplit('/').next().unwrap_or_default().to_string();
        assert!(request.url.starts_with(&format!("https://{HOSTNAME}/api/rest/sm/v1/")));
        assert_eq!(request.header("Content-Type"), Some("application/octet-stream"));

        let key_id: u32 = request.header("PublicKeyId").unwrap().parse().unwrap();
        state.attempts.push((op.clone(), key_id));

        if let Some(scripted) = state.scripted.pop_front() {
            return Ok(scripted);
        }
        if key_id != state.accepted_key_id {
            return respond(403, json!({"error": "key", "key_id": state.accepted_key_id.to_string()}));
        }

        let wrapped = encoding::decode(request.header("TransmissionKey").unwrap()).unwrap();
        let tk = unwrap_transmission_key(key_id, &wrapped, &state.server_keys[&key_id])?;
        let plaintext = decrypt_aes_gcm(tk.raw_key(), &request.body)
            .map_err(|e| KsmError::transport(Some(400), e.to_string()))?;
        let payload: Value = serde_json::from_slice(&plaintext).unwrap();

        if let Some(public_key) = payload.get("publicKey").and_then(Value::as_str) {
            state.client_public_key = Some(encoding::decode(public_key).unwrap());
        }
        let signature = request
            .header("Authorization")
            .and_then(|h| h.strip_prefix("Signature "))
            .map(|s| encoding::decode(s).unwrap())
            .unwrap();
        let signed = EncryptedPayload {
            encrypted_payload: request.body.clone(),
            signature,
        };
        match &state.client_public_key {
            Some(public_key) if verify_signature(&signed, &tk, public_key).is_ok() => {}
            _ => return respond(403, json!({"error": "access_denied", "message": "Signature is invalid"})),
        }

        state.accepted.push((op.clone(), payload.clone()));

        let body = match op.as_str() {
            "get_secret" => {
                let mut response = state.secrets.clone();
                if payload.get("publicKey").is_some() {
                    let client_key = SymmetricKey::from_slice(&state.client_key)?;
                    response.encrypted_app_key =
                        Some(encoding::encode(&wrap_key(&client_key, &state.app_key)?));
                    response.app_owner_public_key = Some("b3duZXI".into());
                }
                serde_json::to_vec(&response)?
            }
            "delete_secret" => {
                let records = payload["recordUids"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|uid| DeleteStatus {
                        record_uid: uid.as_str().unwrap().to_string(),
                        response_code: "ok".into(),
                        error_message: None,
                    })
                    .collect();
                serde_json::to_vec(&DeleteResponse { records })?
            }
            _ => Vec::new(),
        };

        if body.is_empty() {
            return Ok(HttpResponse { status: 200, body });
        }
        Ok(HttpResponse {
            status: 200,
            body: encrypt_response(&body, &tk)?,
        })
    }
}

// ── fixtures ─────────────────────────────────────────────────────────────

pub fn seal(key: &SymmetricKey, value: &Value) -> String {
    encoding::encode(&encrypt_aes_gcm(key, value.to_string().as_bytes()).unwrap())
}

pub fn open(key: &SymmetricKey, data: &str) -> Value {
    let plaintext = decrypt_aes_gcm(key, &encoding::decode(data).unwrap()).unwrap();
    serde_json::from_slice(&plaintext).unwrap()
}

pub fn wrap(wrapping: &SymmetricKey, key: &SymmetricKey) -> String {
    encoding::encode(&wrap_key(wrapping, key).unwrap())
}

pub fn login_data(title: &str, password: &str) -> Value {
    json!({
        "type": "login",
        "title": title,
        "fields": [
            {"type": "login", "value": ["admin"]},
            {"type": "password", "value": [password]}
        ],
        "custom": [
            {"type": "phone", "label": "phone", "value": [
                {"number": "555-1111"}, {"number": "555-2222"}
            ]}
        ]
    })
}

/// A record blob whose key is wrapped with `wrapping`.
pub fn record_blob(uid: &str, wrapping: &SymmetricKey, data: &Value) -> (RecordBlob, SymmetricKey) {
    let record_key = SymmetricKey::generate();
    let blob = RecordBlob {
        record_uid: uid.into(),
        record_key: Some(wrap(wrapping, &record_key)),
        data: seal(&record_key, data),
        revision: 1,
        is_editable: true,
        ..Default::default()
    };
    (blob, record_key)
}
