//! ksm-sdk: the client side of the secrets vault protocol
//!
//! ```text
//! ProtocolClient ── payload ──▶ Transport (caller supplied)
//!       │                            │
//!       │◀──── envelope response ────┘
//!       ▼
//! decrypt (app ▶ folder ▶ record ▶ file keys) ──▶ Record / Folder / KeeperFile
//!       ▼
//! notation (`keeper://uid/field/password`)
//! ```
//!
//! Records are immutable values. Changes go through [`RecordEdit`] and are
//! rendered to plaintext JSON only when committed for `save`.

pub mod client;
pub mod decrypt;
pub mod dto;
pub mod edit;
pub mod field_types;
pub mod notation;
pub mod payload;
pub mod token;
pub mod transport;

pub use client::{BindingState, FetchResult, ProtocolClient};
pub use decrypt::{BadEntity, DecryptedSecrets};
pub use dto::{Field, Folder, KeeperFile, Record, RecordData};
pub use edit::RecordEdit;
pub use notation::{Notation, NotationValue};
pub use token::{OneTimeToken, Region};
pub use transport::{HttpRequest, HttpResponse, Transport};

/// Reported to the server as `clientVersion`.
pub const CLIENT_VERSION: &str = concat!("mr", env!("CARGO_PKG_VERSION"));
