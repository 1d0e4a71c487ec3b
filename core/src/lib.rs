//! riftdb core -- the local-first, end-to-end-encrypted, eventually
//! consistent collaborative database engine.
//!
//! - **Timestamp** ([`timestamp`]): Hybrid Logical Clock, 128-bit causal
//!   timestamps with bounded drift and binary packing.
//! - **Codec** ([`codec`]): length-prefixed uvarint/bytes/fixed-width wire
//!   primitives shared by [`protocol`].
//! - **Crypto** ([`crypto`]): BIP-39 mnemonic → seed → SLIP-21 key
//!   derivation, and AEAD symmetric encryption.
//! - **Owner** ([`owner`]): the per-owner identity and crypto boundary --
//!   `SecurityContext`, `AuthProvider`, `EncryptionProvider`.
//! - **Value** ([`value`]): the CRDT scalar type and plaintext message
//!   envelope.
//! - **Fingerprint** ([`fingerprint`]): 12-byte XOR-accumulated set
//!   summaries.
//! - **Reconcile** ([`reconcile`]): range-based set reconciliation over
//!   sorted timestamp sets.
//! - **History** ([`history`]): the append-only CRDT log and its
//!   materialized last-write-wins projection.
//! - **Protocol** ([`protocol`]): the binary sync wire format.
//! - **Sync client** ([`sync_client`]): the session state machine, backoff,
//!   and outbound queue.
//! - **Worker** ([`worker`]): the single-writer database worker tying the
//!   above together.
//! - **Config** ([`config`]): tunables for all of the above.
//! - **Error** ([`error`]): the typed error taxonomy.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fingerprint;
pub mod history;
pub mod owner;
pub mod protocol;
pub mod reconcile;
pub mod sync_client;
pub mod timestamp;
pub mod value;
pub mod worker;

pub use config::{ReconcileConfig, SyncConfig, TimestampConfig};
pub use error::{CryptoError, NetworkError, ProtocolError, RiftError, SchemaError, StorageError, TimestampError};
pub use fingerprint::Fingerprint;
pub use history::{ApplyOutcome, CellKey, History};
pub use owner::{
    AuthProvider, EncryptionProvider, Owner, PartitionStrategy, SecurityContext, SingleOwnerStrategy, WriteKeyAuth,
    XChaChaProvider,
};
pub use protocol::{EncryptedMessage, SyncMessage, PROTOCOL_VERSION};
pub use reconcile::{all_skip, diff_literals, respond_to_ranges, Range, RangeKind, TimestampSet};
pub use sync_client::{backoff_delay, OutboundQueue, SessionEvent, SessionState};
pub use timestamp::{ClockSource, FixedClock, Hlc, SystemClock, Timestamp};
pub use value::{CrdtMessage, Value};
pub use worker::{MutationRequest, Worker};
