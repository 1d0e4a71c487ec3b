//! Per-owner reconciliation state storage for the relay (§4.5, §6.1).
//!
//! The relay never decrypts anything and never interprets CRDT cell values;
//! per owner it only needs three things: the `write_key` that gates writes,
//! the set of timestamps it has seen (for range-reconciliation fingerprinting
//! against an initiator), and the encrypted blob for each of those
//! timestamps so it can answer a literal range with the actual ciphertexts.
//! [`RelayStore`] is that narrow surface; [`InMemoryRelayStore`] is the
//! concurrent implementation processes run with by default.

mod memory;

pub use memory::InMemoryRelayStore;

use riftdb_core::protocol::EncryptedMessage;
use riftdb_core::reconcile::TimestampSet;
use riftdb_core::timestamp::Timestamp;

/// Result of a [`RelayStore::try_provision_or_validate_write_key`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKeyCheck {
    /// The owner had no write_key on file; `write_key` was stored and the
    /// request is authorized (§4.2 first-write provisioning).
    Provisioned,
    /// The owner already had a write_key and the supplied one matched.
    Valid,
    /// The owner already had a write_key and the supplied one did not match.
    Invalid,
}

/// Per-owner reconciliation and write-authorization state.
///
/// Implementations must never require or retain plaintext: `write_key` is
/// opaque authorization material and every stored message is already
/// ciphertext by the time it reaches this trait.
pub trait RelayStore: Send + Sync {
    /// Checks `write_key` against the owner's stored key, provisioning it on
    /// first write. See [`WriteKeyCheck`].
    fn try_provision_or_validate_write_key(&self, owner_id: &str, write_key: &[u8]) -> WriteKeyCheck;

    /// The timestamp set this relay knows for `owner_id`, used as the local
    /// side of range reconciliation. Empty for an owner the relay has never
    /// seen.
    fn timestamps(&self, owner_id: &str) -> TimestampSet;

    /// Inserts messages the relay did not already hold, returning how many
    /// were newly stored (duplicates by timestamp are silently absorbed, the
    /// same idempotence rule the core history applies).
    fn insert(&self, owner_id: &str, messages: Vec<EncryptedMessage>) -> usize;

    /// Fetches the stored ciphertexts for an explicit list of timestamps, in
    /// the order requested. Missing timestamps are skipped rather than
    /// erroring: a sync peer may ask about a timestamp concurrently deleted
    /// by retention, and the caller treats a short result as "best effort".
    fn fetch(&self, owner_id: &str, timestamps: &[Timestamp]) -> Vec<EncryptedMessage>;

    /// Number of distinct owners this relay holds any state for.
    fn owner_count(&self) -> usize;
}
