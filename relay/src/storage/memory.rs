//! `DashMap`-backed [`RelayStore`], grounded on the teacher's
//! `HashMapStorage` sharded-concurrency pattern but narrowed to the relay's
//! actual state shape: one write_key and one timestamp-ordered ciphertext
//! log per owner, instead of a generic record store.

use std::collections::BTreeMap;

use dashmap::DashMap;
use parking_lot::Mutex;
use riftdb_core::protocol::EncryptedMessage;
use riftdb_core::reconcile::TimestampSet;
use riftdb_core::timestamp::Timestamp;
use subtle::ConstantTimeEq;

use super::{RelayStore, WriteKeyCheck};

#[derive(Default)]
struct OwnerState {
    write_key: Option<Vec<u8>>,
    messages: BTreeMap<Timestamp, Vec<u8>>,
}

/// In-memory [`RelayStore`]. Each owner gets its own lock so reconciliation
/// traffic for one owner never blocks another's.
#[derive(Default)]
pub struct InMemoryRelayStore {
    owners: DashMap<String, Mutex<OwnerState>>,
}

impl InMemoryRelayStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RelayStore for InMemoryRelayStore {
    fn try_provision_or_validate_write_key(&self, owner_id: &str, write_key: &[u8]) -> WriteKeyCheck {
        let entry = self.owners.entry(owner_id.to_string()).or_default();
        let mut state = entry.lock();
        match &state.write_key {
            None => {
                state.write_key = Some(write_key.to_vec());
                WriteKeyCheck::Provisioned
            }
            Some(stored) => {
                if bool::from(stored.as_slice().ct_eq(write_key)) {
                    WriteKeyCheck::Valid
                } else {
                    WriteKeyCheck::Invalid
                }
            }
        }
    }

    fn timestamps(&self, owner_id: &str) -> TimestampSet {
        match self.owners.get(owner_id) {
            Some(entry) => TimestampSet::from_iter(entry.lock().messages.keys().copied()),
            None => TimestampSet::new(),
        }
    }

    fn insert(&self, owner_id: &str, messages: Vec<EncryptedMessage>) -> usize {
        let entry = self.owners.entry(owner_id.to_string()).or_default();
        let mut state = entry.lock();
        let mut inserted = 0;
        for message in messages {
            if state
                .messages
                .insert(message.timestamp, message.ciphertext)
                .is_none()
            {
                inserted += 1;
            }
        }
        inserted
    }

    fn fetch(&self, owner_id: &str, timestamps: &[Timestamp]) -> Vec<EncryptedMessage> {
        let Some(entry) = self.owners.get(owner_id) else {
            return Vec::new();
        };
        let state = entry.lock();
        timestamps
            .iter()
            .filter_map(|ts| {
                state.messages.get(ts).map(|ciphertext| EncryptedMessage {
                    timestamp: *ts,
                    ciphertext: ciphertext.clone(),
                })
            })
            .collect()
    }

    fn owner_count(&self) -> usize {
        self.owners.len()
    }
}
