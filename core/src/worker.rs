//! The database worker: sole owner of local history, producer of CRDT
//! messages, and the subscribe/callback surface for sync state, owner
//! changes, and queries (§4.7).
//!
//! All local mutations pass through [`Worker::stage`] and are coalesced
//! into one committed batch by [`Worker::flush`] -- the "microtask-batched
//! transaction" pattern of §9 Design Notes, implemented here as an explicit
//! "collect on current turn, flush on next yield" call rather than tied to
//! any host's actual microtask queue. A batch either commits in full or
//! (on a timestamp/encryption failure) commits nothing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::TimestampConfig;
use crate::error::{RiftError, SchemaError};
use crate::history::{History, RESERVED_COLUMNS};
use crate::owner::EncryptionProvider;
use crate::protocol::EncryptedMessage;
use crate::sync_client::{OutboundQueue, SessionState};
use crate::timestamp::{ClockSource, Hlc, Timestamp};
use crate::value::{CrdtMessage, Value};

/// One column write requested by a host mutation, before a timestamp has
/// been assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub table: String,
    pub row_id: String,
    pub column: String,
    pub value: Value,
}

/// The plaintext payload that gets encrypted; the timestamp itself travels
/// alongside the ciphertext in cleartext (§3 `EncryptedCrdtMessage`).
#[derive(Debug, Serialize, Deserialize)]
struct CellPayload {
    table: String,
    row_id: String,
    column: String,
    value: Value,
}

type SyncStateCallback = Box<dyn Fn(&SessionState) + Send + Sync>;
type OwnerCallback = Box<dyn Fn(&str) + Send + Sync>;
type QueryCallback = Box<dyn Fn(&str, &str) + Send + Sync>;

/// Owns one owner's history, clock, and outbound sync queue, and exposes
/// the subscribe/callback surface the query layer and sync client attach to.
pub struct Worker {
    owner_id: String,
    hlc: Hlc,
    encryption: Box<dyn EncryptionProvider + Send + Sync>,
    history: History,
    outbound: OutboundQueue,
    pending: Vec<MutationRequest>,
    sync_state_subs: Vec<SyncStateCallback>,
    owner_subs: Vec<OwnerCallback>,
    query_subs: Vec<QueryCallback>,
}

impl Worker {
    /// Creates a worker for `owner_id`/`node_id`, backed by `clock` for HLC
    /// generation and `encryption` for payload encryption.
    #[must_use]
    pub fn new(
        owner_id: String,
        node_id: u64,
        clock: Box<dyn ClockSource>,
        timestamp_config: TimestampConfig,
        encryption: Box<dyn EncryptionProvider + Send + Sync>,
        outbound_high_water_mark: usize,
    ) -> Self {
        Self {
            owner_id,
            hlc: Hlc::new(node_id, clock, timestamp_config),
            encryption,
            history: History::new(),
            outbound: OutboundQueue::new(outbound_high_water_mark),
            pending: Vec::new(),
            sync_state_subs: Vec::new(),
            owner_subs: Vec::new(),
            query_subs: Vec::new(),
        }
    }

    /// Stages a mutation for the current turn; nothing is visible in
    /// `read_row` until [`Worker::flush`] commits it.
    pub fn stage(&mut self, mutation: MutationRequest) {
        self.pending.push(mutation);
    }

    /// Number of mutations staged for the next flush.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Commits every staged mutation as one transaction: assigns each a
    /// fresh HLC timestamp, applies it to history, encrypts it for sync,
    /// and enqueues it on the outbound queue. If any mutation fails schema
    /// validation, timestamping, or encryption, nothing in the batch is
    /// applied (§4.7: "validation failures for any mutation in the batch
    /// fail the entire batch").
    ///
    /// Returns the plaintext [`CrdtMessage`]s committed, in mutation order,
    /// so callers (e.g. query re-evaluation) can inspect what changed.
    pub fn flush(&mut self) -> Result<Vec<CrdtMessage>, RiftError> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }

        // Schema validation up front: a mutation targeting a reserved
        // implicit column fails the whole batch before anything commits.
        for mutation in &self.pending {
            if RESERVED_COLUMNS.contains(&mutation.column.as_str()) {
                return Err(SchemaError::ReservedColumn(mutation.column.clone()).into());
            }
        }

        // Phase 1: assign timestamps and encrypt, failing the whole batch
        // before anything is applied to history.
        let mut prepared = Vec::with_capacity(self.pending.len());
        for mutation in self.pending.drain(..) {
            let timestamp = self.hlc.send()?;
            let payload = CellPayload {
                table: mutation.table.clone(),
                row_id: mutation.row_id.clone(),
                column: mutation.column.clone(),
                value: mutation.value.clone(),
            };
            let plaintext = rmp_serde::to_vec(&payload).expect("CellPayload always serializes");
            let ciphertext = self.encryption.encrypt(&plaintext)?;
            let message = CrdtMessage {
                table: mutation.table,
                row_id: mutation.row_id,
                column: mutation.column,
                value: mutation.value,
                timestamp,
            };
            prepared.push((message, ciphertext));
        }

        // Phase 2: commit. Apply is infallible (idempotent upsert) so once
        // we reach here the batch always succeeds as a whole.
        let mut committed = Vec::with_capacity(prepared.len());
        for (message, ciphertext) in prepared {
            self.history.apply_message(&self.owner_id, message.clone());
            if self
                .outbound
                .push(EncryptedMessage {
                    timestamp: message.timestamp,
                    ciphertext,
                })
                .is_err()
            {
                tracing::warn!(
                    owner_id = %self.owner_id,
                    table = %message.table,
                    row_id = %message.row_id,
                    "outbound queue at high-water mark; message committed locally but not queued for sync"
                );
            }
            committed.push(message);
        }

        tracing::debug!(owner_id = %self.owner_id, count = committed.len(), "flushed mutation batch");

        for callback in &self.query_subs {
            for message in &committed {
                callback(&message.table, &message.row_id);
            }
        }

        Ok(committed)
    }

    /// Projects the current materialized row, per [`History::read_row`].
    #[must_use]
    pub fn read_row(&self, table: &str, row_id: &str) -> HashMap<String, Value> {
        self.history.read_row(&self.owner_id, table, row_id)
    }

    /// Drains the outbound queue, e.g. to attach to the next sync round.
    pub fn drain_outbound(&mut self) -> Vec<EncryptedMessage> {
        self.outbound.drain()
    }

    /// The owner this worker serves.
    #[must_use]
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// The current HLC timestamp, without advancing it.
    #[must_use]
    pub fn current_timestamp(&self) -> Timestamp {
        self.hlc.current()
    }

    /// Applies an incoming remote message to history, merging its
    /// timestamp into the local clock first (§4.7 receive path).
    pub fn apply_remote(&mut self, message: CrdtMessage) -> Result<(), RiftError> {
        self.hlc.receive(message.timestamp)?;
        let outcome = self.history.apply_message(&self.owner_id, message.clone());
        tracing::trace!(owner_id = %self.owner_id, ?outcome, "applied remote message");
        for callback in &self.owner_subs {
            callback(&self.owner_id);
        }
        Ok(())
    }

    /// Registers a callback invoked whenever the sync session's state
    /// changes. Never call back into the worker from inside `f`.
    pub fn subscribe_sync_state(&mut self, f: SyncStateCallback) {
        self.sync_state_subs.push(f);
    }

    /// Registers a callback invoked whenever this owner's data changes via
    /// a remote apply. Never call back into the worker from inside `f`.
    pub fn subscribe_owner(&mut self, f: OwnerCallback) {
        self.owner_subs.push(f);
    }

    /// Registers a callback invoked with `(table, row_id)` for every row a
    /// commit touched, so the query layer can recompute affected queries.
    /// Never call back into the worker from inside `f`.
    pub fn subscribe_queries(&mut self, f: QueryCallback) {
        self.query_subs.push(f);
    }

    /// Notifies sync-state subscribers of a session transition. Called by
    /// the host loop driving the sync client, not by the worker itself.
    pub fn notify_sync_state(&self, state: &SessionState) {
        for callback in &self.sync_state_subs {
            callback(state);
        }
    }
}
