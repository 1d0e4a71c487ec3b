//! The relay's protocol rules (§4.5): stateless per-owner range
//! reconciliation, constant-time write-key validation, and first-write
//! provisioning. The relay never decrypts anything it stores or forwards.

use riftdb_core::config::ReconcileConfig;
use riftdb_core::protocol::{EncryptedMessage, SyncMessage};
use riftdb_core::reconcile::{diff_literals, respond_to_ranges, RangeKind};
use riftdb_core::timestamp::Timestamp;

use crate::storage::{RelayStore, WriteKeyCheck};

/// Dispatches one decoded [`SyncMessage`] against `store`, returning the
/// message to send back. `InitiatorSync` yields a `ResponderSync`;
/// `WriteRequest` yields a `WriteAck` or `WriteReject`. Any other message
/// shape arriving at the relay (the client-only `ResponderSync`/`WriteAck`/
/// `WriteReject`) is rejected rather than silently ignored, since a relay
/// should never receive one.
pub fn handle_message(store: &dyn RelayStore, config: &ReconcileConfig, message: SyncMessage) -> SyncMessage {
    match message {
        SyncMessage::InitiatorSync {
            owner_id,
            claimed_size: _,
            ranges,
            pushed,
        } => handle_initiator_sync(store, config, owner_id, ranges, pushed),
        SyncMessage::WriteRequest {
            owner_id,
            write_key,
            messages,
        } => handle_write_request(store, owner_id, write_key, messages),
        SyncMessage::ResponderSync { owner_id, .. }
        | SyncMessage::WriteAck { owner_id }
        | SyncMessage::WriteReject { owner_id, .. } => {
            tracing::warn!(owner_id, "relay received a client-only message shape");
            SyncMessage::WriteReject {
                owner_id,
                reason: "unexpected message for a relay".to_string(),
            }
        }
    }
}

fn handle_initiator_sync(
    store: &dyn RelayStore,
    config: &ReconcileConfig,
    owner_id: String,
    ranges: Vec<riftdb_core::reconcile::Range>,
    pushed: Vec<EncryptedMessage>,
) -> SyncMessage {
    let absorbed = store.insert(&owner_id, pushed);
    tracing::debug!(owner_id, absorbed, "absorbed initiator-pushed messages");

    let local = store.timestamps(&owner_id);
    let response_ranges = respond_to_ranges(&local, &ranges, config);

    let mut to_push: Vec<Timestamp> = Vec::new();
    let mut lower = Timestamp::ZERO;
    for range in &ranges {
        let upper = range.upper_bound;
        if let RangeKind::TimestampsLiteral(remote_items) = &range.kind {
            let local_items = local.iterate(lower, upper);
            let (_missing_locally, missing_remotely) = diff_literals(&local_items, remote_items);
            to_push.extend(missing_remotely);
        }
        lower = upper;
    }

    let pushed = store.fetch(&owner_id, &to_push);
    tracing::debug!(owner_id, pushed = pushed.len(), "pushing owner's missing messages back");

    SyncMessage::ResponderSync {
        owner_id,
        ranges: response_ranges,
        pushed,
    }
}

fn handle_write_request(
    store: &dyn RelayStore,
    owner_id: String,
    write_key: Vec<u8>,
    messages: Vec<EncryptedMessage>,
) -> SyncMessage {
    match store.try_provision_or_validate_write_key(&owner_id, &write_key) {
        WriteKeyCheck::Invalid => {
            tracing::warn!(owner_id, "write request rejected: write key mismatch");
            SyncMessage::WriteReject {
                owner_id,
                reason: "write key invalid".to_string(),
            }
        }
        WriteKeyCheck::Provisioned | WriteKeyCheck::Valid => {
            let inserted = store.insert(&owner_id, messages);
            tracing::debug!(owner_id, inserted, "write request accepted");
            SyncMessage::WriteAck { owner_id }
        }
    }
}
