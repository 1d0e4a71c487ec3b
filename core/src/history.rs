//! Append-only CRDT history log and its materialized last-write-wins view
//! (§3, §4.3).
//!
//! Every accepted [`crate::value::CrdtMessage`] is appended to the history
//! keyed by `(owner_id, table, row_id, column, timestamp)`; re-applying the
//! same message is a no-op (idempotent merge). The materialized view for a
//! `(owner_id, table, row_id, column)` key is always the history entry with
//! the greatest timestamp for that key -- last write wins, with the HLC
//! timestamp acting as tiebreaker so the result is independent of delivery
//! order.
//!
//! Every user table also carries the implicit `id`/`created_at`/
//! `updated_at`/`is_deleted` columns (§6); [`History::read_row`] synthesizes
//! them from the row's first/last write timestamps rather than storing them
//! as ordinary history entries, and user mutations may not target them
//! directly ([`RESERVED_COLUMNS`]).

use std::collections::{BTreeMap, HashMap};

use crate::error::StorageError;
use crate::reconcile::TimestampSet;
use crate::timestamp::Timestamp;
use crate::value::{CrdtMessage, Value};

/// Column names every user table carries implicitly; the schema layer
/// forbids user mutations from targeting them directly (§6).
pub const RESERVED_COLUMNS: [&str; 4] = ["id", "created_at", "updated_at", "is_deleted"];

/// Identifies a single cell: one column of one row of one table, scoped to
/// an owner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellKey {
    pub owner_id: String,
    pub table: String,
    pub row_id: String,
    pub column: String,
}

/// Identifies a row (not a cell), scoped to an owner: the granularity the
/// implicit `created_at`/`updated_at` columns are tracked at.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct RowKey {
    owner_id: String,
    table: String,
    row_id: String,
}

/// First- and last-write timestamps for a row, spanning every column ever
/// written to it (including columns later overwritten), backing the
/// implicit `created_at`/`updated_at` columns (§6).
#[derive(Debug, Clone, Copy)]
struct RowMeta {
    created_at: Timestamp,
    updated_at: Timestamp,
}

/// Outcome of applying a single message to the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The message was new and is now part of the history.
    Applied,
    /// A message with the same `(owner, table, row, column, timestamp)` key
    /// was already present; this apply was a no-op.
    DuplicateIgnored,
}

/// The append-only history log plus its materialized last-write-wins
/// projection and per-owner reconciliation index.
///
/// This in-memory structure stands in for the SQL-backed history/materialized
/// tables described in §6; a persistent backend would keep the same
/// invariants over real tables instead of these maps.
#[derive(Debug, Default)]
pub struct History {
    /// Every accepted message, keyed so duplicates are naturally absorbed.
    log: BTreeMap<(CellKey, Timestamp), Value>,
    /// The winning timestamp for each cell, i.e. the materialized view's
    /// index. Looking up `log[(key, latest[key])]` yields the current value.
    latest: HashMap<CellKey, Timestamp>,
    /// One reconciliation timestamp set per owner, kept in lockstep with
    /// `log` so sync can fingerprint an owner's history without rescanning it.
    timestamps_by_owner: HashMap<String, TimestampSet>,
    /// First/last-write timestamps per row, backing the implicit
    /// `created_at`/`updated_at` columns synthesized by [`History::read_row`].
    row_meta: HashMap<RowKey, RowMeta>,
}

impl History {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one message to the history. Idempotent: applying the same
    /// `(owner, table, row, column, timestamp)` twice only appends once.
    pub fn apply_message(&mut self, owner_id: &str, message: CrdtMessage) -> ApplyOutcome {
        let key = CellKey {
            owner_id: owner_id.to_string(),
            table: message.table,
            row_id: message.row_id,
            column: message.column,
        };
        let ts = message.timestamp;

        if self.log.contains_key(&(key.clone(), ts)) {
            // §7 propagation policy: a duplicate history insert is a
            // constraint violation that is silently absorbed, not surfaced.
            let violation = StorageError::ConstraintViolation(format!(
                "duplicate entry for {}/{}/{} at {ts:?}",
                key.table, key.row_id, key.column
            ));
            tracing::trace!(owner_id, table = %key.table, row_id = %key.row_id, column = %key.column, error = %violation, "duplicate history entry absorbed");
            return ApplyOutcome::DuplicateIgnored;
        }

        self.log.insert((key.clone(), ts), message.value);
        self.timestamps_by_owner
            .entry(owner_id.to_string())
            .or_default()
            .insert(ts);

        let replaces_current = self.latest.get(&key).map_or(true, |current| ts > *current);
        if replaces_current {
            self.latest.insert(key.clone(), ts);
        }

        let row_key = RowKey {
            owner_id: owner_id.to_string(),
            table: key.table,
            row_id: key.row_id,
        };
        self.row_meta
            .entry(row_key)
            .and_modify(|meta| {
                meta.created_at = meta.created_at.min(ts);
                meta.updated_at = meta.updated_at.max(ts);
            })
            .or_insert(RowMeta {
                created_at: ts,
                updated_at: ts,
            });

        ApplyOutcome::Applied
    }

    /// Applies a batch of messages in order, returning how many were newly
    /// applied (as opposed to absorbed duplicates).
    pub fn apply_messages<I: IntoIterator<Item = CrdtMessage>>(&mut self, owner_id: &str, messages: I) -> usize {
        messages
            .into_iter()
            .filter(|m| self.apply_message(owner_id, m.clone()) == ApplyOutcome::Applied)
            .count()
    }

    /// Reads the materialized value of one cell, if anything has ever been
    /// written to it.
    #[must_use]
    pub fn read_cell(&self, owner_id: &str, table: &str, row_id: &str, column: &str) -> Option<&Value> {
        let key = CellKey {
            owner_id: owner_id.to_string(),
            table: table.to_string(),
            row_id: row_id.to_string(),
            column: column.to_string(),
        };
        let ts = *self.latest.get(&key)?;
        self.log.get(&(key, ts))
    }

    /// Reads the materialized row: every user column ever written for
    /// `(owner, table, row)` mapped to its current winning value, plus the
    /// implicit `id`/`created_at`/`updated_at`/`is_deleted` columns every
    /// user table carries (§6). Returns an empty map if the row has never
    /// been written.
    #[must_use]
    pub fn read_row(&self, owner_id: &str, table: &str, row_id: &str) -> HashMap<String, Value> {
        let mut row: HashMap<String, Value> = self
            .latest
            .iter()
            .filter(|(key, _)| key.owner_id == owner_id && key.table == table && key.row_id == row_id)
            .filter_map(|(key, ts)| {
                self.log
                    .get(&(key.clone(), *ts))
                    .map(|value| (key.column.clone(), value.clone()))
            })
            .collect();

        if row.is_empty() {
            return row;
        }

        let row_key = RowKey {
            owner_id: owner_id.to_string(),
            table: table.to_string(),
            row_id: row_id.to_string(),
        };
        let meta = self
            .row_meta
            .get(&row_key)
            .copied()
            .expect("row_meta is updated alongside every apply_message that touches latest");

        row.insert("id".to_string(), Value::Text(row_id.to_string()));
        row.insert("created_at".to_string(), Value::Int(meta.created_at.millis as i64));
        row.insert("updated_at".to_string(), Value::Int(meta.updated_at.millis as i64));
        row.insert("is_deleted".to_string(), Value::Null);
        row
    }

    /// Returns the timestamps known for `owner_id`, used as the local side
    /// of range reconciliation (§4.4/§4.5).
    #[must_use]
    pub fn owner_timestamps(&self, owner_id: &str) -> TimestampSet {
        self.timestamps_by_owner.get(owner_id).cloned().unwrap_or_default()
    }

    /// Removes every entry belonging to `owner_id`: history rows,
    /// materialized pointers, and the reconciliation index.
    ///
    /// Used when an owner is permanently revoked and its data must not
    /// survive locally or be reconciled further.
    pub fn delete_owner(&mut self, owner_id: &str) {
        self.log.retain(|(key, _), _| key.owner_id != owner_id);
        self.latest.retain(|key, _| key.owner_id != owner_id);
        self.row_meta.retain(|key, _| key.owner_id != owner_id);
        self.timestamps_by_owner.remove(owner_id);
    }

    /// Total number of distinct `(cell, timestamp)` entries ever applied.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.len()
    }

    /// Whether the history holds no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn msg(table: &str, row: &str, column: &str, value: Value, millis: u64, node_id: u64) -> CrdtMessage {
        CrdtMessage {
            table: table.to_string(),
            row_id: row.to_string(),
            column: column.to_string(),
            value,
            timestamp: Timestamp {
                millis,
                counter: 0,
                node_id,
            },
        }
    }

    #[test]
    fn apply_then_read_returns_the_written_value() {
        let mut h = History::new();
        h.apply_message("owner-a", msg("todo", "row-1", "title", Value::Text("a".into()), 10, 1));
        assert_eq!(h.read_cell("owner-a", "todo", "row-1", "title"), Some(&Value::Text("a".into())));
    }

    #[test]
    fn later_timestamp_wins_regardless_of_application_order() {
        let mut h = History::new();
        let early = msg("todo", "row-1", "title", Value::Text("early".into()), 10, 1);
        let late = msg("todo", "row-1", "title", Value::Text("late".into()), 20, 1);

        h.apply_message("owner-a", late.clone());
        h.apply_message("owner-a", early);
        assert_eq!(h.read_cell("owner-a", "todo", "row-1", "title"), Some(&Value::Text("late".into())));

        let mut h2 = History::new();
        h2.apply_message("owner-a", msg("todo", "row-1", "title", Value::Text("early".into()), 10, 1));
        h2.apply_message("owner-a", late);
        assert_eq!(h2.read_cell("owner-a", "todo", "row-1", "title"), Some(&Value::Text("late".into())));
    }

    #[test]
    fn same_millis_breaks_tie_on_node_id_via_timestamp_ord() {
        let mut h = History::new();
        h.apply_message("owner-a", msg("todo", "row-1", "title", Value::Text("from-1".into()), 10, 1));
        h.apply_message("owner-a", msg("todo", "row-1", "title", Value::Text("from-2".into()), 10, 2));
        assert_eq!(h.read_cell("owner-a", "todo", "row-1", "title"), Some(&Value::Text("from-2".into())));
    }

    #[test]
    fn reapplying_the_same_message_is_idempotent() {
        let mut h = History::new();
        let m = msg("todo", "row-1", "title", Value::Text("a".into()), 10, 1);
        assert_eq!(h.apply_message("owner-a", m.clone()), ApplyOutcome::Applied);
        assert_eq!(h.apply_message("owner-a", m), ApplyOutcome::DuplicateIgnored);
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn read_row_assembles_every_column() {
        let mut h = History::new();
        h.apply_message("owner-a", msg("todo", "row-1", "title", Value::Text("hi".into()), 10, 1));
        h.apply_message("owner-a", msg("todo", "row-1", "done", Value::Int(0), 11, 1));
        let row = h.read_row("owner-a", "todo", "row-1");
        assert_eq!(row.get("title"), Some(&Value::Text("hi".into())));
        assert_eq!(row.get("done"), Some(&Value::Int(0)));
    }

    #[test]
    fn single_device_insert_materializes_implicit_columns() {
        // Testable property #1: a single insert at t=5ms materializes to
        // `{id, title:"a", created_at:5, updated_at:5, is_deleted:null}`.
        let mut h = History::new();
        h.apply_message("owner-a", msg("todo", "row-1", "title", Value::Text("a".into()), 5, 1));
        let row = h.read_row("owner-a", "todo", "row-1");
        assert_eq!(row.get("id"), Some(&Value::Text("row-1".into())));
        assert_eq!(row.get("title"), Some(&Value::Text("a".into())));
        assert_eq!(row.get("created_at"), Some(&Value::Int(5)));
        assert_eq!(row.get("updated_at"), Some(&Value::Int(5)));
        assert_eq!(row.get("is_deleted"), Some(&Value::Null));
    }

    #[test]
    fn created_at_tracks_earliest_write_and_updated_at_the_latest() {
        let mut h = History::new();
        h.apply_message("owner-a", msg("todo", "row-1", "title", Value::Text("a".into()), 10, 1));
        h.apply_message("owner-a", msg("todo", "row-1", "done", Value::Int(0), 3, 1));
        h.apply_message("owner-a", msg("todo", "row-1", "title", Value::Text("b".into()), 20, 1));
        let row = h.read_row("owner-a", "todo", "row-1");
        assert_eq!(row.get("created_at"), Some(&Value::Int(3)));
        assert_eq!(row.get("updated_at"), Some(&Value::Int(20)));
    }

    #[test]
    fn unwritten_row_has_no_implicit_columns() {
        let h = History::new();
        assert!(h.read_row("owner-a", "todo", "missing").is_empty());
    }

    #[test]
    fn owners_do_not_see_each_others_cells() {
        let mut h = History::new();
        h.apply_message("owner-a", msg("todo", "row-1", "title", Value::Text("a".into()), 10, 1));
        h.apply_message("owner-b", msg("todo", "row-1", "title", Value::Text("b".into()), 10, 1));
        assert_eq!(h.read_cell("owner-a", "todo", "row-1", "title"), Some(&Value::Text("a".into())));
        assert_eq!(h.read_cell("owner-b", "todo", "row-1", "title"), Some(&Value::Text("b".into())));
    }

    #[test]
    fn owner_timestamps_feed_reconciliation() {
        let mut h = History::new();
        h.apply_message("owner-a", msg("todo", "row-1", "title", Value::Text("a".into()), 10, 1));
        h.apply_message("owner-a", msg("todo", "row-2", "title", Value::Text("b".into()), 20, 1));
        assert_eq!(h.owner_timestamps("owner-a").size(), 2);
        assert_eq!(h.owner_timestamps("owner-missing").size(), 0);
    }

    #[test]
    fn delete_owner_removes_log_materialized_view_and_index() {
        let mut h = History::new();
        h.apply_message("owner-a", msg("todo", "row-1", "title", Value::Text("a".into()), 10, 1));
        h.apply_message("owner-b", msg("todo", "row-1", "title", Value::Text("b".into()), 10, 1));
        h.delete_owner("owner-a");

        assert_eq!(h.read_cell("owner-a", "todo", "row-1", "title"), None);
        assert_eq!(h.owner_timestamps("owner-a").size(), 0);
        assert_eq!(h.read_cell("owner-b", "todo", "row-1", "title"), Some(&Value::Text("b".into())));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn apply_messages_reports_only_newly_applied_count() {
        let mut h = History::new();
        let m1 = msg("todo", "row-1", "title", Value::Text("a".into()), 10, 1);
        let m2 = msg("todo", "row-1", "done", Value::Int(1), 11, 1);
        let applied = h.apply_messages("owner-a", vec![m1.clone(), m2, m1]);
        assert_eq!(applied, 2);
    }

    fn arb_msg() -> impl Strategy<Value = CrdtMessage> {
        (0u64..5, 0u64..20, 0u64..3).prop_map(|(millis, row, node_id)| {
            msg("todo", &format!("row-{row}"), "title", Value::Int(millis as i64), millis, node_id)
        })
    }

    proptest! {
        /// §8: re-applying a message a second time never changes the
        /// materialized view (idempotent merge).
        #[test]
        fn prop_reapplying_any_message_is_idempotent(messages in prop::collection::vec(arb_msg(), 0..20)) {
            let mut h = History::new();
            h.apply_messages("owner-a", messages.clone());
            let before = h.read_row("owner-a", "todo", "row-0");

            h.apply_messages("owner-a", messages);
            let after = h.read_row("owner-a", "todo", "row-0");
            prop_assert_eq!(before, after);
        }

        /// §8: the materialized view is independent of delivery order --
        /// the same set of messages applied in any order converges to the
        /// same per-row projection (CRDT determinism).
        #[test]
        fn prop_materialized_view_is_order_independent(
            messages in prop::collection::vec(arb_msg(), 0..20),
            seed in any::<u64>(),
        ) {
            let mut forward = History::new();
            forward.apply_messages("owner-a", messages.clone());

            let mut shuffled = messages;
            let len = shuffled.len();
            for i in 0..len {
                let j = ((seed.wrapping_add(i as u64)).wrapping_mul(2654435761) as usize) % len.max(1);
                shuffled.swap(i, j.min(len.saturating_sub(1)));
            }
            let mut reordered = History::new();
            reordered.apply_messages("owner-a", shuffled);

            for row in 0..20 {
                let row_id = format!("row-{row}");
                prop_assert_eq!(
                    forward.read_row("owner-a", "todo", &row_id),
                    reordered.read_row("owner-a", "todo", &row_id)
                );
            }
        }

        /// §8: two owners writing to the same table/row/column never see
        /// each other's cells.
        #[test]
        fn prop_owners_are_isolated(
            a_messages in prop::collection::vec(arb_msg(), 0..10),
            b_messages in prop::collection::vec(arb_msg(), 0..10),
        ) {
            let mut h = History::new();
            h.apply_messages("owner-a", a_messages.clone());
            h.apply_messages("owner-b", b_messages.clone());

            for row in 0..20 {
                let row_id = format!("row-{row}");
                let expected_a = {
                    let mut only_a = History::new();
                    only_a.apply_messages("owner-a", a_messages.clone());
                    only_a.read_row("owner-a", "todo", &row_id)
                };
                prop_assert_eq!(h.read_row("owner-a", "todo", &row_id), expected_a);
            }
        }
    }
}
