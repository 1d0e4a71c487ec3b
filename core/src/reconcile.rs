//! Range-based set reconciliation (§4.4).
//!
//! Given two sorted sets of timestamps, the reconciler exchanges only their
//! symmetric difference by recursively comparing fingerprints of
//! successively narrower ranges. [`TimestampSet`] holds one side's local
//! primitives (`size`, `fingerprint`, `find_lower_bound`, `iterate`);
//! [`respond_to_ranges`] implements one round of the protocol described in
//! §4.4: given a sequence of incoming [`Range`]s (partitioning
//! `(−∞, +∞)` by successive upper bounds), it produces the matching
//! sequence of response ranges.

use std::collections::BTreeSet;

use crate::config::ReconcileConfig;
use crate::fingerprint::Fingerprint;
use crate::timestamp::Timestamp;

/// How a [`Range`] resolves a portion of the reconciliation space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeKind {
    /// Both sides already agree on this range; nothing to exchange.
    Skip,
    /// Summarizes this range's contents; the receiver compares it against
    /// its own fingerprint for the same bounds.
    Fingerprint(Fingerprint),
    /// Spells out every timestamp in this (necessarily small) range.
    TimestampsLiteral(Vec<Timestamp>),
}

/// One partition of the `(−∞, +∞)` reconciliation space, bounded above by
/// `upper_bound` and below by the previous range's `upper_bound` (or
/// [`Timestamp::ZERO`] for the first range in a sequence).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    /// Inclusive upper bound of this range.
    pub upper_bound: Timestamp,
    /// What this range carries: a match shortcut, a summary, or a listing.
    pub kind: RangeKind,
}

/// A local, in-memory sorted set of timestamps with the primitives §4.4
/// requires: size, ranged fingerprint, ranged iteration, and a split-point
/// finder used to subdivide a mismatching range.
#[derive(Debug, Clone, Default)]
pub struct TimestampSet {
    items: BTreeSet<Timestamp>,
}

impl TimestampSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: BTreeSet::new(),
        }
    }

    /// Builds a set from an iterator of timestamps.
    pub fn from_iter<I: IntoIterator<Item = Timestamp>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }

    /// Inserts a timestamp, returning `true` if it was newly inserted.
    pub fn insert(&mut self, ts: Timestamp) -> bool {
        self.items.insert(ts)
    }

    /// Returns whether `ts` is a member of this set.
    #[must_use]
    pub fn contains(&self, ts: &Timestamp) -> bool {
        self.items.contains(ts)
    }

    /// Total number of elements.
    #[must_use]
    pub fn size(&self) -> usize {
        self.items.len()
    }

    /// Timestamps in `(lower, upper]`, in ascending order.
    #[must_use]
    pub fn iterate(&self, lower: Timestamp, upper: Timestamp) -> Vec<Timestamp> {
        self.items
            .range((
                std::ops::Bound::Excluded(lower),
                std::ops::Bound::Included(upper),
            ))
            .copied()
            .collect()
    }

    /// Number of timestamps in `(lower, upper]`.
    #[must_use]
    pub fn count_in(&self, lower: Timestamp, upper: Timestamp) -> usize {
        self.iterate(lower, upper).len()
    }

    /// XOR-accumulated fingerprint of the timestamps in `(lower, upper]`.
    #[must_use]
    pub fn fingerprint(&self, lower: Timestamp, upper: Timestamp) -> Fingerprint {
        Fingerprint::of(self.iterate(lower, upper))
    }

    /// Picks a split point `m` such that `(lower, m]` contains roughly
    /// `target_count` local timestamps drawn from `(lower, upper]`, biased
    /// to the low end (the `target_count`-th smallest element, or `upper`
    /// if the range holds fewer than `target_count` elements).
    #[must_use]
    pub fn find_lower_bound(&self, lower: Timestamp, upper: Timestamp, target_count: usize) -> Timestamp {
        if target_count == 0 {
            return lower;
        }
        let items = self.iterate(lower, upper);
        if items.len() <= target_count {
            return upper;
        }
        items[target_count - 1]
    }

    /// Computes `k - 1` interior boundaries splitting `(lower, upper]` into
    /// up to `k` roughly equal-sized sub-ranges, followed by `upper` itself
    /// so the caller always has a complete partition.
    #[must_use]
    pub fn split_boundaries(&self, lower: Timestamp, upper: Timestamp, k: usize) -> Vec<Timestamp> {
        let total = self.count_in(lower, upper);
        if k <= 1 || total == 0 {
            return vec![upper];
        }
        let chunk = total.div_ceil(k);
        let mut boundaries = Vec::with_capacity(k);
        let mut current_lower = lower;
        loop {
            let boundary = self.find_lower_bound(current_lower, upper, chunk);
            boundaries.push(boundary);
            if boundary == upper {
                break;
            }
            current_lower = boundary;
        }
        boundaries
    }

    /// The top-level range covering the entire reconciliation space, per
    /// §4.4's "global range is `(ZERO_TIMESTAMP, +∞)`".
    #[must_use]
    pub fn initial_ranges(&self) -> Vec<Range> {
        vec![Range {
            upper_bound: Timestamp::MAX,
            kind: RangeKind::Fingerprint(self.fingerprint(Timestamp::ZERO, Timestamp::MAX)),
        }]
    }
}

/// Computes this side's response to a sequence of incoming ranges, per the
/// single-range protocol in §4.4 applied to each partition in turn.
///
/// `received` must partition `(−∞, +∞)` by ascending `upper_bound`, as
/// produced by [`TimestampSet::initial_ranges`] or a prior call to this
/// function on the peer.
#[must_use]
pub fn respond_to_ranges(local: &TimestampSet, received: &[Range], config: &ReconcileConfig) -> Vec<Range> {
    let mut response = Vec::new();
    let mut lower = Timestamp::ZERO;

    for range in received {
        let upper = range.upper_bound;
        match &range.kind {
            RangeKind::Skip => {
                response.push(Range {
                    upper_bound: upper,
                    kind: RangeKind::Skip,
                });
            }
            RangeKind::TimestampsLiteral(_remote_items) => {
                // The sender already knows the symmetric difference will be
                // resolved by comparing literals; reply with our own
                // listing of the same range so the caller can diff them.
                response.push(Range {
                    upper_bound: upper,
                    kind: RangeKind::TimestampsLiteral(local.iterate(lower, upper)),
                });
            }
            RangeKind::Fingerprint(remote_fp) => {
                let local_fp = local.fingerprint(lower, upper);
                if local_fp == *remote_fp {
                    response.push(Range {
                        upper_bound: upper,
                        kind: RangeKind::Skip,
                    });
                } else {
                    let count = local.count_in(lower, upper);
                    if count <= config.literal_threshold {
                        response.push(Range {
                            upper_bound: upper,
                            kind: RangeKind::TimestampsLiteral(local.iterate(lower, upper)),
                        });
                    } else {
                        let boundaries = local.split_boundaries(lower, upper, config.split_factor);
                        let mut sub_lower = lower;
                        for boundary in boundaries {
                            response.push(Range {
                                upper_bound: boundary,
                                kind: RangeKind::Fingerprint(local.fingerprint(sub_lower, boundary)),
                            });
                            sub_lower = boundary;
                        }
                    }
                }
            }
        }
        lower = upper;
    }

    response
}

/// Returns `true` once every range in a sequence is `Skip` -- the signal
/// that reconciliation has converged for this owner (§4.5 state machine:
/// `Syncing → Idle` "when no ranges remain non-Skip").
#[must_use]
pub fn all_skip(ranges: &[Range]) -> bool {
    ranges.iter().all(|r| r.kind == RangeKind::Skip)
}

/// Given two literal timestamp listings for the same range (one from each
/// side), returns `(missing_locally, missing_remotely)`: the timestamps the
/// local side needs fetched from the remote, and the timestamps the local
/// side should push because the remote lacks them.
#[must_use]
pub fn diff_literals(local_items: &[Timestamp], remote_items: &[Timestamp]) -> (Vec<Timestamp>, Vec<Timestamp>) {
    let local_set: BTreeSet<Timestamp> = local_items.iter().copied().collect();
    let remote_set: BTreeSet<Timestamp> = remote_items.iter().copied().collect();

    let missing_locally = remote_set.difference(&local_set).copied().collect();
    let missing_remotely = local_set.difference(&remote_set).copied().collect();
    (missing_locally, missing_remotely)
}
