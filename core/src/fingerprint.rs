//! 12-byte XOR-accumulated fingerprints over sets of timestamps (§3, §4.4).
//!
//! A fingerprint summarizes a set of timestamps: each element's 16-byte
//! binary form is hashed to a 12-byte digest, and the digests are XORed
//! together. XOR makes the fingerprint commutative (order-independent) and
//! incrementally updatable (XOR the old element out, the new one in).

use crate::timestamp::Timestamp;

/// A 12-byte summary of a set of timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fingerprint(pub [u8; 12]);

impl Fingerprint {
    /// The fingerprint of the empty set.
    pub const EMPTY: Fingerprint = Fingerprint([0u8; 12]);

    /// Hashes a single timestamp's binary form down to 12 bytes.
    #[must_use]
    pub fn hash_one(ts: Timestamp) -> [u8; 12] {
        let digest = blake3::hash(&ts.to_bytes());
        let bytes = digest.as_bytes();
        let mut out = [0u8; 12];
        out.copy_from_slice(&bytes[0..12]);
        out
    }

    /// XORs a single timestamp's hash into this fingerprint.
    pub fn xor_in(&mut self, ts: Timestamp) {
        let h = Self::hash_one(ts);
        for i in 0..12 {
            self.0[i] ^= h[i];
        }
    }

    /// Computes the fingerprint of an arbitrary iterator of timestamps.
    ///
    /// Order-independent: XOR is commutative and associative.
    pub fn of<I: IntoIterator<Item = Timestamp>>(timestamps: I) -> Fingerprint {
        let mut fp = Fingerprint::EMPTY;
        for ts in timestamps {
            fp.xor_in(ts);
        }
        fp
    }

    /// XORs two fingerprints together (e.g. to combine sub-range fingerprints
    /// or to remove a timestamp that was mistakenly included).
    #[must_use]
    pub fn combine(self, other: Fingerprint) -> Fingerprint {
        let mut out = [0u8; 12];
        for i in 0..12 {
            out[i] = self.0[i] ^ other.0[i];
        }
        Fingerprint(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ts(millis: u64, counter: u16, node_id: u64) -> Timestamp {
        Timestamp {
            millis,
            counter,
            node_id,
        }
    }

    #[test]
    fn fingerprint_of_empty_set_is_empty() {
        assert_eq!(Fingerprint::of(std::iter::empty()), Fingerprint::EMPTY);
    }

    #[test]
    fn fingerprint_is_commutative() {
        let a = ts(1, 0, 1);
        let b = ts(2, 0, 1);
        let c = ts(3, 0, 1);

        let fp1 = Fingerprint::of([a, b, c]);
        let fp2 = Fingerprint::of([c, b, a]);
        let fp3 = Fingerprint::of([b, a, c]);
        assert_eq!(fp1, fp2);
        assert_eq!(fp1, fp3);
    }

    #[test]
    fn equal_sets_produce_equal_fingerprints() {
        let set_a = vec![ts(1, 0, 1), ts(5, 2, 1), ts(9, 0, 2)];
        let mut set_b = set_a.clone();
        set_b.reverse();
        assert_eq!(Fingerprint::of(set_a), Fingerprint::of(set_b));
    }

    #[test]
    fn differing_sets_produce_different_fingerprints() {
        let set_a = vec![ts(1, 0, 1), ts(5, 2, 1)];
        let set_b = vec![ts(1, 0, 1), ts(6, 2, 1)];
        assert_ne!(Fingerprint::of(set_a), Fingerprint::of(set_b));
    }

    #[test]
    fn combine_is_xor_self_inverse() {
        let fp = Fingerprint::of([ts(1, 0, 1), ts(2, 0, 1)]);
        let combined = fp.combine(fp);
        assert_eq!(combined, Fingerprint::EMPTY);
    }

    #[test]
    fn xor_in_matches_of() {
        let mut fp = Fingerprint::EMPTY;
        fp.xor_in(ts(1, 0, 1));
        fp.xor_in(ts(2, 0, 1));
        assert_eq!(fp, Fingerprint::of([ts(1, 0, 1), ts(2, 0, 1)]));
    }

    fn arb_ts() -> impl Strategy<Value = Timestamp> {
        (any::<u64>(), any::<u16>(), any::<u64>()).prop_map(|(millis, counter, node_id)| ts(millis, counter, node_id))
    }

    proptest! {
        /// §8: fingerprints are commutative -- any permutation of the same
        /// multiset of timestamps produces the same fingerprint.
        #[test]
        fn prop_fingerprint_is_order_independent(
            items in prop::collection::vec(arb_ts(), 0..16),
            seed in any::<u64>(),
        ) {
            let mut shuffled = items.clone();
            // Deterministic pseudo-shuffle from the seed, since proptest
            // strategies can't call the system RNG.
            let len = shuffled.len();
            for i in 0..len {
                let j = ((seed.wrapping_add(i as u64)).wrapping_mul(2654435761) as usize) % len.max(1);
                shuffled.swap(i, j.min(len.saturating_sub(1)));
            }
            prop_assert_eq!(Fingerprint::of(items), Fingerprint::of(shuffled));
        }

        /// §8: combining a fingerprint with itself cancels to the empty
        /// fingerprint (XOR self-inverse), and `combine` is associative.
        #[test]
        fn prop_combine_self_inverse(items in prop::collection::vec(arb_ts(), 0..16)) {
            let fp = Fingerprint::of(items);
            prop_assert_eq!(fp.combine(fp), Fingerprint::EMPTY);
        }

        /// §8: two sets that differ by a single element almost always
        /// produce different fingerprints (collision probability is
        /// negligible for a 96-bit digest).
        #[test]
        fn prop_differing_single_element_changes_fingerprint(
            base in prop::collection::vec(arb_ts(), 1..8),
            extra in arb_ts(),
        ) {
            prop_assume!(!base.contains(&extra));
            let mut with_extra = base.clone();
            with_extra.push(extra);
            prop_assert_ne!(Fingerprint::of(base), Fingerprint::of(with_extra));
        }
    }
}
