//! Hybrid Logical Clock: monotonic, causally ordered 128-bit timestamps.
//!
//! A [`Timestamp`] is the tuple `(millis, counter, node_id)` described in
//! §3/§4.1: `millis` is a 48-bit wall-clock value, `counter` a 16-bit
//! tie-break, and `node_id` a 64-bit device identifier. Total order is
//! lexicographic on the tuple, and the 16-byte big-endian binary packing
//! preserves that order under `memcmp`.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::TimestampConfig;
use crate::error::TimestampError;

/// Largest value `millis` may take (2^48 - 1).
pub const MAX_MILLIS: u64 = (1u64 << 48) - 1;
/// Largest value `counter` may take (2^16 - 1).
pub const MAX_COUNTER: u16 = u16::MAX;

/// A Hybrid Logical Clock timestamp: `(millis, counter, node_id)`.
///
/// Ordering is derived lexicographically on the tuple, matching the
/// big-endian binary packing used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Milliseconds since the Unix epoch, constrained to 48 bits.
    pub millis: u64,
    /// Tie-break counter for same-millisecond events, constrained to 16 bits.
    pub counter: u16,
    /// 64-bit device identifier, rendered as 16 hex chars in textual form.
    pub node_id: u64,
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.millis, self.counter, self.node_id).cmp(&(other.millis, other.counter, other.node_id))
    }
}

impl Timestamp {
    /// The smallest possible timestamp, used as the open lower bound of the
    /// global reconciliation range.
    pub const ZERO: Timestamp = Timestamp {
        millis: 0,
        counter: 0,
        node_id: 0,
    };

    /// The largest possible timestamp, used as the synthetic `+∞` upper
    /// bound of the global reconciliation range.
    pub const MAX: Timestamp = Timestamp {
        millis: MAX_MILLIS,
        counter: MAX_COUNTER,
        node_id: u64::MAX,
    };

    /// Creates the initial timestamp for a freshly provisioned node.
    #[must_use]
    pub fn create_initial(node_id: u64) -> Self {
        Self {
            millis: 0,
            counter: 0,
            node_id,
        }
    }

    /// Packs the timestamp into its 16-byte big-endian binary form:
    /// 6 bytes millis ‖ 2 bytes counter ‖ 8 bytes node_id.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        let millis_be = self.millis.to_be_bytes(); // 8 bytes, top 2 are always zero
        out[0..6].copy_from_slice(&millis_be[2..8]);
        out[6..8].copy_from_slice(&self.counter.to_be_bytes());
        out[8..16].copy_from_slice(&self.node_id.to_be_bytes());
        out
    }

    /// Unpacks a 16-byte big-endian binary timestamp.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut millis_buf = [0u8; 8];
        millis_buf[2..8].copy_from_slice(&bytes[0..6]);
        let millis = u64::from_be_bytes(millis_buf);
        let counter = u16::from_be_bytes([bytes[6], bytes[7]]);
        let mut node_buf = [0u8; 8];
        node_buf.copy_from_slice(&bytes[8..16]);
        let node_id = u64::from_be_bytes(node_buf);
        Self {
            millis,
            counter,
            node_id,
        }
    }

    /// Renders the canonical debug string form described in §6:
    /// `YYYY-MM-DDTHH:MM:SS.sssZ-HHHH-NNNNNNNNNNNNNNNN`.
    ///
    /// For logs and tests only; never used on the wire or compared for
    /// ordering.
    #[must_use]
    pub fn to_canonical_string(self) -> String {
        let secs = self.millis / 1000;
        let ms = self.millis % 1000;
        let datetime = epoch_millis_to_iso(secs);
        format!(
            "{datetime}.{ms:03}Z-{counter:04X}-{node:016X}",
            counter = self.counter,
            node = self.node_id
        )
    }

    /// Advances this timestamp for a locally originated event (§4.1 `send`).
    pub fn send(self, now_ms: u64, config: &TimestampConfig) -> Result<Timestamp, TimestampError> {
        let next_millis = now_ms.max(self.millis);
        check_drift(next_millis, now_ms, config)?;
        check_range(next_millis)?;

        let next_counter = if next_millis == self.millis {
            self.counter as u32 + 1
        } else {
            0
        };
        check_counter(next_counter)?;

        Ok(Timestamp {
            millis: next_millis,
            counter: next_counter as u16,
            node_id: self.node_id,
        })
    }

    /// Merges a remote timestamp into the local clock for an incoming event
    /// (§4.1 `receive`). The local `node_id` is preserved.
    pub fn receive(
        self,
        now_ms: u64,
        remote: Timestamp,
        config: &TimestampConfig,
    ) -> Result<Timestamp, TimestampError> {
        if remote.node_id == self.node_id {
            return Err(TimestampError::DuplicateNode);
        }

        let next_millis = now_ms.max(self.millis).max(remote.millis);
        check_drift(next_millis, now_ms, config)?;
        check_range(next_millis)?;

        let next_counter: u32 = if next_millis == self.millis && next_millis == remote.millis {
            self.counter.max(remote.counter) as u32 + 1
        } else if next_millis == self.millis {
            self.counter as u32 + 1
        } else if next_millis == remote.millis {
            remote.counter as u32 + 1
        } else {
            0
        };
        check_counter(next_counter)?;

        Ok(Timestamp {
            millis: next_millis,
            counter: next_counter as u16,
            node_id: self.node_id,
        })
    }
}

fn check_drift(next_millis: u64, now_ms: u64, config: &TimestampConfig) -> Result<(), TimestampError> {
    let drift = next_millis.saturating_sub(now_ms);
    if drift > config.max_drift_ms {
        return Err(TimestampError::DriftExceeded {
            next_ms: next_millis,
            now_ms,
        });
    }
    Ok(())
}

fn check_range(next_millis: u64) -> Result<(), TimestampError> {
    if next_millis > MAX_MILLIS {
        return Err(TimestampError::TimeOutOfRange);
    }
    Ok(())
}

fn check_counter(next_counter: u32) -> Result<(), TimestampError> {
    if next_counter > u32::from(MAX_COUNTER) {
        return Err(TimestampError::CounterOverflow);
    }
    Ok(())
}

/// Renders whole seconds since the epoch as an ISO-8601 date/time prefix
/// (no fractional seconds, no trailing `Z` -- the caller appends both).
///
/// A minimal, allocation-light proleptic Gregorian calendar conversion;
/// sufficient for debug-string rendering, not meant for general calendar
/// arithmetic.
fn epoch_millis_to_iso(epoch_secs: u64) -> String {
    let days = epoch_secs / 86_400;
    let rem = epoch_secs % 86_400;
    let (hour, minute, second) = (rem / 3600, (rem % 3600) / 60, rem % 60);

    let (year, month, day) = civil_from_days(days as i64);
    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}")
}

/// Howard Hinnant's `civil_from_days` algorithm, converting a day count
/// since the Unix epoch into a proleptic Gregorian (year, month, day).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = if month <= 2 { y + 1 } else { y };
    (year, month, day)
}

/// Supplies the current wall-clock time in milliseconds since the epoch.
///
/// Abstracted behind a trait so tests can pin `now()` to deterministic
/// values instead of reading the system clock.
pub trait ClockSource: Send + Sync {
    /// Returns the current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// A [`ClockSource`] backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_millis() as u64
    }
}

/// A deterministic [`ClockSource`] test double, settable via an `AtomicU64`.
///
/// Cloning shares the underlying counter, so a test can hold one handle to
/// drive the clock while handing clones to the code under test.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now_ms: Arc<AtomicU64>,
}

impl FixedClock {
    /// Creates a fixed clock starting at `now_ms`.
    #[must_use]
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(now_ms)),
        }
    }

    /// Sets the clock to a new value.
    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, AtomicOrdering::SeqCst);
    }

    /// Advances the clock by `delta_ms`.
    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, AtomicOrdering::SeqCst);
    }
}

impl ClockSource for FixedClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(AtomicOrdering::SeqCst)
    }
}

/// A stateful Hybrid Logical Clock bound to one node, wrapping a
/// [`ClockSource`] and the latest locally produced [`Timestamp`].
pub struct Hlc {
    clock: Box<dyn ClockSource>,
    config: TimestampConfig,
    local: Timestamp,
}

impl Hlc {
    /// Creates a new clock for `node_id`, backed by `clock`.
    #[must_use]
    pub fn new(node_id: u64, clock: Box<dyn ClockSource>, config: TimestampConfig) -> Self {
        Self {
            clock,
            config,
            local: Timestamp::create_initial(node_id),
        }
    }

    /// Returns the most recently produced or observed timestamp.
    #[must_use]
    pub fn current(&self) -> Timestamp {
        self.local
    }

    /// Produces a new timestamp for a locally originated event and advances
    /// the clock's internal state.
    pub fn send(&mut self) -> Result<Timestamp, TimestampError> {
        let now_ms = self.clock.now_ms();
        let next = self.local.send(now_ms, &self.config)?;
        self.local = next;
        Ok(next)
    }

    /// Merges an incoming remote timestamp and advances the clock's
    /// internal state.
    pub fn receive(&mut self, remote: Timestamp) -> Result<Timestamp, TimestampError> {
        let now_ms = self.clock.now_ms();
        let next = self.local.receive(now_ms, remote, &self.config)?;
        self.local = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config() -> TimestampConfig {
        TimestampConfig::default()
    }

    #[test]
    fn create_initial_is_zero() {
        let ts = Timestamp::create_initial(0xABCD);
        assert_eq!(ts.millis, 0);
        assert_eq!(ts.counter, 0);
        assert_eq!(ts.node_id, 0xABCD);
    }

    #[test]
    fn send_advances_millis_when_now_is_later() {
        let t = Timestamp::create_initial(1);
        let next = t.send(100, &config()).unwrap();
        assert_eq!(next.millis, 100);
        assert_eq!(next.counter, 0);
        assert!(next > t);
    }

    #[test]
    fn send_bumps_counter_when_now_does_not_advance() {
        let t = Timestamp {
            millis: 100,
            counter: 5,
            node_id: 1,
        };
        let next = t.send(50, &config()).unwrap();
        assert_eq!(next.millis, 100);
        assert_eq!(next.counter, 6);
        assert!(next > t);
    }

    #[test]
    fn send_monotonic_property_like() {
        let t = Timestamp {
            millis: 1000,
            counter: 10,
            node_id: 7,
        };
        for now in [0u64, 500, 1000, 1000_1] {
            if let Ok(next) = t.send(now, &config()) {
                assert!(next > t, "send({now}) must be > {t:?}, got {next:?}");
            }
        }
    }

    #[test]
    fn send_drift_rejection_scenario_6() {
        let t = Timestamp {
            millis: 300_001,
            counter: 0,
            node_id: 1,
        };
        let err = t.send(0, &config()).unwrap_err();
        assert_eq!(
            err,
            TimestampError::DriftExceeded {
                next_ms: 300_001,
                now_ms: 0
            }
        );
    }

    #[test]
    fn send_counter_overflow_scenario_5() {
        let mut t = Timestamp {
            millis: 1000,
            counter: 0,
            node_id: 1,
        };
        for i in 1..=u32::from(MAX_COUNTER) {
            t = t.send(1000, &config()).unwrap();
            assert_eq!(t.counter as u32, i);
        }
        let err = t.send(1000, &config()).unwrap_err();
        assert_eq!(err, TimestampError::CounterOverflow);
    }

    #[test]
    fn send_time_out_of_range() {
        let t = Timestamp::create_initial(1);
        let err = t.send(MAX_MILLIS + 1, &TimestampConfig { max_drift_ms: u64::MAX }).unwrap_err();
        assert_eq!(err, TimestampError::TimeOutOfRange);
    }

    #[test]
    fn receive_rejects_duplicate_node() {
        let local = Timestamp::create_initial(5);
        let remote = Timestamp::create_initial(5);
        let err = local.receive(0, remote, &config()).unwrap_err();
        assert_eq!(err, TimestampError::DuplicateNode);
    }

    #[test]
    fn receive_keeps_local_node_id() {
        let local = Timestamp::create_initial(1);
        let remote = Timestamp {
            millis: 10,
            counter: 3,
            node_id: 2,
        };
        let merged = local.receive(0, remote, &config()).unwrap();
        assert_eq!(merged.node_id, 1);
    }

    #[test]
    fn receive_strictly_greater_than_both_inputs() {
        let local = Timestamp {
            millis: 50,
            counter: 2,
            node_id: 1,
        };
        let remote = Timestamp {
            millis: 50,
            counter: 7,
            node_id: 2,
        };
        let merged = local.receive(0, remote, &config()).unwrap();
        assert!(merged > local);
        // Compare on (millis, counter) only since node_id differs and total
        // order is lexicographic -- remote's larger node_id would otherwise
        // make a naive tuple compare misleading here.
        assert!((merged.millis, merged.counter) > (remote.millis, remote.counter));
    }

    #[test]
    fn receive_same_millis_both_sides_takes_max_counter_plus_one() {
        let local = Timestamp {
            millis: 100,
            counter: 4,
            node_id: 1,
        };
        let remote = Timestamp {
            millis: 100,
            counter: 9,
            node_id: 2,
        };
        let merged = local.receive(0, remote, &config()).unwrap();
        assert_eq!(merged.millis, 100);
        assert_eq!(merged.counter, 10);
    }

    #[test]
    fn receive_remote_millis_ahead() {
        let local = Timestamp {
            millis: 10,
            counter: 0,
            node_id: 1,
        };
        let remote = Timestamp {
            millis: 20,
            counter: 3,
            node_id: 2,
        };
        let merged = local.receive(0, remote, &config()).unwrap();
        assert_eq!(merged.millis, 20);
        assert_eq!(merged.counter, 4);
    }

    #[test]
    fn receive_now_ahead_of_both() {
        let local = Timestamp {
            millis: 10,
            counter: 5,
            node_id: 1,
        };
        let remote = Timestamp {
            millis: 15,
            counter: 2,
            node_id: 2,
        };
        let merged = local.receive(100, remote, &config()).unwrap();
        assert_eq!(merged.millis, 100);
        assert_eq!(merged.counter, 0);
    }

    #[test]
    fn binary_roundtrip_is_exactly_16_bytes() {
        let t = Timestamp {
            millis: 0x0000_BEEF_CAFE,
            counter: 0x1234,
            node_id: 0x0102_0304_0506_0708,
        };
        let bytes = t.to_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(Timestamp::from_bytes(bytes), t);
    }

    #[test]
    fn binary_ordering_matches_total_order() {
        let pairs = [
            (
                Timestamp { millis: 1, counter: 0, node_id: 0 },
                Timestamp { millis: 2, counter: 0, node_id: 0 },
            ),
            (
                Timestamp { millis: 5, counter: 1, node_id: 0 },
                Timestamp { millis: 5, counter: 2, node_id: 0 },
            ),
            (
                Timestamp { millis: 5, counter: 1, node_id: 1 },
                Timestamp { millis: 5, counter: 1, node_id: 2 },
            ),
        ];
        for (a, b) in pairs {
            assert!(a < b);
            let ba = a.to_bytes();
            let bb = b.to_bytes();
            assert_eq!(ba.as_slice().cmp(bb.as_slice()), Ordering::Less);
        }
    }

    #[test]
    fn zero_and_max_bound_total_order() {
        let t = Timestamp {
            millis: 12345,
            counter: 10,
            node_id: 99,
        };
        assert!(Timestamp::ZERO < t);
        assert!(t < Timestamp::MAX);
    }

    #[test]
    fn canonical_string_has_expected_shape() {
        let t = Timestamp {
            millis: 1_700_000_000_123,
            counter: 0x0A1B,
            node_id: 0x0102_0304_0506_0708,
        };
        let s = t.to_canonical_string();
        // YYYY-MM-DDTHH:MM:SS.sssZ-HHHH-NNNNNNNNNNNNNNNN
        assert_eq!(s.len(), "2023-11-14T22:13:20.123Z-0A1B-0102030405060708".len());
        assert!(s.ends_with("-0A1B-0102030405060708"));
        assert!(s.contains(".123Z-"));
    }

    #[test]
    fn fixed_clock_hlc_send_monotonic() {
        let clock = FixedClock::new(1000);
        let mut hlc = Hlc::new(1, Box::new(clock.clone()), config());
        let a = hlc.send().unwrap();
        let b = hlc.send().unwrap();
        assert!(b > a);

        clock.advance(10);
        let c = hlc.send().unwrap();
        assert!(c > b);
        assert_eq!(c.millis, 1010);
    }

    #[test]
    fn hlc_receive_updates_current() {
        let clock = FixedClock::new(1000);
        let mut hlc = Hlc::new(1, Box::new(clock), config());
        let remote = Timestamp {
            millis: 1005,
            counter: 2,
            node_id: 2,
        };
        let merged = hlc.receive(remote).unwrap();
        assert_eq!(hlc.current(), merged);
        assert!(merged > remote);
    }

    proptest! {
        /// §8: `send` is monotonic whenever it succeeds -- the produced
        /// timestamp always strictly exceeds the one it was called on.
        #[test]
        fn prop_send_is_monotonic_when_it_succeeds(
            millis in 0u64..MAX_MILLIS,
            counter in 0u16..MAX_COUNTER,
            node_id in any::<u64>(),
            now_ms in 0u64..MAX_MILLIS,
        ) {
            let t = Timestamp { millis, counter, node_id };
            if let Ok(next) = t.send(now_ms, &config()) {
                prop_assert!(next > t);
            }
        }

        /// §8: `receive` is monotonic whenever it succeeds -- the merged
        /// timestamp exceeds both the local and remote inputs.
        #[test]
        fn prop_receive_is_monotonic_when_it_succeeds(
            local_millis in 0u64..MAX_MILLIS,
            local_counter in 0u16..MAX_COUNTER,
            remote_millis in 0u64..MAX_MILLIS,
            remote_counter in 0u16..MAX_COUNTER,
            remote_node in 1u64..u64::MAX,
            now_ms in 0u64..MAX_MILLIS,
        ) {
            let local = Timestamp { millis: local_millis, counter: local_counter, node_id: 0 };
            let remote = Timestamp { millis: remote_millis, counter: remote_counter, node_id: remote_node };
            if let Ok(merged) = local.receive(now_ms, remote, &config()) {
                prop_assert!(merged > local);
                prop_assert!((merged.millis, merged.counter) >= (remote.millis, remote.counter));
            }
        }

        /// §8: the produced millis never exceeds `now_ms + max_drift_ms`,
        /// i.e. a successful `send` never reports unbounded clock drift.
        #[test]
        fn prop_send_respects_drift_bound(
            millis in 0u64..MAX_MILLIS,
            counter in 0u16..MAX_COUNTER,
            now_ms in 0u64..MAX_MILLIS,
        ) {
            let t = Timestamp { millis, counter, node_id: 1 };
            let cfg = config();
            if let Ok(next) = t.send(now_ms, &cfg) {
                prop_assert!(next.millis <= now_ms.saturating_add(cfg.max_drift_ms));
            }
        }

        /// §8: binary packing round-trips and preserves the total order.
        #[test]
        fn prop_binary_roundtrip_preserves_order(
            millis_a in 0u64..MAX_MILLIS,
            counter_a in 0u16..MAX_COUNTER,
            node_a in any::<u64>(),
            millis_b in 0u64..MAX_MILLIS,
            counter_b in 0u16..MAX_COUNTER,
            node_b in any::<u64>(),
        ) {
            let a = Timestamp { millis: millis_a, counter: counter_a, node_id: node_a };
            let b = Timestamp { millis: millis_b, counter: counter_b, node_id: node_b };
            prop_assert_eq!(Timestamp::from_bytes(a.to_bytes()), a);
            prop_assert_eq!(Timestamp::from_bytes(b.to_bytes()), b);
            prop_assert_eq!(a.cmp(&b), a.to_bytes().as_slice().cmp(b.to_bytes().as_slice()));
        }
    }
}
