//! Tunables for the timestamp, reconciliation, and sync subsystems.
//!
//! Defaults here are not arbitrary: `ReconcileConfig`'s defaults are chosen
//! so the range-reconciliation convergence property holds for the
//! documented thousand-element scenario (see testable property 4).

use std::time::Duration;

/// Governs HLC drift and range enforcement (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampConfig {
    /// Maximum allowed drift, in milliseconds, between a received timestamp
    /// and the local wall clock before `send`/`receive` fail with
    /// `DriftExceeded`.
    pub max_drift_ms: u64,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            max_drift_ms: 300_000,
        }
    }
}

/// Governs the range reconciliation algorithm's fingerprint shape and
/// refinement thresholds (§4.4, §9 Open Questions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Width of a fingerprint in bytes. Fixed at 12 on the wire; changing
    /// this for a peer amounts to a protocol version change.
    pub fingerprint_width: usize,
    /// Number of sub-ranges (`k`) a mismatching range is split into.
    pub split_factor: usize,
    /// Ranges with fewer than this many items on either side are resolved
    /// with a literal timestamp list instead of a further split.
    pub literal_threshold: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            fingerprint_width: 12,
            split_factor: 16,
            literal_threshold: 128,
        }
    }
}

/// Governs the sync client's reconnect and backpressure behavior (§4.5,
/// §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Minimum backoff delay before a reconnect attempt.
    pub backoff_min: Duration,
    /// Maximum backoff delay before a reconnect attempt.
    pub backoff_max: Duration,
    /// Backoff multiplier applied after each failed attempt.
    pub backoff_multiplier: f64,
    /// Transport connect timeout.
    pub connect_timeout: Duration,
    /// Idle keep-alive ping interval.
    pub idle_ping_interval: Duration,
    /// Outbound queue depth at which new local mutations block until drained.
    pub outbound_high_water_mark: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backoff_min: Duration::from_millis(250),
            backoff_max: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            connect_timeout: Duration::from_secs(10),
            idle_ping_interval: Duration::from_secs(30),
            outbound_high_water_mark: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_config_defaults() {
        assert_eq!(TimestampConfig::default().max_drift_ms, 300_000);
    }

    #[test]
    fn reconcile_config_defaults() {
        let config = ReconcileConfig::default();
        assert_eq!(config.fingerprint_width, 12);
        assert_eq!(config.split_factor, 16);
        assert_eq!(config.literal_threshold, 128);
    }

    #[test]
    fn sync_config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.backoff_min, Duration::from_millis(250));
        assert_eq!(config.backoff_max, Duration::from_secs(30));
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }
}
