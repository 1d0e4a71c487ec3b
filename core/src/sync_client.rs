//! Sync session state machine, reconnect backoff, and per-owner outbound
//! queueing (§4.5 state machine, §4.6).
//!
//! The sync client is a single cooperative loop per device: one owner's
//! session is `Idle → Connecting → Open → Syncing → (Reconnecting on error)`.
//! This module models that state machine and its backoff policy as plain
//! data so a host loop can drive it without embedding timing logic inline.

use std::time::Duration;

use rand::Rng;

use crate::config::SyncConfig;
use crate::error::NetworkError;
use crate::protocol::EncryptedMessage;

/// The sync session's state, per the §4.5 client-side state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No active connection attempt; waiting for the next scheduled sync.
    Idle,
    /// A transport connection attempt is in flight.
    Connecting,
    /// Transport is ready; an `InitiatorSync` has not yet been sent.
    Open,
    /// An `InitiatorSync` has been sent and range refinement is ongoing.
    Syncing,
    /// The previous attempt failed; waiting out a backoff delay before the
    /// next `Connecting` transition.
    Reconnecting { attempt: u32 },
}

/// An event driving a [`SessionState`] transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A scheduled or externally triggered sync should begin.
    ScheduleSync,
    /// The transport finished connecting.
    TransportReady,
    /// An `InitiatorSync` message was sent.
    InitiatorSent,
    /// A refinement round completed with every range at `Skip` and no
    /// pending writes.
    Converged,
    /// Further non-`Skip` ranges remain; stay in `Syncing`.
    RefinementContinues,
    /// Any I/O error at any suspension point, carrying the transport error
    /// that triggered it.
    IoError(NetworkError),
    /// The backoff delay elapsed; retry the connection.
    BackoffElapsed,
}

impl SessionState {
    /// Applies one event to the current state, returning the next state.
    ///
    /// Transitions not explicitly named in §4.5 are no-ops (the state is
    /// returned unchanged) rather than panicking, since a host loop may
    /// observe events that don't apply to every state (e.g. a stray
    /// `RefinementContinues` while `Idle`).
    #[must_use]
    pub fn apply(self, event: SessionEvent) -> SessionState {
        use SessionEvent as E;
        use SessionState as S;
        match (&self, event) {
            (S::Idle, E::ScheduleSync) => S::Connecting,
            (S::Connecting, E::TransportReady) => S::Open,
            (S::Open, E::InitiatorSent) => S::Syncing,
            (S::Syncing, E::RefinementContinues) => S::Syncing,
            (S::Syncing, E::Converged) => S::Idle,
            (_, E::IoError(_)) => S::Reconnecting {
                attempt: match self {
                    S::Reconnecting { attempt } => attempt + 1,
                    _ => 1,
                },
            },
            (S::Reconnecting { .. }, E::BackoffElapsed) => S::Connecting,
            _ => self,
        }
    }
}

/// Computes the backoff delay for the `attempt`-th reconnect (1-indexed),
/// as `min(backoff_max, backoff_min * multiplier^(attempt - 1))`, with
/// full jitter (a uniform random delay between zero and the computed cap).
#[must_use]
pub fn backoff_delay(attempt: u32, config: &SyncConfig) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let scaled = config.backoff_multiplier.powi(exponent as i32);
    let cap_ms = (config.backoff_min.as_millis() as f64 * scaled).min(config.backoff_max.as_millis() as f64);
    let cap_ms = cap_ms.max(0.0) as u64;
    let jittered_ms = if cap_ms == 0 { 0 } else { rand::rng().random_range(0..=cap_ms) };
    Duration::from_millis(jittered_ms)
}

/// A single owner's pending outbound writes, flushed on reconnect and
/// backpressured at `high_water_mark` (§4.6).
#[derive(Debug, Default)]
pub struct OutboundQueue {
    pending: Vec<EncryptedMessage>,
    high_water_mark: usize,
}

/// Returned by [`OutboundQueue::push`] when the queue has reached its
/// high-water mark and new local mutations should block until drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

impl OutboundQueue {
    /// Creates an empty queue with the given backpressure threshold.
    #[must_use]
    pub fn new(high_water_mark: usize) -> Self {
        Self {
            pending: Vec::new(),
            high_water_mark,
        }
    }

    /// Enqueues a message for the next flush, failing if the queue is
    /// already at its high-water mark.
    pub fn push(&mut self, message: EncryptedMessage) -> Result<(), QueueFull> {
        if self.pending.len() >= self.high_water_mark {
            return Err(QueueFull);
        }
        self.pending.push(message);
        Ok(())
    }

    /// Drains every pending message, e.g. to attach to the next
    /// `InitiatorSync`/`WriteRequest` on reconnect.
    pub fn drain(&mut self) -> Vec<EncryptedMessage> {
        std::mem::take(&mut self.pending)
    }

    /// Number of messages currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the queue holds no pending messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether the queue is at or above its backpressure threshold.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.high_water_mark
    }
}
