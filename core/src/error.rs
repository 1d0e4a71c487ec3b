//! Typed error taxonomy for the riftdb core.
//!
//! Every public operation returns one of these instead of panicking or
//! throwing. `RiftError` is the crate-level umbrella used at module
//! boundaries where any of the underlying taxonomies might surface.

use thiserror::Error;

/// Errors produced by [`crate::timestamp`] operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TimestampError {
    /// `next_millis` exceeded `now_ms + max_drift_ms`.
    #[error("clock drift exceeded: next={next_ms} now={now_ms}")]
    DriftExceeded {
        /// The millis value that would have been produced.
        next_ms: u64,
        /// The wall-clock millis the caller supplied.
        now_ms: u64,
    },
    /// The counter would overflow its 16-bit range for this millisecond.
    #[error("HLC counter overflow")]
    CounterOverflow,
    /// `next_millis` exceeded the 48-bit millis range.
    #[error("timestamp millis out of range")]
    TimeOutOfRange,
    /// `receive` was called with a remote timestamp sharing the local node id.
    #[error("receive called with duplicate node id")]
    DuplicateNode,
}

/// Errors produced by the history store and storage adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A unique-key constraint was violated (normally absorbed silently).
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    /// The underlying storage medium failed.
    #[error("storage I/O failure: {0}")]
    IoFailure(String),
    /// Stored data failed an internal consistency check.
    #[error("corrupted storage: {0}")]
    Corrupted(String),
}

/// Errors produced by [`crate::crypto`] and [`crate::owner`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD decryption failed (wrong key, corrupted ciphertext, or tampering).
    #[error("decryption failed")]
    DecryptFailed,
    /// A key was the wrong length or otherwise malformed.
    #[error("bad key material")]
    BadKey,
    /// The supplied mnemonic failed BIP-39 validation.
    #[error("bad mnemonic: {0}")]
    BadMnemonic(String),
}

/// Errors produced while decoding or validating wire messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame's version byte is not supported by this implementation.
    #[error("protocol version mismatch: got {got}, expected {expected}")]
    VersionMismatch {
        /// Version byte read from the frame.
        got: u8,
        /// Version byte this implementation speaks.
        expected: u8,
    },
    /// The frame's bytes could not be parsed as a valid message.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    /// A range or message tag was not recognized; per spec this aborts the session.
    #[error("unknown tag: {0}")]
    UnknownTag(u8),
    /// A `WriteRequest`'s `write_key` did not match the stored value.
    #[error("write key invalid")]
    WriteKeyInvalid,
    /// A frame or collection exceeded a configured size limit.
    #[error("size limit exceeded: {0}")]
    SizeLimitExceeded(String),
}

/// Errors produced by the sync transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// The transport could not establish a connection.
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    /// An established connection was closed, gracefully or otherwise.
    #[error("connection closed")]
    ConnectionClosed,
    /// An operation exceeded its deadline.
    #[error("timeout")]
    Timeout,
}

/// Errors produced by schema/materialization validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A value did not match the expected SQL scalar type for its column.
    #[error("type validation failed for column {column}")]
    TypeValidation {
        /// The offending column name.
        column: String,
    },
    /// An operation referenced a table that does not exist.
    #[error("unknown table: {0}")]
    UnknownTable(String),
    /// A row mutation was missing its `id` primary key.
    #[error("missing id")]
    MissingId,
    /// A mutation targeted one of the implicit `id`/`created_at`/
    /// `updated_at`/`is_deleted` columns every user table carries (§6).
    #[error("column {0} is reserved for implicit row metadata")]
    ReservedColumn(String),
}

/// Crate-level umbrella error, used at module boundaries that can fail for
/// more than one reason (e.g. the worker touches crypto, storage, and schema).
#[derive(Debug, Error)]
pub enum RiftError {
    /// Wraps [`TimestampError`].
    #[error(transparent)]
    Timestamp(#[from] TimestampError),
    /// Wraps [`StorageError`].
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Wraps [`CryptoError`].
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// Wraps [`ProtocolError`].
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Wraps [`NetworkError`].
    #[error(transparent)]
    Network(#[from] NetworkError),
    /// Wraps [`SchemaError`].
    #[error(transparent)]
    Schema(#[from] SchemaError),
}
