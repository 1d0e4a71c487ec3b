//! The CRDT scalar value type and plaintext message envelope (§3).

use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;

/// `SqlScalar = null | i64 | f64 | text | bytes` (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit float.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    #[serde(with = "serde_bytes")]
    Bytes(Vec<u8>),
}

/// A plaintext CRDT message: "column of row was set to value at timestamp"
/// (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrdtMessage {
    /// Target table name.
    pub table: String,
    /// Target row id.
    pub row_id: String,
    /// Target column name.
    pub column: String,
    /// The value being asserted.
    pub value: Value,
    /// The HLC timestamp of this assertion.
    pub timestamp: Timestamp,
}
