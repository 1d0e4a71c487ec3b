//! Wire-format message builder/parser over [`crate::codec`], [`crate::timestamp`],
//! and [`crate::reconcile`] (§4.5).
//!
//! Every message starts with a 1-byte protocol version (currently always
//! `0`). Decoding an unknown range tag or an unrecognized version aborts the
//! connection per the strict forward-compatibility policy: "unknown tag →
//! abort".

use crate::codec::{Reader, Writer};
use crate::error::ProtocolError;
use crate::reconcile::{Range, RangeKind};
use crate::timestamp::Timestamp;
use crate::value::CrdtMessage;

/// The only protocol version this implementation speaks.
pub const PROTOCOL_VERSION: u8 = 0;

const TAG_SKIP: u8 = 0;
const TAG_FINGERPRINT: u8 = 1;
const TAG_LITERAL: u8 = 2;

/// An encrypted CRDT message as carried on the wire: a timestamp plus
/// opaque ciphertext (§3 `EncryptedCrdtMessage`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessage {
    pub timestamp: Timestamp,
    pub ciphertext: Vec<u8>,
}

/// The four message shapes of §4.5.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    InitiatorSync {
        owner_id: String,
        claimed_size: u64,
        ranges: Vec<Range>,
        pushed: Vec<EncryptedMessage>,
    },
    ResponderSync {
        owner_id: String,
        ranges: Vec<Range>,
        pushed: Vec<EncryptedMessage>,
    },
    WriteRequest {
        owner_id: String,
        write_key: Vec<u8>,
        messages: Vec<EncryptedMessage>,
    },
    WriteAck {
        owner_id: String,
    },
    WriteReject {
        owner_id: String,
        reason: String,
    },
}

const KIND_INITIATOR_SYNC: u8 = 1;
const KIND_RESPONDER_SYNC: u8 = 2;
const KIND_WRITE_REQUEST: u8 = 3;
const KIND_WRITE_ACK: u8 = 4;
const KIND_WRITE_REJECT: u8 = 5;

fn write_range(w: &mut Writer, range: &Range) {
    match &range.kind {
        RangeKind::Skip => {
            w.write_u8(TAG_SKIP);
            w.write_fixed16(&range.upper_bound.to_bytes());
        }
        RangeKind::Fingerprint(fp) => {
            w.write_u8(TAG_FINGERPRINT);
            w.write_fixed16(&range.upper_bound.to_bytes());
            w.write_fixed12(&fp.0);
        }
        RangeKind::TimestampsLiteral(items) => {
            w.write_u8(TAG_LITERAL);
            w.write_fixed16(&range.upper_bound.to_bytes());
            w.write_uvarint(items.len() as u64);
            for ts in items {
                w.write_fixed16(&ts.to_bytes());
            }
        }
    }
}

fn read_range(r: &mut Reader) -> Result<Range, ProtocolError> {
    let tag = r.read_u8()?;
    let upper_bound = Timestamp::from_bytes(r.read_fixed16()?);
    let kind = match tag {
        TAG_SKIP => RangeKind::Skip,
        TAG_FINGERPRINT => {
            let bytes = r.read_fixed12()?;
            RangeKind::Fingerprint(crate::fingerprint::Fingerprint(bytes))
        }
        TAG_LITERAL => {
            let count = r.read_uvarint()?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(Timestamp::from_bytes(r.read_fixed16()?));
            }
            RangeKind::TimestampsLiteral(items)
        }
        other => {
            tracing::warn!(tag = other, "unknown range tag; aborting decode");
            return Err(ProtocolError::UnknownTag(other));
        }
    };
    Ok(Range { upper_bound, kind })
}

fn write_ranges(w: &mut Writer, ranges: &[Range]) {
    w.write_uvarint(ranges.len() as u64);
    for range in ranges {
        write_range(w, range);
    }
}

fn read_ranges(r: &mut Reader) -> Result<Vec<Range>, ProtocolError> {
    let count = r.read_uvarint()?;
    let mut ranges = Vec::with_capacity(count as usize);
    for _ in 0..count {
        ranges.push(read_range(r)?);
    }
    Ok(ranges)
}

fn write_encrypted(w: &mut Writer, msg: &EncryptedMessage) {
    w.write_fixed16(&msg.timestamp.to_bytes());
    w.write_bytes(&msg.ciphertext);
}

fn read_encrypted(r: &mut Reader) -> Result<EncryptedMessage, ProtocolError> {
    let timestamp = Timestamp::from_bytes(r.read_fixed16()?);
    let ciphertext = r.read_bytes()?;
    Ok(EncryptedMessage { timestamp, ciphertext })
}

fn write_encrypted_list(w: &mut Writer, messages: &[EncryptedMessage]) {
    w.write_uvarint(messages.len() as u64);
    for msg in messages {
        write_encrypted(w, msg);
    }
}

fn read_encrypted_list(r: &mut Reader) -> Result<Vec<EncryptedMessage>, ProtocolError> {
    let count = r.read_uvarint()?;
    let mut messages = Vec::with_capacity(count as usize);
    for _ in 0..count {
        messages.push(read_encrypted(r)?);
    }
    Ok(messages)
}

impl SyncMessage {
    /// Encodes this message to its wire form, version byte first.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u8(PROTOCOL_VERSION);
        match self {
            SyncMessage::InitiatorSync {
                owner_id,
                claimed_size,
                ranges,
                pushed,
            } => {
                w.write_u8(KIND_INITIATOR_SYNC);
                w.write_bytes(owner_id.as_bytes());
                w.write_uvarint(*claimed_size);
                write_ranges(&mut w, ranges);
                write_encrypted_list(&mut w, pushed);
            }
            SyncMessage::ResponderSync {
                owner_id,
                ranges,
                pushed,
            } => {
                w.write_u8(KIND_RESPONDER_SYNC);
                w.write_bytes(owner_id.as_bytes());
                write_ranges(&mut w, ranges);
                write_encrypted_list(&mut w, pushed);
            }
            SyncMessage::WriteRequest {
                owner_id,
                write_key,
                messages,
            } => {
                w.write_u8(KIND_WRITE_REQUEST);
                w.write_bytes(owner_id.as_bytes());
                w.write_bytes(write_key);
                write_encrypted_list(&mut w, messages);
            }
            SyncMessage::WriteAck { owner_id } => {
                w.write_u8(KIND_WRITE_ACK);
                w.write_bytes(owner_id.as_bytes());
            }
            SyncMessage::WriteReject { owner_id, reason } => {
                w.write_u8(KIND_WRITE_REJECT);
                w.write_bytes(owner_id.as_bytes());
                w.write_bytes(reason.as_bytes());
            }
        }
        w.into_bytes()
    }

    /// Decodes a message from its wire form, rejecting unknown versions and
    /// unknown tags rather than attempting a best-effort parse.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(bytes);
        let version = r.read_u8()?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                got: version,
                expected: PROTOCOL_VERSION,
            });
        }
        let kind = r.read_u8()?;
        let message = match kind {
            KIND_INITIATOR_SYNC => {
                let owner_id = read_utf8_bytes(&mut r)?;
                let claimed_size = r.read_uvarint()?;
                let ranges = read_ranges(&mut r)?;
                let pushed = read_encrypted_list(&mut r)?;
                SyncMessage::InitiatorSync {
                    owner_id,
                    claimed_size,
                    ranges,
                    pushed,
                }
            }
            KIND_RESPONDER_SYNC => {
                let owner_id = read_utf8_bytes(&mut r)?;
                let ranges = read_ranges(&mut r)?;
                let pushed = read_encrypted_list(&mut r)?;
                SyncMessage::ResponderSync {
                    owner_id,
                    ranges,
                    pushed,
                }
            }
            KIND_WRITE_REQUEST => {
                let owner_id = read_utf8_bytes(&mut r)?;
                let write_key = r.read_bytes()?;
                let messages = read_encrypted_list(&mut r)?;
                SyncMessage::WriteRequest {
                    owner_id,
                    write_key,
                    messages,
                }
            }
            KIND_WRITE_ACK => {
                let owner_id = read_utf8_bytes(&mut r)?;
                SyncMessage::WriteAck { owner_id }
            }
            KIND_WRITE_REJECT => {
                let owner_id = read_utf8_bytes(&mut r)?;
                let reason = read_utf8_bytes(&mut r)?;
                SyncMessage::WriteReject { owner_id, reason }
            }
            other => {
                tracing::warn!(tag = other, "unknown message kind; aborting decode");
                return Err(ProtocolError::UnknownTag(other));
            }
        };
        Ok(message)
    }
}

fn read_utf8_bytes(r: &mut Reader) -> Result<String, ProtocolError> {
    let bytes = r.read_bytes()?;
    String::from_utf8(bytes).map_err(|_| ProtocolError::MalformedFrame("owner_id is not valid utf-8".to_string()))
}

/// Converts a plaintext [`CrdtMessage`] and its encryption into the wire
/// [`EncryptedMessage`] shape, without performing the encryption itself
/// (callers supply the ciphertext from [`crate::owner::EncryptionProvider`]).
#[must_use]
pub fn to_encrypted(timestamp: Timestamp, ciphertext: Vec<u8>) -> EncryptedMessage {
    EncryptedMessage { timestamp, ciphertext }
}

/// A decoded-but-not-yet-decrypted pairing used once a peer has verified a
/// message decrypts successfully, before it is turned into a [`CrdtMessage`]
/// and applied to history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingApply {
    pub timestamp: Timestamp,
    pub message: CrdtMessage,
}
