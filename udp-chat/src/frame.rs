//! Wire-format definitions for transport frames.
//!
//! Every datagram exchanged between peers is a [`Frame`].  This module is
//! responsible for:
//! - Defining the on-wire text layout (kind, sequence number, payload, checksum).
//! - Serialising a [`Frame`] into a byte buffer ready for transmission.
//! - Splitting a raw datagram back into its fields and validating the checksum
//!   before anything downstream trusts them.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! Four `|`-separated fields, in this order:
//!
//! ```text
//!  <kind>|<seq>|<payload>|<checksum>
//!
//!  kind      one of start, data, end, ack
//!  seq       decimal sequence number
//!  payload   raw chunk bytes (empty for start, end and ack)
//!  checksum  decimal CRC-32 over "<kind>|<seq>|<payload>"
//! ```
//!
//! The payload may itself contain `|`: the kind and sequence number are the
//! first two fields and the checksum is everything after the **last** `|`.

use std::fmt;

use crc::{Crc, CRC_32_ISO_HDLC};
use thiserror::Error;

/// Field separator on the wire.
pub const DELIMITER: u8 = b'|';

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

// ---------------------------------------------------------------------------
// FrameKind
// ---------------------------------------------------------------------------

/// The four frame types of the delivery protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Opens a run; carries no payload.
    Start,
    /// One chunk of the application message.
    Data,
    /// Closes a run; its arrival triggers reassembly.
    End,
    /// Acknowledges the frame whose sequence number is `seq - 1`.
    Ack,
}

impl FrameKind {
    /// Wire spelling of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::Start => "start",
            FrameKind::Data => "data",
            FrameKind::End => "end",
            FrameKind::Ack => "ack",
        }
    }

    fn from_wire(field: &[u8]) -> Option<Self> {
        match field {
            b"start" => Some(FrameKind::Start),
            b"data" => Some(FrameKind::Data),
            b"end" => Some(FrameKind::End),
            b"ack" => Some(FrameKind::Ack),
            _ => None,
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// A decoded, checksum-verified transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub seq: u64,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn start(seq: u64) -> Self {
        Self { kind: FrameKind::Start, seq, payload: Vec::new() }
    }

    pub fn data(seq: u64, payload: Vec<u8>) -> Self {
        Self { kind: FrameKind::Data, seq, payload }
    }

    pub fn end(seq: u64) -> Self {
        Self { kind: FrameKind::End, seq, payload: Vec::new() }
    }

    /// Acknowledgement for the frame carrying `acked_seq`.
    ///
    /// The ACK itself carries `acked_seq + 1`.
    pub fn ack_for(acked_seq: u64) -> Self {
        Self { kind: FrameKind::Ack, seq: acked_seq + 1, payload: Vec::new() }
    }

    /// Serialise this frame, appending the checksum.
    pub fn encode(&self) -> Vec<u8> {
        encode(self.kind, self.seq, &self.payload)
    }

    /// Parse and verify a raw datagram.
    ///
    /// Returns [`Err`] if:
    /// - the buffer does not contain the three field separators,
    /// - the checksum does not verify,
    /// - the kind is not one of the four known kinds, or
    /// - the sequence number is not a decimal integer.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        let fields = split_fields(buf)?;
        if !fields.checksum_matches() {
            return Err(FrameError::ChecksumFailed);
        }
        let kind = FrameKind::from_wire(fields.kind).ok_or(FrameError::UnknownKind)?;
        let seq = parse_decimal(fields.seq).ok_or(FrameError::BadSequence)?;
        Ok(Frame { kind, seq, payload: fields.payload.to_vec() })
    }
}

/// Serialise `kind|seq|payload|checksum`.
pub fn encode(kind: FrameKind, seq: u64, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 32);
    buf.extend_from_slice(kind.as_str().as_bytes());
    buf.push(DELIMITER);
    buf.extend_from_slice(seq.to_string().as_bytes());
    buf.push(DELIMITER);
    buf.extend_from_slice(payload);
    let csum = checksum(&buf);
    buf.push(DELIMITER);
    buf.extend_from_slice(csum.to_string().as_bytes());
    buf
}

/// `true` when `buf` splits into four fields and its checksum verifies.
pub fn validate(buf: &[u8]) -> bool {
    split_fields(buf).is_ok_and(|f| f.checksum_matches())
}

/// CRC-32 (ISO-HDLC, the zlib polynomial) over `data`.
pub fn checksum(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

// ---------------------------------------------------------------------------
// RawFields
// ---------------------------------------------------------------------------

/// The four fields of a datagram, borrowed and not yet trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFields<'a> {
    pub kind: &'a [u8],
    pub seq: &'a [u8],
    pub payload: &'a [u8],
    pub checksum: &'a [u8],
    /// `kind|seq|payload`, the span the checksum covers.
    covered: &'a [u8],
}

impl RawFields<'_> {
    fn checksum_matches(&self) -> bool {
        parse_decimal(self.checksum)
            .and_then(|v| u32::try_from(v).ok())
            .is_some_and(|v| v == checksum(self.covered))
    }
}

/// Split a datagram into its fields without checking anything but structure.
pub fn split_fields(buf: &[u8]) -> Result<RawFields<'_>, FrameError> {
    let first = buf.iter().position(|&b| b == DELIMITER).ok_or(FrameError::Malformed)?;
    let second = buf[first + 1..]
        .iter()
        .position(|&b| b == DELIMITER)
        .map(|i| first + 1 + i)
        .ok_or(FrameError::Malformed)?;
    let last = buf.iter().rposition(|&b| b == DELIMITER).ok_or(FrameError::Malformed)?;
    if last <= second {
        return Err(FrameError::Malformed);
    }
    Ok(RawFields {
        kind: &buf[..first],
        seq: &buf[first + 1..second],
        payload: &buf[second + 1..last],
        checksum: &buf[last + 1..],
        covered: &buf[..last],
    })
}

fn parse_decimal(field: &[u8]) -> Option<u64> {
    if field.is_empty() || !field.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(field).ok()?.parse().ok()
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("datagram does not contain four delimited fields")]
    Malformed,
    #[error("unknown frame kind")]
    UnknownKind,
    #[error("sequence number is not a decimal integer")]
    BadSequence,
    #[error("checksum verification failed")]
    ChecksumFailed,
}
