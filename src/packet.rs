//! Wire-format definitions for CFP segments.
//!
//! Every datagram exchanged between peers is a [`Packet`]: a fixed 12-byte
//! [`Header`] followed by at most [`MAX_PAYLOAD`] bytes of stream data.
//! This module only converts between the in-memory types and network byte
//! order; it performs no I/O and holds no connection state.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Connection ID         |     Reserved (0)        |F|S|A|
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 12 bytes.
//! seq(4) + ack(4) + conn_id(2) + flags(2)
//!
//! The payload length is implied by the datagram length, so there is no
//! length field and no checksum (UDP already carries one).

use std::fmt;

use thiserror::Error;

/// Bit-flag constants for the `flags` header field.
///
/// Flags are plain masks over a `u16` so the layout never depends on how a
/// compiler packs bit-fields.
pub mod flags {
    /// Acknowledgement field is valid.
    pub const ACK: u16 = 1 << 0;
    /// Synchronise sequence numbers (handshake).
    pub const SYN: u16 = 1 << 1;
    /// Finish: sender has no more data to send.
    pub const FIN: u16 = 1 << 2;

    /// Every bit the protocol defines; the rest must be zero.
    pub const ALL: u16 = ACK | SYN | FIN;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 12;

/// Largest payload a single segment may carry.
pub const MAX_PAYLOAD: usize = 512;

/// Largest datagram the protocol ever puts on the wire.
pub const MAX_DATAGRAM: usize = HEADER_LEN + MAX_PAYLOAD;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 4;
const OFF_CONN: usize = 8;
const OFF_FLAGS: usize = 10;

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Fixed-size protocol header.
///
/// Fields are in host byte order; [`Header::encode`] converts to big-endian
/// on the wire and [`Header::decode`] converts back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    /// Sequence number of the first payload byte, or of the SYN/FIN bit for
    /// control-only segments.
    pub seq: u32,
    /// Next sequence number expected from the peer (valid iff `ACK` is set).
    pub ack: u32,
    /// Connection identifier chosen by the server during the handshake.
    pub conn_id: u16,
    /// Bitmask of [`flags`] constants.
    pub flags: u16,
}

impl Header {
    /// `true` if every bit in `mask` is set.
    #[inline]
    pub fn has(&self, mask: u16) -> bool {
        self.flags & mask == mask
    }

    pub fn is_ack(&self) -> bool {
        self.has(flags::ACK)
    }

    pub fn is_syn(&self) -> bool {
        self.has(flags::SYN)
    }

    pub fn is_fin(&self) -> bool {
        self.has(flags::FIN)
    }

    /// Serialise the header into its 12-byte network representation.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.ack.to_be_bytes());
        buf[OFF_CONN..OFF_CONN + 2].copy_from_slice(&self.conn_id.to_be_bytes());
        buf[OFF_FLAGS..OFF_FLAGS + 2].copy_from_slice(&self.flags.to_be_bytes());
        buf
    }

    /// Parse a header from the first [`HEADER_LEN`] bytes of `buf`.
    ///
    /// Returns [`PacketError::MalformedHeader`] when fewer than 12 bytes are
    /// supplied and [`PacketError::ReservedFlags`] when any reserved flag bit
    /// is set.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::MalformedHeader { len: buf.len() });
        }

        let header = Header {
            seq: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            ack: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            conn_id: u16::from_be_bytes([buf[OFF_CONN], buf[OFF_CONN + 1]]),
            flags: u16::from_be_bytes([buf[OFF_FLAGS], buf[OFF_FLAGS + 1]]),
        };

        if header.flags & !flags::ALL != 0 {
            return Err(PacketError::ReservedFlags(header.flags));
        }
        Ok(header)
    }
}

impl fmt::Display for Header {
    /// `<seq> <ack> <conn_id>` followed by the set flag names.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.seq, self.ack, self.conn_id)?;
        for (mask, name) in [(flags::ACK, "ACK"), (flags::SYN, "SYN"), (flags::FIN, "FIN")] {
            if self.has(mask) {
                write!(f, " {name}")?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(header: Header, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// Number of sequence numbers this segment occupies.
    ///
    /// Payload bytes count one each; SYN and FIN each consume exactly one
    /// unit of sequence space.
    pub fn seq_len(&self) -> u32 {
        let mut len = self.payload.len() as u32;
        if self.header.is_syn() {
            len += 1;
        }
        if self.header.is_fin() {
            len += 1;
        }
        len
    }

    /// Serialise this packet into a newly allocated datagram.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a [`Packet`] from a raw datagram.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - a reserved flag bit is set, or
    /// - the payload is longer than [`MAX_PAYLOAD`].
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        let header = Header::decode(buf)?;
        let payload = &buf[HEADER_LEN..];
        if payload.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge(payload.len()));
        }
        Ok(Packet {
            header,
            payload: payload.to_vec(),
        })
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("malformed header: {len} bytes, need at least {}", HEADER_LEN)]
    MalformedHeader { len: usize },
    /// One of the reserved flag bits (3-15) is set.
    #[error("reserved flag bits set: {0:#06x}")]
    ReservedFlags(u16),
    /// Payload exceeds [`MAX_PAYLOAD`].
    #[error("payload of {0} bytes exceeds the {}-byte limit", MAX_PAYLOAD)]
    PayloadTooLarge(usize),
}
