//! Crate-wide error type.
//!
//! Per-segment problems (malformed headers, wrong connection id,
//! out-of-order data) are never surfaced here: the engine logs and drops
//! them. What remains are failures the caller has to act on, chiefly
//! transport I/O, which is fatal to the whole process.

use std::net::{SocketAddr, SocketAddrV4};

use thiserror::Error;

use crate::mux::ConnKey;
use crate::packet::{PacketError, MAX_PAYLOAD};
use crate::state::ConnectionState;

/// Result type alias for CFP operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A datagram could not be parsed.
    #[error("malformed segment: {0}")]
    Packet(#[from] PacketError),

    /// Socket or byte-sink I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Only IPv4 peers are supported.
    #[error("unsupported address family for {0}: only IPv4 is supported")]
    UnsupportedAddress(SocketAddr),

    #[error("peer {0} is already bound to a connection")]
    PeerInUse(SocketAddrV4),

    #[error("connection {0} is already registered")]
    KeyInUse(ConnKey),

    #[error("no peer registered for connection {0}")]
    UnknownConnection(ConnKey),

    /// The requested operation is not allowed in the connection's state.
    #[error("operation not permitted in state {0}")]
    InvalidState(ConnectionState),

    #[error("payload of {0} bytes exceeds the {}-byte segment limit", MAX_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("could not resolve {0} to an IPv4 address")]
    Resolve(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// The peer went silent and the connection was closed abruptly.
    #[error("connection timed out")]
    TimedOut,
}

impl Error {
    /// `true` for errors that end the process rather than one connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Resolve(_) | Error::Config(_))
    }
}
