//! Connection finite-state machine (FSM) types.
//!
//! This module defines every state a [`crate::connection::Connection`] can
//! occupy. Transitions live in [`crate::connection`].

use std::fmt;

/// All possible states of the connection FSM.
///
/// ```text
///  client                                   server
///  SYN_SENT ──SYN+ACK──▶ ESTABLISHED        LISTEN ──SYN──▶ SYN_RECEIVED
///                           │                                   │ ACK
///         close, unacked ◀──┤                                   ▼
///          ACK_ALL          │ close, idle          ESTABLISHED ──FIN──▶ LAST_ACK
///             │ all ACKed   ▼                                            │ ACK
///             └──────▶ FIN_WAIT ──ACK──▶ TIME_WAIT ──2s──▶ CLOSED ◀──────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Server waiting for a SYN.
    Listen,
    /// SYN sent; waiting for SYN+ACK.
    SynSent,
    /// SYN received, SYN+ACK sent; waiting for the handshake ACK.
    SynReceived,
    /// Handshake complete; data transfer in progress.
    Established,
    /// Local close requested; waiting for every outstanding segment to be
    /// acknowledged before sending FIN.
    AckAll,
    /// FIN sent; waiting for it to be acknowledged.
    FinWait,
    /// Peer's FIN acknowledged and our FIN sent; waiting for the final ACK.
    LastAck,
    /// Re-acknowledging duplicate FINs until the hold timer expires.
    TimeWait,
    /// Terminal. Nothing is sent or received.
    Closed,
}

impl ConnectionState {
    /// `true` once the peer has echoed our connection id, so inbound
    /// segments must carry it.
    pub fn checks_conn_id(self) -> bool {
        !matches!(self, Self::Listen | Self::SynSent)
    }

    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Listen => "LISTEN",
            Self::SynSent => "SYN_SENT",
            Self::SynReceived => "SYN_RECEIVED",
            Self::Established => "ESTABLISHED",
            Self::AckAll => "ACK_ALL",
            Self::FinWait => "FIN_WAIT",
            Self::LastAck => "LAST_ACK",
            Self::TimeWait => "TIME_WAIT",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}
