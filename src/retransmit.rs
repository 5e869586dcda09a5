//! Retransmission queue.
//!
//! [`RetransmitQueue`] holds every segment that has been sent but not yet
//! acknowledged, including SYN and FIN, ordered by ascending sequence
//! number.
//!
//! # Contract
//!
//! - Entries are appended in send order, so the queue is always sorted by
//!   `seq` within the current window.
//! - ACKs are **cumulative**: once `snd_una` advances, fully covered
//!   entries form a prefix of the queue and are trimmed from the front,
//!   stopping at the first still-outstanding entry.
//! - On timeout the connection resends **every** queued entry in order.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::VecDeque;

use crate::packet::Packet;
use crate::seq;

// ---------------------------------------------------------------------------
// Unacked
// ---------------------------------------------------------------------------

/// A single in-flight segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unacked {
    /// The segment exactly as first transmitted.
    pub packet: Packet,
    /// Sequence-space length (payload bytes, plus one for SYN or FIN).
    pub len: u32,
    /// Total number of times this segment has been transmitted.
    pub tx_count: u32,
}

impl Unacked {
    /// The ACK number that fully covers this segment.
    pub fn expected_ack(&self) -> u32 {
        self.packet.header.seq.wrapping_add(self.len)
    }
}

// ---------------------------------------------------------------------------
// RetransmitQueue
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RetransmitQueue {
    entries: VecDeque<Unacked>,
}

impl RetransmitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a just-transmitted segment occupying `len` sequence numbers.
    pub fn push(&mut self, packet: Packet, len: u32) {
        debug_assert!(len > 0, "segments without sequence space are never queued");
        self.entries.push_back(Unacked {
            packet,
            len,
            tx_count: 1,
        });
    }

    /// Drop the prefix of entries covered by `snd_una`.
    ///
    /// Returns the number of entries removed.
    pub fn trim(&mut self, snd_una: u32, snd_nxt: u32) -> usize {
        let mut trimmed = 0;
        while let Some(front) = self.entries.front() {
            if !seq::is_acknowledged(snd_una, snd_nxt, front.expected_ack()) {
                break;
            }
            self.entries.pop_front();
            trimmed += 1;
        }
        trimmed
    }

    /// Iterate over in-flight segments from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Unacked> {
        self.entries.iter()
    }

    /// Bump the transmission count of every entry and return them in order,
    /// ready to be resent.
    pub fn retransmit_all(&mut self) -> impl Iterator<Item = &Unacked> {
        for entry in self.entries.iter_mut() {
            entry.tx_count += 1;
        }
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
