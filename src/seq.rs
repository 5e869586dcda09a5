//! Sequence-space arithmetic.
//!
//! Sequence numbers are `u32` counters modulo [`MAX_SEQ`] (2^32). Two
//! sequence numbers are never compared with a plain `<` alone: every test
//! here is phrased relative to the send window `(snd_una, snd_nxt]`, walking
//! forward through the sequence space.
//!
//! ```text
//!  common (snd_una < snd_nxt)          wrapped (snd_nxt < snd_una)
//!  +-----------------------------+     +-----------------------------+
//!  |  |XX|XX|XX|XX|XX|XX|X |  |  |     |XX|  |  |  |  |  |  | X|XX|XX|
//!  +-----------------------------+     +-----------------------------+
//!      ^                  ^                ^                  ^
//!   snd_una            snd_nxt          snd_nxt            snd_una
//! ```

/// Modulus of the sequence space.
pub const MAX_SEQ: u64 = 1 << 32;

/// Whether an inbound `ack` is acceptable for the send window.
///
/// Accepted iff `ack` lies in `(snd_una, snd_nxt]` measured forward through
/// the sequence space, or equals `snd_nxt` (which also covers an empty
/// window).
pub fn ack_acceptable(snd_una: u32, snd_nxt: u32, ack: u32) -> bool {
    (snd_una < snd_nxt && snd_una < ack && ack <= snd_nxt)
        || (snd_nxt < snd_una && (ack > snd_una || ack <= snd_nxt))
        || ack == snd_nxt
}

/// Whether a segment ending at `end` (its expected ACK) is fully covered
/// once `snd_una` has advanced.
///
/// A segment is covered when `end` is at-or-before `snd_una`, i.e. when it
/// does not fall inside the still-outstanding range `(snd_una, snd_nxt]`.
/// An empty window covers everything.
pub fn is_acknowledged(snd_una: u32, snd_nxt: u32, end: u32) -> bool {
    if snd_una < snd_nxt {
        end <= snd_una || end > snd_nxt
    } else if snd_nxt < snd_una {
        end <= snd_una && end > snd_nxt
    } else {
        true
    }
}

/// Bytes sent but not yet acknowledged.
pub fn outstanding(snd_una: u32, snd_nxt: u32) -> u32 {
    if snd_una <= snd_nxt {
        snd_nxt - snd_una
    } else {
        // Wrapped window: the distance to the modulus plus what lies past zero.
        ((MAX_SEQ - u64::from(snd_una)) + u64::from(snd_nxt)) as u32
    }
}
