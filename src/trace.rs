//! Per-segment wire trace.
//!
//! Every segment the engine sends, accepts or drops is reported as one line
//! on the `cfp::trace` log target:
//!
//! ```text
//! SEND 12345 0 0 512 10000 SYN
//! RECV 4321 12346 1 512 10000 ACK SYN
//! DROP 12858 4322 1 1024 10000 ACK
//! SEND 12346 4322 1 512 256 ACK DUP
//! ```
//!
//! Fields: event, seq, ack, conn_id, cwnd, ssthresh, flag names, and `DUP`
//! for retransmissions and re-sent ACKs.

use std::fmt;

use crate::packet::Header;

pub const TARGET: &str = "cfp::trace";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Send,
    Recv,
    Drop,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Event::Send => "SEND",
            Event::Recv => "RECV",
            Event::Drop => "DROP",
        })
    }
}

/// Format one trace line.
pub fn line(event: Event, header: &Header, cwnd: u32, ssthresh: u32, dup: bool) -> String {
    let mut flags = String::new();
    for (set, name) in [
        (header.is_ack(), " ACK"),
        (header.is_syn(), " SYN"),
        (header.is_fin(), " FIN"),
        (dup, " DUP"),
    ] {
        if set {
            flags.push_str(name);
        }
    }
    format!(
        "{event} {} {} {} {cwnd} {ssthresh}{flags}",
        header.seq, header.ack, header.conn_id
    )
}

/// Emit a trace line if the trace target is enabled.
pub fn report(event: Event, header: &Header, cwnd: u32, ssthresh: u32, dup: bool) {
    if log::log_enabled!(target: TARGET, log::Level::Info) {
        log::info!(target: TARGET, "{}", line(event, header, cwnd, ssthresh, dup));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::flags;

    #[test]
    fn syn_line() {
        let h = Header {
            seq: 12345,
            ack: 0,
            conn_id: 0,
            flags: flags::SYN,
        };
        assert_eq!(line(Event::Send, &h, 512, 10000, false), "SEND 12345 0 0 512 10000 SYN");
    }

    #[test]
    fn retransmission_is_marked_dup() {
        let h = Header {
            seq: 12346,
            ack: 4322,
            conn_id: 1,
            flags: flags::ACK,
        };
        assert_eq!(
            line(Event::Send, &h, 512, 256, true),
            "SEND 12346 4322 1 512 256 ACK DUP"
        );
    }

    #[test]
    fn flags_are_listed_in_wire_order() {
        let h = Header {
            seq: 1,
            ack: 2,
            conn_id: 3,
            flags: flags::FIN | flags::SYN | flags::ACK,
        };
        assert_eq!(line(Event::Drop, &h, 0, 0, false), "DROP 1 2 3 0 0 ACK SYN FIN");
    }
}
