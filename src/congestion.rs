//! Byte-counted congestion window.
//!
//! Growth happens on every accepted ACK: additive slow start (`+512`) below
//! `ssthresh`, then congestion avoidance (`+512²/cwnd`). The cap applies in
//! both phases. Loss is only ever inferred from a retransmission timeout,
//! which halves `ssthresh` and resets the window to its initial size.

use crate::config::Config;
use crate::packet::MAX_PAYLOAD;

const SEGMENT: u32 = MAX_PAYLOAD as u32;

#[derive(Debug, Clone)]
pub struct Congestion {
    cwnd: u32,
    ssthresh: u32,
    initial: u32,
    cap: u32,
}

impl Congestion {
    pub fn new(config: &Config) -> Self {
        Self {
            cwnd: config.initial_cwnd,
            ssthresh: config.initial_ssthresh,
            initial: config.initial_cwnd,
            cap: config.cwnd_cap,
        }
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    /// `true` while the window grows by a full segment per ACK.
    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    /// Whether `len` more bytes fit on top of `outstanding` in-flight bytes.
    pub fn admits(&self, outstanding: u32, len: usize) -> bool {
        u64::from(outstanding) + len as u64 <= u64::from(self.cwnd)
    }

    /// Grow the window for one accepted ACK.
    pub fn on_ack(&mut self) {
        let grown = if self.in_slow_start() {
            self.cwnd.saturating_add(SEGMENT)
        } else {
            self.cwnd + (SEGMENT * SEGMENT) / self.cwnd.max(1)
        };
        self.cwnd = grown.min(self.cap);
    }

    /// Multiplicative decrease after a retransmission timeout.
    pub fn on_timeout(&mut self) {
        self.ssthresh = self.cwnd / 2;
        self.cwnd = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> Congestion {
        Congestion::new(&Config::default())
    }

    #[test]
    fn starts_at_one_segment() {
        let cc = controller();
        assert_eq!(cc.cwnd(), 512);
        assert_eq!(cc.ssthresh(), 10_000);
        assert!(cc.in_slow_start());
    }

    #[test]
    fn slow_start_grows_by_a_segment() {
        let mut cc = controller();
        cc.on_ack();
        assert_eq!(cc.cwnd(), 1024);
        cc.on_ack();
        assert_eq!(cc.cwnd(), 1536);
    }

    #[test]
    fn congestion_avoidance_grows_sub_linearly() {
        let mut cc = controller();
        while cc.in_slow_start() {
            cc.on_ack();
        }
        // Slow start overshoots 10_000 to 10_240.
        assert_eq!(cc.cwnd(), 10_240);
        cc.on_ack();
        assert_eq!(cc.cwnd(), 10_240 + 512 * 512 / 10_240);
    }

    #[test]
    fn window_never_exceeds_cap() {
        let mut cc = controller();
        for _ in 0..100_000 {
            cc.on_ack();
            assert!(cc.cwnd() <= 51_200);
        }
        assert_eq!(cc.cwnd(), 51_200);
    }

    #[test]
    fn cap_applies_during_slow_start() {
        let config = Config {
            initial_ssthresh: u32::MAX,
            cwnd_cap: 2048,
            ..Config::default()
        };
        let mut cc = Congestion::new(&config);
        for _ in 0..10 {
            cc.on_ack();
        }
        assert_eq!(cc.cwnd(), 2048);
    }

    #[test]
    fn timeout_halves_threshold_and_resets_window() {
        let mut cc = controller();
        for _ in 0..5 {
            cc.on_ack();
        }
        let before = cc.cwnd();
        cc.on_timeout();
        assert_eq!(cc.ssthresh(), before / 2);
        assert_eq!(cc.cwnd(), 512);
    }

    #[test]
    fn admission_counts_outstanding_bytes() {
        let cc = controller();
        assert!(cc.admits(0, 512));
        assert!(!cc.admits(1, 512));
        assert!(cc.admits(500, 12));
        assert!(!cc.admits(u32::MAX, 1));
    }
}
