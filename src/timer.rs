//! Retransmission and idle timers.
//!
//! Every connection owns two independent one-shot countdowns:
//! - the **retransmission** timer, re-armed whenever a segment enters the
//!   retransmission queue and fired when no ACK arrived within the RTO;
//! - the **idle** timer, re-armed on inbound traffic, whose expiry tears the
//!   connection down (or completes TIME_WAIT).
//!
//! A [`Timer`] is only a deadline. It owns no task and no OS resource; the
//! session driver asks each connection for its earliest deadline and sleeps
//! on it with `tokio::time::sleep_until`. Re-arming replaces the previous
//! deadline, cancelling disarms it.

use std::time::Duration;

use tokio::time::Instant;

/// Which of a connection's two timers fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Retransmit,
    Idle,
}

/// A one-shot countdown.
#[derive(Debug, Clone, Default)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer to fire `timeout` from now, replacing any pending deadline.
    pub fn arm(&mut self, timeout: Duration) {
        self.deadline = Some(Instant::now() + timeout);
    }

    /// Disarm the timer. Cancelling an idle timer is a no-op.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `true` if the timer is armed and its deadline is at or before `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_timer_is_disarmed() {
        let t = Timer::new();
        assert!(!t.is_armed());
        assert!(!t.is_expired(Instant::now()));
    }

    #[test]
    fn arm_sets_future_deadline() {
        let mut t = Timer::new();
        let before = Instant::now();
        t.arm(Duration::from_millis(500));
        let at = t.deadline().unwrap();
        assert!(at >= before + Duration::from_millis(500));
        assert!(!t.is_expired(before));
        assert!(t.is_expired(at));
    }

    #[test]
    fn rearm_replaces_deadline() {
        let mut t = Timer::new();
        t.arm(Duration::from_secs(10));
        let first = t.deadline().unwrap();
        t.arm(Duration::from_secs(2));
        assert!(t.deadline().unwrap() < first);
    }

    #[test]
    fn cancel_disarms() {
        let mut t = Timer::new();
        t.arm(Duration::from_millis(1));
        t.cancel();
        assert!(!t.is_armed());
        assert!(!t.is_expired(Instant::now() + Duration::from_secs(1)));
    }
}
