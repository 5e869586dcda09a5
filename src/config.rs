//! Tunable protocol parameters.
//!
//! The defaults reproduce the reference deployment: fixed 500 ms RTO, a
//! 2 s TIME_WAIT hold, a 10 s idle timeout and a byte-counted congestion
//! window that starts at one segment.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::packet::MAX_PAYLOAD;

/// Default client initial sequence number.
pub const CLIENT_ISN: u32 = 12345;
/// Default server initial sequence number.
pub const SERVER_ISN: u32 = 4321;

/// Per-connection protocol configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Fixed retransmission timeout.
    pub rto: Duration,
    /// How long TIME_WAIT absorbs duplicate FINs before closing.
    pub time_wait: Duration,
    /// Silence after which a connection is torn down abruptly.
    pub idle_timeout: Duration,
    /// Congestion window at start and after every retransmission timeout.
    pub initial_cwnd: u32,
    /// Slow-start threshold at connection start.
    pub initial_ssthresh: u32,
    /// Upper bound on the congestion window.
    pub cwnd_cap: u32,
    /// ISN used by the active (client) side.
    pub client_isn: u32,
    /// ISN used by the passive (server) side.
    pub server_isn: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rto: Duration::from_millis(500),
            time_wait: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(10),
            initial_cwnd: MAX_PAYLOAD as u32,
            initial_ssthresh: 10_000,
            cwnd_cap: 51_200,
            client_isn: CLIENT_ISN,
            server_isn: SERVER_ISN,
        }
    }
}

impl Config {
    /// Replace both ISNs with random values.
    pub fn with_random_isn(mut self) -> Self {
        self.client_isn = rand::random();
        self.server_isn = rand::random();
        self
    }

    /// Reject configurations under which the engine could never make progress.
    pub fn validate(&self) -> Result<()> {
        if self.rto.is_zero() || self.time_wait.is_zero() || self.idle_timeout.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".into()));
        }
        if (self.initial_cwnd as usize) < MAX_PAYLOAD {
            return Err(Error::Config(format!(
                "initial_cwnd {} cannot admit a full {MAX_PAYLOAD}-byte segment",
                self.initial_cwnd
            )));
        }
        if self.cwnd_cap < self.initial_cwnd {
            return Err(Error::Config(format!(
                "cwnd_cap {} is below initial_cwnd {}",
                self.cwnd_cap, self.initial_cwnd
            )));
        }
        Ok(())
    }
}
