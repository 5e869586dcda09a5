//! `cfp`: a TCP-like reliable, ordered, congestion-controlled byte stream
//! carried over UDP datagrams.
//!
//! # Architecture
//!
//! ```text
//!   Client / Server            (roles: byte source, sink factory, CLI glue)
//!        │
//!   ┌────▼──────────────────────────────────────────────┐
//!   │ Session     owns connections by ConnKey, waits on │
//!   │             socket readability + earliest timer   │
//!   └────┬────────────────────────────┬─────────────────┘
//!        │ on_datagram / timers       │ register / deliver / transmit
//!   ┌────▼───────┐  Transmit     ┌────▼───────┐
//!   │ Connection │──────────────▶│    Mux     │  peer ↔ ConnKey
//!   │  (engine)  │               └────┬───────┘
//!   └────┬───────┘                    │ send_to
//!        │ in-order bytes        ┌────▼───────┐
//!        ▼                       │   Socket   │  tokio UdpSocket
//!     ByteSink                   └────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]     : wire format (12-byte header + payload)
//! - [`seq`]        : wraparound-aware sequence arithmetic
//! - [`congestion`] : slow start, congestion avoidance, timeout cutback
//! - [`retransmit`] : queue of sent-but-unacknowledged segments
//! - [`timer`]      : retransmission and idle deadlines
//! - [`state`]      : connection state machine states
//! - [`connection`] : the per-connection protocol engine
//! - [`mux`]        : one UDP socket shared by many connections
//! - [`session`]    : event loop core and connection ownership
//! - [`server`] / [`client`]: the two roles on top of a session
//! - [`socket`]     : async UDP socket and IPv4 resolution
//! - [`sink`]       : where received bytes go
//! - [`trace`]      : per-segment SEND / RECV / DROP log lines
//! - [`config`]     : tunable parameters
//! - [`error`]      : crate-wide error type

pub mod client;
pub mod config;
pub mod congestion;
pub mod connection;
pub mod error;
pub mod mux;
pub mod packet;
pub mod retransmit;
pub mod seq;
pub mod server;
pub mod session;
pub mod sink;
pub mod socket;
pub mod state;
pub mod timer;
pub mod trace;

pub use config::Config;
pub use connection::{Closure, Connection, Outcome, SendStatus, Transmit};
pub use error::{Error, Result};
pub use state::ConnectionState;
