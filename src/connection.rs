//! Per-connection protocol engine.
//!
//! A [`Connection`] owns the complete state of one byte stream: the state
//! machine, sequence and acknowledgement counters, congestion window,
//! retransmission queue, both timers and the byte sink. It performs no I/O
//! of its own. Every entry point is synchronous and takes a [`Transmit`]
//! handle through which outbound datagrams leave, so the same engine runs
//! behind the shared UDP socket or inside a test harness.
//!
//! ```text
//!              on_datagram ─┐
//!   on_retransmit_timeout ──┤      ┌──────────────┐   Transmit
//!         on_idle_timeout ──┼────▶ │  Connection  │ ───────────▶ peer
//!            send / close ──┘      └──────┬───────┘
//!                                         │ in-order bytes
//!                                         ▼
//!                                      ByteSink
//! ```
//!
//! # State machine
//!
//! ```text
//!  server:  LISTEN ──SYN──▶ SYN_RECEIVED ──ACK──▶ ESTABLISHED ──FIN──▶ LAST_ACK ──ACK──▶ CLOSED
//!  client:  SYN_SENT ──SYN+ACK──▶ ESTABLISHED ──close()──▶ ACK_ALL ──drained──▶ FIN_WAIT
//!           FIN_WAIT ──ACK──▶ TIME_WAIT ──wait timer──▶ CLOSED
//! ```
//!
//! Any state other than `CLOSED`, `TIME_WAIT` and `LISTEN` moves straight to
//! `CLOSED` when the idle timer fires, reported as an abrupt closure.

use std::fmt;

use tokio::time::Instant;

use crate::config::Config;
use crate::congestion::Congestion;
use crate::error::{Error, Result};
use crate::packet::{flags, Header, Packet, MAX_PAYLOAD};
use crate::retransmit::RetransmitQueue;
use crate::seq;
use crate::sink::{ByteSink, NullSink};
use crate::state::ConnectionState;
use crate::timer::{Timer, TimerKind};
use crate::trace::{self, Event};

/// Outbound path of a connection.
pub trait Transmit {
    /// Hand one encoded datagram to the transport.
    fn transmit(&mut self, datagram: &[u8]) -> Result<()>;
}

/// Collects datagrams in memory.
impl Transmit for Vec<Vec<u8>> {
    fn transmit(&mut self, datagram: &[u8]) -> Result<()> {
        self.push(datagram.to_vec());
        Ok(())
    }
}

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Closure {
    /// Both FINs were exchanged and acknowledged.
    Graceful,
    /// The peer went silent; the byte sink carries an error record.
    Abrupt { reason: String },
}

impl Closure {
    pub fn is_graceful(&self) -> bool {
        matches!(self, Closure::Graceful)
    }
}

impl fmt::Display for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Closure::Graceful => f.write_str("graceful"),
            Closure::Abrupt { reason } => write!(f, "abrupt ({reason})"),
        }
    }
}

/// Result of one engine entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// The connection reached `CLOSED` and should be reclaimed.
    Closed(Closure),
}

/// Result of [`Connection::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    /// The congestion window has no room; retry after the next ACK.
    WindowFull,
}

pub struct Connection {
    state: ConnectionState,
    conn_id: u16,

    snd_nxt: u32,
    snd_una: u32,
    rcv_nxt: u32,

    congestion: Congestion,
    queue: RetransmitQueue,

    rto_timer: Timer,
    idle_timer: Timer,

    sink: Box<dyn ByteSink>,
    /// Carried on the handshake-completing ACK (client only).
    first_payload: Option<Vec<u8>>,
    config: Config,
}

impl Connection {
    fn new(
        config: Config,
        state: ConnectionState,
        conn_id: u16,
        isn: u32,
        sink: Box<dyn ByteSink>,
    ) -> Self {
        Self {
            state,
            conn_id,
            snd_nxt: isn,
            snd_una: isn,
            rcv_nxt: 0,
            congestion: Congestion::new(&config),
            queue: RetransmitQueue::new(),
            rto_timer: Timer::new(),
            idle_timer: Timer::new(),
            sink,
            first_payload: None,
            config,
        }
    }

    /// Passive open: a server-side connection waiting for a SYN.
    ///
    /// `conn_id` is the identifier this side will hand to the peer in its
    /// SYN+ACK; in-order bytes go to `sink`.
    pub fn listen(config: Config, conn_id: u16, sink: Box<dyn ByteSink>) -> Self {
        Self::new(
            config,
            ConnectionState::Listen,
            conn_id,
            config.server_isn,
            sink,
        )
    }

    /// Active open: send a SYN and enter `SYN_SENT`.
    ///
    /// `first_payload` rides on the ACK that completes the handshake and may
    /// be empty.
    pub fn connect(
        config: Config,
        first_payload: Vec<u8>,
        tx: &mut impl Transmit,
    ) -> Result<Self> {
        if first_payload.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge(first_payload.len()));
        }
        let mut conn = Self::new(
            config,
            ConnectionState::SynSent,
            0,
            config.client_isn,
            Box::new(NullSink),
        );
        conn.first_payload = Some(first_payload);
        conn.transmit_segment(flags::SYN, Vec::new(), tx)?;
        conn.idle_timer.arm(config.idle_timeout);
        log::debug!("SYN sent, isn {}", config.client_isn);
        Ok(conn)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn conn_id(&self) -> u16 {
        self.conn_id
    }

    pub fn snd_nxt(&self) -> u32 {
        self.snd_nxt
    }

    pub fn snd_una(&self) -> u32 {
        self.snd_una
    }

    pub fn rcv_nxt(&self) -> u32 {
        self.rcv_nxt
    }

    pub fn cwnd(&self) -> u32 {
        self.congestion.cwnd()
    }

    pub fn ssthresh(&self) -> u32 {
        self.congestion.ssthresh()
    }

    /// Segments sent but not yet acknowledged, oldest first.
    pub fn unacked(&self) -> &RetransmitQueue {
        &self.queue
    }

    /// Sequence numbers sent but not yet acknowledged.
    pub fn outstanding(&self) -> u32 {
        seq::outstanding(self.snd_una, self.snd_nxt)
    }

    pub fn rto_deadline(&self) -> Option<Instant> {
        self.rto_timer.deadline()
    }

    pub fn idle_deadline(&self) -> Option<Instant> {
        self.idle_timer.deadline()
    }

    /// The earliest armed timer, if any.
    pub fn next_deadline(&self) -> Option<(Instant, TimerKind)> {
        let rto = self.rto_timer.deadline().map(|at| (at, TimerKind::Retransmit));
        let idle = self.idle_timer.deadline().map(|at| (at, TimerKind::Idle));
        match (rto, idle) {
            (Some(a), Some(b)) => Some(if b.0 < a.0 { b } else { a }),
            (a, b) => a.or(b),
        }
    }

    /// Whether the timer of `kind` is armed and due at `now`.
    pub fn is_due(&self, kind: TimerKind, now: Instant) -> bool {
        match kind {
            TimerKind::Retransmit => self.rto_timer.is_expired(now),
            TimerKind::Idle => self.idle_timer.is_expired(now),
        }
    }

    // -----------------------------------------------------------------------
    // Application entry points
    // -----------------------------------------------------------------------

    /// Send one segment of stream data.
    ///
    /// Only allowed in `ESTABLISHED`. Returns [`SendStatus::WindowFull`]
    /// without sending anything when the segment does not fit in the
    /// congestion window.
    pub fn send(&mut self, payload: &[u8], tx: &mut impl Transmit) -> Result<SendStatus> {
        if self.state != ConnectionState::Established {
            return Err(Error::InvalidState(self.state));
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge(payload.len()));
        }
        if payload.is_empty() {
            return Ok(SendStatus::Sent);
        }
        if !self.congestion.admits(self.outstanding(), payload.len()) {
            return Ok(SendStatus::WindowFull);
        }
        self.transmit_segment(flags::ACK, payload.to_vec(), tx)?;
        Ok(SendStatus::Sent)
    }

    /// Begin an orderly close.
    ///
    /// With nothing outstanding the FIN goes out at once; otherwise the
    /// connection waits in `ACK_ALL` until every sent byte is acknowledged.
    /// Calling `close` on a connection that is already closing is a no-op.
    pub fn close(&mut self, tx: &mut impl Transmit) -> Result<()> {
        match self.state {
            ConnectionState::Established => {
                if self.snd_una == self.snd_nxt {
                    self.send_fin(tx)?;
                    self.state = ConnectionState::FinWait;
                } else {
                    log::debug!(
                        "conn {}: close deferred, {} bytes outstanding",
                        self.conn_id,
                        self.outstanding()
                    );
                    self.state = ConnectionState::AckAll;
                }
                Ok(())
            }
            ConnectionState::AckAll
            | ConnectionState::FinWait
            | ConnectionState::LastAck
            | ConnectionState::TimeWait
            | ConnectionState::Closed => Ok(()),
            state => Err(Error::InvalidState(state)),
        }
    }

    /// Disarm both timers. Called before the connection is dropped.
    pub fn release(&mut self) {
        self.rto_timer.cancel();
        self.idle_timer.cancel();
    }

    // -----------------------------------------------------------------------
    // Event entry points
    // -----------------------------------------------------------------------

    /// Process one inbound datagram from the peer.
    ///
    /// Malformed segments and segments for another connection id are dropped
    /// without touching any state. Protocol violations are dropped and, where
    /// ordered delivery is in progress, answered with the current cumulative
    /// ACK. Only transport or sink failures produce an `Err`.
    pub fn on_datagram(&mut self, datagram: &[u8], tx: &mut impl Transmit) -> Result<Outcome> {
        let packet = match Packet::decode(datagram) {
            Ok(packet) => packet,
            Err(err) => {
                log::debug!("conn {}: dropping datagram: {err}", self.conn_id);
                return Ok(Outcome::Continue);
            }
        };
        let header = packet.header;

        if self.state.is_closed() {
            self.report(Event::Drop, &header);
            return Ok(Outcome::Continue);
        }
        if self.state.checks_conn_id() && header.conn_id != self.conn_id {
            log::debug!(
                "conn {}: dropping segment for conn {}",
                self.conn_id,
                header.conn_id
            );
            self.report(Event::Drop, &header);
            return Ok(Outcome::Continue);
        }

        let before = self.state;
        let outcome = match self.state {
            ConnectionState::Listen => self.on_listen(packet, tx)?,
            ConnectionState::SynSent => self.on_syn_sent(packet, tx)?,
            ConnectionState::SynReceived => self.on_syn_received(packet, tx)?,
            ConnectionState::Established | ConnectionState::AckAll => {
                self.on_open(packet, tx)?
            }
            ConnectionState::FinWait => self.on_fin_wait(packet, tx)?,
            ConnectionState::LastAck => self.on_last_ack(packet, tx)?,
            ConnectionState::TimeWait => self.on_time_wait(packet, tx)?,
            ConnectionState::Closed => Outcome::Continue,
        };

        if before != ConnectionState::TimeWait
            && !matches!(
                self.state,
                ConnectionState::Listen | ConnectionState::TimeWait | ConnectionState::Closed
            )
        {
            self.idle_timer.arm(self.config.idle_timeout);
        }
        if before != self.state {
            log::debug!("conn {}: {before} -> {}", self.conn_id, self.state);
        }
        Ok(outcome)
    }

    /// The retransmission timer fired: resend the whole queue in order, cut
    /// the window back and re-arm.
    ///
    /// A fire with nothing outstanding is stale and changes nothing.
    pub fn on_retransmit_timeout(&mut self, tx: &mut impl Transmit) -> Result<Outcome> {
        self.rto_timer.cancel();
        if self.queue.is_empty() || self.state.is_closed() {
            log::debug!("conn {}: stale retransmission timeout", self.conn_id);
            return Ok(Outcome::Continue);
        }

        let (cwnd, ssthresh) = (self.congestion.cwnd(), self.congestion.ssthresh());
        let mut resent = 0usize;
        for entry in self.queue.retransmit_all() {
            tx.transmit(&entry.packet.encode())?;
            trace::report(Event::Send, &entry.packet.header, cwnd, ssthresh, true);
            resent += 1;
        }
        self.congestion.on_timeout();
        self.rto_timer.arm(self.config.rto);

        log::debug!(
            "conn {}: timeout, resent {resent} segment(s), cwnd {} ssthresh {}",
            self.conn_id,
            self.congestion.cwnd(),
            self.congestion.ssthresh()
        );
        Ok(Outcome::Continue)
    }

    /// The idle timer fired.
    ///
    /// In `TIME_WAIT` this is the end of the wait and the closure is
    /// graceful. Anywhere else the peer is presumed gone: the sink is
    /// aborted and the closure is abrupt.
    pub fn on_idle_timeout(&mut self) -> Result<Outcome> {
        self.idle_timer.cancel();
        match self.state {
            ConnectionState::Closed => Ok(Outcome::Continue),
            ConnectionState::TimeWait => {
                self.state = ConnectionState::Closed;
                self.release();
                self.sink.finish()?;
                log::info!("conn {}: closed", self.conn_id);
                Ok(Outcome::Closed(Closure::Graceful))
            }
            state => {
                self.state = ConnectionState::Closed;
                self.release();
                self.queue.clear();
                self.sink.abort()?;
                log::warn!("conn {}: timed out in {state}", self.conn_id);
                Ok(Outcome::Closed(Closure::Abrupt {
                    reason: "connection timed out".into(),
                }))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Per-state handlers
    // -----------------------------------------------------------------------

    fn on_listen(&mut self, packet: Packet, tx: &mut impl Transmit) -> Result<Outcome> {
        let h = packet.header;
        if !h.is_syn() || h.is_ack() {
            self.report(Event::Drop, &h);
            return Ok(Outcome::Continue);
        }
        self.report(Event::Recv, &h);
        self.rcv_nxt = h.seq.wrapping_add(1);
        self.transmit_segment(flags::SYN | flags::ACK, Vec::new(), tx)?;
        self.state = ConnectionState::SynReceived;
        Ok(Outcome::Continue)
    }

    fn on_syn_sent(&mut self, packet: Packet, tx: &mut impl Transmit) -> Result<Outcome> {
        let h = packet.header;
        if !(h.is_syn() && h.is_ack()) || !seq::ack_acceptable(self.snd_una, self.snd_nxt, h.ack)
        {
            self.report(Event::Drop, &h);
            return Ok(Outcome::Continue);
        }
        self.report(Event::Recv, &h);
        self.conn_id = h.conn_id;
        self.rcv_nxt = h.seq.wrapping_add(1);
        self.accept_ack(h.ack);
        self.state = ConnectionState::Established;

        let first = self.first_payload.take().unwrap_or_default();
        self.transmit_segment(flags::ACK, first, tx)?;
        log::info!("conn {}: established", self.conn_id);
        Ok(Outcome::Continue)
    }

    fn on_syn_received(&mut self, packet: Packet, tx: &mut impl Transmit) -> Result<Outcome> {
        let h = packet.header;
        if !h.is_ack()
            || h.is_syn()
            || h.seq != self.rcv_nxt
            || !seq::ack_acceptable(self.snd_una, self.snd_nxt, h.ack)
        {
            self.report(Event::Drop, &h);
            return Ok(Outcome::Continue);
        }
        self.report(Event::Recv, &h);
        self.accept_ack(h.ack);
        self.state = ConnectionState::Established;
        log::info!("conn {}: established", self.conn_id);
        self.receive_in_order(packet, tx)
    }

    /// `ESTABLISHED` and `ACK_ALL`: the ACK field is always honoured, the
    /// segment itself only when it is the next in order.
    fn on_open(&mut self, packet: Packet, tx: &mut impl Transmit) -> Result<Outcome> {
        let h = packet.header;
        if h.is_ack() {
            self.accept_ack(h.ack);
        }

        let outcome = if packet.seq_len() == 0 {
            self.report(Event::Recv, &h);
            Outcome::Continue
        } else if h.is_syn() || h.seq != self.rcv_nxt {
            self.report(Event::Drop, &h);
            self.send_ack(tx, true)?;
            Outcome::Continue
        } else {
            self.report(Event::Recv, &h);
            self.receive_in_order(packet, tx)?
        };

        if self.state == ConnectionState::AckAll && self.snd_una == self.snd_nxt {
            self.send_fin(tx)?;
            self.state = ConnectionState::FinWait;
        }
        Ok(outcome)
    }

    fn on_fin_wait(&mut self, packet: Packet, tx: &mut impl Transmit) -> Result<Outcome> {
        let h = packet.header;
        // Only an ACK that covers our FIN ends FIN_WAIT.
        let acks_fin = h.is_ack() && seq::ack_acceptable(self.snd_una, self.snd_nxt, h.ack);
        if !acks_fin && !h.is_fin() {
            self.report(Event::Drop, &h);
            return Ok(Outcome::Continue);
        }
        self.report(Event::Recv, &h);
        if acks_fin {
            self.accept_ack(h.ack);
        }
        if h.is_fin() {
            self.ack_fin(&h, tx)?;
        }
        if acks_fin && self.snd_una == self.snd_nxt {
            self.state = ConnectionState::TimeWait;
            self.rto_timer.cancel();
            self.idle_timer.arm(self.config.time_wait);
        }
        Ok(Outcome::Continue)
    }

    fn on_last_ack(&mut self, packet: Packet, tx: &mut impl Transmit) -> Result<Outcome> {
        let h = packet.header;
        if h.is_ack() && h.ack == self.snd_nxt {
            self.report(Event::Recv, &h);
            self.accept_ack(h.ack);
            self.state = ConnectionState::Closed;
            self.release();
            self.sink.finish()?;
            log::info!("conn {}: closed", self.conn_id);
            return Ok(Outcome::Closed(Closure::Graceful));
        }
        self.report(Event::Drop, &h);
        if h.is_fin() {
            // The peer missed our ACK of its FIN.
            self.send_ack(tx, true)?;
        }
        Ok(Outcome::Continue)
    }

    fn on_time_wait(&mut self, packet: Packet, tx: &mut impl Transmit) -> Result<Outcome> {
        let h = packet.header;
        if !h.is_fin() {
            self.report(Event::Drop, &h);
            return Ok(Outcome::Continue);
        }
        self.report(Event::Recv, &h);
        self.ack_fin(&h, tx)?;
        Ok(Outcome::Continue)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Deliver an in-order segment: payload to the sink, then FIN handling.
    fn receive_in_order(&mut self, packet: Packet, tx: &mut impl Transmit) -> Result<Outcome> {
        let h = packet.header;
        if !packet.payload.is_empty() {
            self.rcv_nxt = self.rcv_nxt.wrapping_add(packet.payload.len() as u32);
            self.sink.write(&packet.payload)?;
        }
        if h.is_fin() {
            self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            self.send_ack(tx, false)?;
            self.send_fin(tx)?;
            self.state = ConnectionState::LastAck;
        } else if !packet.payload.is_empty() {
            self.send_ack(tx, false)?;
        }
        Ok(Outcome::Continue)
    }

    /// Acknowledge a FIN seen while closing. A FIN already counted is
    /// re-acknowledged without moving `rcv_nxt`.
    fn ack_fin(&mut self, h: &Header, tx: &mut impl Transmit) -> Result<()> {
        if h.seq == self.rcv_nxt {
            self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            self.send_ack(tx, false)
        } else {
            self.send_ack(tx, true)
        }
    }

    /// Apply a cumulative ACK. Returns `false` if it lies outside the window.
    fn accept_ack(&mut self, ack: u32) -> bool {
        if !seq::ack_acceptable(self.snd_una, self.snd_nxt, ack) {
            return false;
        }
        let advanced = ack != self.snd_una;
        self.snd_una = ack;
        self.queue.trim(self.snd_una, self.snd_nxt);
        self.congestion.on_ack();

        if self.queue.is_empty() {
            self.rto_timer.cancel();
        } else if advanced {
            self.rto_timer.arm(self.config.rto);
        }
        true
    }

    fn send_fin(&mut self, tx: &mut impl Transmit) -> Result<()> {
        self.transmit_segment(flags::FIN | flags::ACK, Vec::new(), tx)
    }

    /// Send a pure cumulative ACK. Pure ACKs are never queued.
    fn send_ack(&mut self, tx: &mut impl Transmit, dup: bool) -> Result<()> {
        let header = Header {
            seq: self.snd_nxt,
            ack: self.rcv_nxt,
            conn_id: self.conn_id,
            flags: flags::ACK,
        };
        tx.transmit(&header.encode())?;
        trace::report(
            Event::Send,
            &header,
            self.congestion.cwnd(),
            self.congestion.ssthresh(),
            dup,
        );
        Ok(())
    }

    /// Build, send and (if it occupies sequence space) queue a segment at
    /// `snd_nxt`.
    fn transmit_segment(&mut self, bits: u16, payload: Vec<u8>, tx: &mut impl Transmit) -> Result<()> {
        let header = Header {
            seq: self.snd_nxt,
            ack: if bits & flags::ACK != 0 { self.rcv_nxt } else { 0 },
            conn_id: self.conn_id,
            flags: bits,
        };
        let packet = Packet::new(header, payload);
        let len = packet.seq_len();

        tx.transmit(&packet.encode())?;
        trace::report(
            Event::Send,
            &header,
            self.congestion.cwnd(),
            self.congestion.ssthresh(),
            false,
        );

        if len > 0 {
            self.snd_nxt = self.snd_nxt.wrapping_add(len);
            self.queue.push(packet, len);
            self.rto_timer.arm(self.config.rto);
        }
        Ok(())
    }

    fn report(&self, event: Event, header: &Header) {
        trace::report(
            event,
            header,
            self.congestion.cwnd(),
            self.congestion.ssthresh(),
            false,
        );
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("conn_id", &self.conn_id)
            .field("snd_nxt", &self.snd_nxt)
            .field("snd_una", &self.snd_una)
            .field("rcv_nxt", &self.rcv_nxt)
            .field("cwnd", &self.congestion.cwnd())
            .field("ssthresh", &self.congestion.ssthresh())
            .field("unacked", &self.queue.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
