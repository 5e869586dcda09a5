//! End-to-end engine scenarios.
//!
//! Two [`Connection`]s are wired back to back through in-memory datagram
//! queues; every delivery is explicit, so loss and reordering are simulated
//! simply by not delivering (or by delivering out of order).

use std::time::Duration;

use cfp::connection::{Closure, Connection, Outcome, SendStatus};
use cfp::packet::{flags, Header, Packet, MAX_PAYLOAD};
use cfp::sink::MemorySink;
use cfp::timer::TimerKind;
use cfp::{Config, ConnectionState};
use tokio::time::Instant;

const CONN_ID: u16 = 3;

fn header(datagram: &[u8]) -> Header {
    Header::decode(datagram).expect("engine emitted a malformed header")
}

fn segment(seq: u32, ack: u32, conn_id: u16, bits: u16, payload: &[u8]) -> Vec<u8> {
    Packet::new(
        Header {
            seq,
            ack,
            conn_id,
            flags: bits,
        },
        payload.to_vec(),
    )
    .encode()
}

/// Client and server engines plus everything each has sent but the test has
/// not delivered yet.
struct Pair {
    client: Connection,
    server: Connection,
    sink: MemorySink,
    to_server: Vec<Vec<u8>>,
    to_client: Vec<Vec<u8>>,
}

impl Pair {
    fn connect(config: Config, first: &[u8]) -> Self {
        let sink = MemorySink::new();
        let mut to_server = Vec::new();
        let client = Connection::connect(config, first.to_vec(), &mut to_server).unwrap();
        let server = Connection::listen(config, CONN_ID, Box::new(sink.clone()));
        Self {
            client,
            server,
            sink,
            to_server,
            to_client: Vec::new(),
        }
    }

    /// Deliver every queued datagram for the server; returns the last outcome.
    fn flush_to_server(&mut self) -> Outcome {
        let mut last = Outcome::Continue;
        for datagram in std::mem::take(&mut self.to_server) {
            last = self.server.on_datagram(&datagram, &mut self.to_client).unwrap();
        }
        last
    }

    fn flush_to_client(&mut self) -> Outcome {
        let mut last = Outcome::Continue;
        for datagram in std::mem::take(&mut self.to_client) {
            last = self.client.on_datagram(&datagram, &mut self.to_server).unwrap();
        }
        last
    }

    fn established(config: Config, first: &[u8]) -> Self {
        let mut pair = Self::connect(config, first);
        pair.flush_to_server();
        pair.flush_to_client();
        pair.flush_to_server();
        pair.flush_to_client();
        assert_eq!(pair.client.state(), ConnectionState::Established);
        assert_eq!(pair.server.state(), ConnectionState::Established);
        pair
    }
}

// ---------------------------------------------------------------------------
// Scenario 1: three-way handshake
// ---------------------------------------------------------------------------

#[test]
fn handshake_completes_in_three_segments() {
    let mut pair = Pair::connect(Config::default(), b"first chunk");
    let mut wire = Vec::new();

    wire.extend(pair.to_server.iter().map(|d| header(d)));
    pair.flush_to_server();
    wire.extend(pair.to_client.iter().map(|d| header(d)));
    pair.flush_to_client();
    wire.extend(pair.to_server.iter().map(|d| header(d)));
    pair.flush_to_server();

    assert_eq!(wire.len(), 3);
    assert_eq!(wire[0].flags, flags::SYN);
    assert_eq!(wire[1].flags, flags::SYN | flags::ACK);
    assert_eq!(wire[1].ack, wire[0].seq.wrapping_add(1));
    assert_eq!(wire[1].conn_id, CONN_ID);
    assert_eq!(wire[2].flags, flags::ACK);
    assert_eq!(wire[2].ack, wire[1].seq.wrapping_add(1));
    assert_eq!(wire[2].conn_id, CONN_ID);

    assert_eq!(pair.server.state(), ConnectionState::Established);
    assert_eq!(pair.client.conn_id(), CONN_ID);
    assert_eq!(pair.sink.captured().bytes, b"first chunk");
}

#[test]
fn lost_syn_is_retransmitted() {
    let mut pair = Pair::connect(Config::default(), b"");
    let syn = pair.to_server.clone();
    pair.to_server.clear();

    pair.client.on_retransmit_timeout(&mut pair.to_server).unwrap();
    assert_eq!(pair.to_server, syn);

    pair.flush_to_server();
    pair.flush_to_client();
    assert_eq!(pair.client.state(), ConnectionState::Established);
}

#[test]
fn duplicate_syn_ack_is_reacknowledged() {
    let mut pair = Pair::connect(Config::default(), b"");
    pair.flush_to_server();
    let syn_ack = pair.to_client[0].clone();
    pair.flush_to_client();
    pair.to_server.clear(); // handshake ACK lost

    pair.client.on_datagram(&syn_ack, &mut pair.to_server).unwrap();
    assert_eq!(pair.to_server.len(), 1);
    let ack = header(&pair.to_server[0]);
    assert_eq!(ack.flags, flags::ACK);
    assert_eq!(ack.ack, pair.client.rcv_nxt());

    pair.flush_to_server();
    assert_eq!(pair.server.state(), ConnectionState::Established);
}

// ---------------------------------------------------------------------------
// Scenario 2: orderly close with data outstanding
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn close_waits_for_outstanding_data_then_time_wait_closes_gracefully() {
    // An empty handshake payload leaves the client window at 1024 bytes.
    let mut pair = Pair::established(Config::default(), b"");
    let chunks: Vec<Vec<u8>> = (0..3u8).map(|i| vec![i; 300]).collect();
    for chunk in &chunks {
        let status = pair.client.send(chunk, &mut pair.to_server).unwrap();
        assert_eq!(status, SendStatus::Sent);
    }

    // The first two segments reach the server and are acknowledged.
    let third = pair.to_server.pop().unwrap();
    pair.flush_to_server();
    pair.flush_to_client();
    assert_eq!(pair.client.unacked().len(), 1);

    pair.client.close(&mut pair.to_server).unwrap();
    assert_eq!(pair.client.state(), ConnectionState::AckAll);
    assert!(pair.to_server.is_empty());

    // The final ACK drains the queue and releases the FIN.
    pair.to_server.push(third);
    pair.flush_to_server();
    pair.flush_to_client();
    assert_eq!(pair.client.state(), ConnectionState::FinWait);
    let fin = header(pair.to_server.last().unwrap());
    assert!(fin.is_fin());

    // Server answers with ACK and its own FIN.
    pair.flush_to_server();
    assert_eq!(pair.server.state(), ConnectionState::LastAck);
    assert_eq!(pair.flush_to_client(), Outcome::Continue);
    assert_eq!(pair.client.state(), ConnectionState::TimeWait);
    assert!(pair.client.rto_deadline().is_none());

    // Our ACK of the server's FIN closes the server gracefully.
    assert_eq!(pair.flush_to_server(), Outcome::Closed(Closure::Graceful));
    assert_eq!(pair.server.state(), ConnectionState::Closed);
    let captured = pair.sink.captured();
    assert_eq!(captured.bytes, chunks.concat());
    assert!(captured.finished);

    // Two seconds later TIME_WAIT ends.
    assert!(!pair.client.is_due(TimerKind::Idle, Instant::now()));
    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(pair.client.is_due(TimerKind::Idle, Instant::now()));
    assert_eq!(
        pair.client.on_idle_timeout().unwrap(),
        Outcome::Closed(Closure::Graceful)
    );
    assert_eq!(pair.client.state(), ConnectionState::Closed);
}

#[test]
fn duplicate_fin_in_time_wait_is_reacknowledged() {
    let mut pair = Pair::established(Config::default(), b"x");
    pair.client.close(&mut pair.to_server).unwrap();
    pair.flush_to_server();
    let server_fin = pair.to_client[1].clone();
    pair.flush_to_client();
    assert_eq!(pair.client.state(), ConnectionState::TimeWait);
    let rcv_nxt = pair.client.rcv_nxt();
    let idle = pair.client.idle_deadline();
    pair.to_server.clear();

    pair.client.on_datagram(&server_fin, &mut pair.to_server).unwrap();

    assert_eq!(pair.to_server.len(), 1);
    assert_eq!(header(&pair.to_server[0]).ack, rcv_nxt);
    assert_eq!(pair.client.rcv_nxt(), rcv_nxt);
    assert_eq!(pair.client.state(), ConnectionState::TimeWait);
    assert_eq!(pair.client.idle_deadline(), idle);
}

#[test]
fn last_ack_needs_the_ack_of_its_own_fin() {
    let mut pair = Pair::established(Config::default(), b"");
    pair.client.close(&mut pair.to_server).unwrap();
    pair.flush_to_server();
    assert_eq!(pair.server.state(), ConnectionState::LastAck);

    let stale = segment(
        pair.server.rcv_nxt(),
        pair.server.snd_una(),
        CONN_ID,
        flags::ACK,
        b"",
    );
    let mut out = Vec::new();
    let outcome = pair.server.on_datagram(&stale, &mut out).unwrap();
    assert_eq!(outcome, Outcome::Continue);
    assert_eq!(pair.server.state(), ConnectionState::LastAck);
}

// ---------------------------------------------------------------------------
// Scenario 3: reordered segment
// ---------------------------------------------------------------------------

#[test]
fn out_of_order_segment_is_dropped_and_reacknowledged() {
    let mut pair = Pair::established(Config::default(), b"abc");
    let rcv_nxt = pair.server.rcv_nxt();
    let mut out = Vec::new();

    let early = segment(
        rcv_nxt.wrapping_add(1),
        pair.server.snd_nxt(),
        CONN_ID,
        flags::ACK,
        b"future",
    );
    pair.server.on_datagram(&early, &mut out).unwrap();

    assert_eq!(out.len(), 1);
    let ack = header(&out[0]);
    assert_eq!(ack.flags, flags::ACK);
    assert_eq!(ack.ack, rcv_nxt);
    assert_eq!(pair.server.rcv_nxt(), rcv_nxt);
    assert_eq!(pair.sink.captured().bytes, b"abc");
}

#[test]
fn out_of_order_segment_still_carries_its_ack() {
    let mut pair = Pair::established(Config::default(), b"");
    pair.server.send(b"reply", &mut pair.to_client).unwrap();
    let mut out = Vec::new();

    // Ahead of order, but it acknowledges the server's data.
    let early = segment(
        pair.server.rcv_nxt().wrapping_add(7),
        pair.server.snd_nxt(),
        CONN_ID,
        flags::ACK,
        b"zz",
    );
    pair.server.on_datagram(&early, &mut out).unwrap();

    assert_eq!(pair.server.snd_una(), pair.server.snd_nxt());
    assert!(pair.server.unacked().is_empty());
}

#[test]
fn wrong_conn_id_never_mutates_state() {
    let mut pair = Pair::established(Config::default(), b"abc");
    pair.client.close(&mut pair.to_server).unwrap();
    pair.flush_to_server();
    assert_eq!(pair.server.state(), ConnectionState::LastAck);

    let snapshot = format!("{:?}", pair.server);
    let idle = pair.server.idle_deadline();
    let mut out = Vec::new();
    let forged = segment(
        pair.server.rcv_nxt(),
        pair.server.snd_nxt(),
        CONN_ID + 1,
        flags::ACK,
        b"",
    );
    assert_eq!(
        pair.server.on_datagram(&forged, &mut out).unwrap(),
        Outcome::Continue
    );
    assert!(out.is_empty());
    assert_eq!(format!("{:?}", pair.server), snapshot);
    assert_eq!(pair.server.idle_deadline(), idle);
}

// ---------------------------------------------------------------------------
// Scenario 4: retransmission timeout
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn timeout_resends_exactly_the_unacknowledged_segments() {
    let config = Config::default();
    let mut pair = Pair::established(config, b"");
    pair.client.send(b"one", &mut pair.to_server).unwrap();
    pair.client.send(b"two", &mut pair.to_server).unwrap();
    let in_flight = std::mem::take(&mut pair.to_server);

    let cwnd_before = pair.client.cwnd();
    assert!(!pair.client.is_due(TimerKind::Retransmit, Instant::now()));
    tokio::time::advance(config.rto).await;
    assert!(pair.client.is_due(TimerKind::Retransmit, Instant::now()));

    pair.client.on_retransmit_timeout(&mut pair.to_server).unwrap();

    assert_eq!(pair.to_server, in_flight);
    assert_eq!(pair.client.ssthresh(), cwnd_before / 2);
    assert_eq!(pair.client.cwnd(), config.initial_cwnd);
    assert!(pair.client.unacked().iter().all(|e| e.tx_count == 2));
    assert!(!pair.client.is_due(TimerKind::Retransmit, Instant::now()));

    pair.flush_to_server();
    assert_eq!(pair.sink.captured().bytes, b"onetwo");
}

#[test]
fn stale_timeout_after_ack_changes_nothing() {
    let mut pair = Pair::established(Config::default(), b"");
    pair.client.send(b"data", &mut pair.to_server).unwrap();
    pair.flush_to_server();
    pair.flush_to_client();
    assert!(pair.client.unacked().is_empty());

    let (cwnd, ssthresh) = (pair.client.cwnd(), pair.client.ssthresh());
    pair.client.on_retransmit_timeout(&mut pair.to_server).unwrap();
    pair.client.on_retransmit_timeout(&mut pair.to_server).unwrap();

    assert!(pair.to_server.is_empty());
    assert!(pair.client.unacked().is_empty());
    assert_eq!((pair.client.cwnd(), pair.client.ssthresh()), (cwnd, ssthresh));
}

#[test]
fn silent_peer_is_an_abrupt_closure() {
    let mut pair = Pair::established(Config::default(), b"partial");
    let outcome = pair.server.on_idle_timeout().unwrap();
    assert!(matches!(outcome, Outcome::Closed(Closure::Abrupt { .. })));
    let captured = pair.sink.captured();
    assert_eq!(captured.bytes, b"ERROR");
    assert!(captured.aborted && !captured.finished);
}

// ---------------------------------------------------------------------------
// Sequence wraparound and congestion cap
// ---------------------------------------------------------------------------

#[test]
fn acks_are_judged_across_the_wrap() {
    // After the SYN is acknowledged snd_una sits at MAXSEQ - 5.
    let config = Config {
        client_isn: u32::MAX - 5,
        ..Config::default()
    };
    let mut out = Vec::new();
    let mut client = Connection::connect(config, Vec::new(), &mut out).unwrap();
    client
        .on_datagram(
            &segment(4321, u32::MAX - 4, CONN_ID, flags::SYN | flags::ACK, b""),
            &mut out,
        )
        .unwrap();
    assert_eq!(client.snd_una(), u32::MAX - 4);

    client.send(&[7u8; 15], &mut out).unwrap();
    assert_eq!(client.snd_nxt(), 10);
    assert_eq!(client.outstanding(), 15);

    // MAXSEQ - 6 lies behind the window.
    client
        .on_datagram(&segment(4322, u32::MAX - 5, CONN_ID, flags::ACK, b""), &mut out)
        .unwrap();
    assert_eq!(client.snd_una(), u32::MAX - 4);

    client
        .on_datagram(&segment(4322, 3, CONN_ID, flags::ACK, b""), &mut out)
        .unwrap();
    assert_eq!(client.snd_una(), 3);
    assert_eq!(client.unacked().len(), 1);

    client
        .on_datagram(&segment(4322, 10, CONN_ID, flags::ACK, b""), &mut out)
        .unwrap();
    assert!(client.unacked().is_empty());
    assert_eq!(client.outstanding(), 0);
}

#[test]
fn stream_survives_sequence_wrap() {
    let config = Config {
        client_isn: u32::MAX - 600,
        ..Config::default()
    };
    let mut pair = Pair::established(config, &[1u8; MAX_PAYLOAD]);
    for byte in 2..6u8 {
        pair.client.send(&[byte; MAX_PAYLOAD], &mut pair.to_server).unwrap();
        pair.flush_to_server();
        pair.flush_to_client();
    }

    assert!(pair.client.snd_nxt() < 2048);
    assert!(pair.client.unacked().is_empty());
    let expected: Vec<u8> = (1..6u8).flat_map(|b| [b; MAX_PAYLOAD]).collect();
    assert_eq!(pair.sink.captured().bytes, expected);
}

#[test]
fn window_growth_stops_at_the_cap() {
    let config = Config::default();
    let mut pair = Pair::established(config, b"");
    let ack = segment(
        pair.client.rcv_nxt(),
        pair.client.snd_nxt(),
        CONN_ID,
        flags::ACK,
        b"",
    );
    let mut out = Vec::new();
    for _ in 0..10_000 {
        pair.client.on_datagram(&ack, &mut out).unwrap();
        assert!(pair.client.cwnd() <= config.cwnd_cap);
    }
    assert_eq!(pair.client.cwnd(), config.cwnd_cap);
    assert!(out.is_empty());
}
