//! Session driver core.
//!
//! A [`Session`] owns every live [`Connection`] on one socket, keyed by a
//! [`ConnKey`] that is never reused, together with the [`Mux`] that routes
//! datagrams between them and their peers. It serialises all engine calls:
//! exactly one event (a datagram or one timer expiry) is handled to
//! completion before the next one is awaited.
//!
//! Closing a connection always goes through [`Session::reclaim`], which
//! disarms the timers, removes the multiplexer entries and only then drops
//! the connection. Timer events naming a key that is gone are ignored.

use std::collections::HashMap;
use std::net::{SocketAddr, SocketAddrV4};

use tokio::time::Instant;

use crate::config::Config;
use crate::connection::{Connection, Outcome, SendStatus};
use crate::error::{Error, Result};
use crate::mux::{ConnKey, DatagramSocket, Delivery, Mux};
use crate::socket::Socket;
use crate::timer::TimerKind;

/// Receive buffer size. Larger than any valid datagram so oversized ones
/// are seen whole and rejected instead of silently truncated.
pub const RECV_BUFFER: usize = 65_535;

/// What happened to an inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A live connection handled it.
    Delivered(ConnKey, Outcome),
    /// No connection is bound to the sender; the caller decides.
    UnrecognizedPeer(SocketAddrV4),
}

/// The next thing the session has to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// `len` bytes from `from` were written to the receive buffer.
    Datagram { len: usize, from: SocketAddr },
    Timer { key: ConnKey, kind: TimerKind },
}

pub struct Session<S> {
    mux: Mux<S>,
    connections: HashMap<ConnKey, Connection>,
    next_key: u64,
    config: Config,
}

impl<S: DatagramSocket> Session<S> {
    pub fn new(socket: S, config: Config) -> Self {
        Self {
            mux: Mux::new(socket),
            connections: HashMap::new(),
            next_key: 1,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mux(&self) -> &Mux<S> {
        &self.mux
    }

    fn allocate_key(&mut self) -> ConnKey {
        let key = ConnKey(self.next_key);
        self.next_key += 1;
        key
    }

    /// Adopt an already constructed connection talking to `peer`.
    pub fn open(&mut self, peer: SocketAddr, conn: Connection) -> Result<ConnKey> {
        let key = self.allocate_key();
        self.mux.register(key, peer)?;
        self.connections.insert(key, conn);
        Ok(key)
    }

    /// Actively open a connection to `peer`, sending its SYN.
    pub fn connect(&mut self, peer: SocketAddr, first_payload: Vec<u8>) -> Result<ConnKey> {
        let key = self.allocate_key();
        self.mux.register(key, peer)?;
        match Connection::connect(self.config, first_payload, &mut self.mux.link(key)) {
            Ok(conn) => {
                self.connections.insert(key, conn);
                Ok(key)
            }
            Err(err) => {
                self.mux.deregister(key);
                Err(err)
            }
        }
    }

    /// Route a datagram from `from` to its owning connection.
    pub fn on_datagram(&mut self, from: SocketAddr, datagram: &[u8]) -> Result<Dispatch> {
        match self.mux.deliver(from)? {
            Delivery::Owner(key) => {
                let outcome = self.dispatch(key, datagram)?;
                Ok(Dispatch::Delivered(key, outcome))
            }
            Delivery::UnrecognizedPeer(peer) => Ok(Dispatch::UnrecognizedPeer(peer)),
        }
    }

    /// Hand a datagram to the connection under `key`.
    pub fn dispatch(&mut self, key: ConnKey, datagram: &[u8]) -> Result<Outcome> {
        let conn = self
            .connections
            .get_mut(&key)
            .ok_or(Error::UnknownConnection(key))?;
        let outcome = conn.on_datagram(datagram, &mut self.mux.link(key))?;
        self.settle(key, &outcome);
        Ok(outcome)
    }

    /// Fire the timer of `kind` on `key`.
    ///
    /// Ignored if the connection is gone or the timer is no longer due,
    /// which happens when it was re-armed or cancelled in the meantime.
    pub fn on_timer(&mut self, key: ConnKey, kind: TimerKind) -> Result<Outcome> {
        let Some(conn) = self.connections.get_mut(&key) else {
            return Ok(Outcome::Continue);
        };
        if !conn.is_due(kind, Instant::now()) {
            return Ok(Outcome::Continue);
        }
        let outcome = match kind {
            TimerKind::Retransmit => conn.on_retransmit_timeout(&mut self.mux.link(key))?,
            TimerKind::Idle => conn.on_idle_timeout()?,
        };
        self.settle(key, &outcome);
        Ok(outcome)
    }

    pub fn send(&mut self, key: ConnKey, payload: &[u8]) -> Result<SendStatus> {
        let conn = self
            .connections
            .get_mut(&key)
            .ok_or(Error::UnknownConnection(key))?;
        conn.send(payload, &mut self.mux.link(key))
    }

    pub fn close(&mut self, key: ConnKey) -> Result<()> {
        let conn = self
            .connections
            .get_mut(&key)
            .ok_or(Error::UnknownConnection(key))?;
        conn.close(&mut self.mux.link(key))
    }

    fn settle(&mut self, key: ConnKey, outcome: &Outcome) {
        if let Outcome::Closed(closure) = outcome {
            if let Some(conn) = self.reclaim(key) {
                log::info!("conn {} ({key}): {closure} closure", conn.conn_id());
            }
        }
    }

    /// Tear down `key`: disarm timers, drop the routes, then hand the
    /// connection back to be dropped.
    pub fn reclaim(&mut self, key: ConnKey) -> Option<Connection> {
        let conn = self.connections.get_mut(&key)?;
        conn.release();
        self.mux.deregister(key);
        self.connections.remove(&key)
    }

    /// The earliest armed timer across all connections.
    pub fn next_deadline(&self) -> Option<(Instant, ConnKey, TimerKind)> {
        self.connections
            .iter()
            .filter_map(|(&key, conn)| conn.next_deadline().map(|(at, kind)| (at, key, kind)))
            .min_by_key(|&(at, _, _)| at)
    }

    pub fn connection(&self, key: ConnKey) -> Option<&Connection> {
        self.connections.get(&key)
    }

    pub fn connections(&self) -> impl Iterator<Item = (ConnKey, &Connection)> {
        self.connections.iter().map(|(&key, conn)| (key, conn))
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Session<Socket> {
    pub fn local_addr(&self) -> SocketAddr {
        self.mux.socket().local_addr
    }

    /// Wait for the next datagram or timer expiry, whichever comes first.
    ///
    /// A datagram is written into `buf`; the caller passes `&buf[..len]` on
    /// to [`Session::on_datagram`].
    pub async fn next_event(&self, buf: &mut [u8]) -> Result<Event> {
        let deadline = self.next_deadline();
        let timer = async move {
            match deadline {
                Some((at, key, kind)) => {
                    tokio::time::sleep_until(at).await;
                    (key, kind)
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            received = self.mux.socket().recv_from(buf) => {
                let (len, from) = received?;
                Ok(Event::Datagram { len, from })
            }
            (key, kind) = timer => Ok(Event::Timer { key, kind }),
        }
    }
}
