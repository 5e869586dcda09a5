//! UDP multiplexer.
//!
//! One UDP socket is shared by many connections. [`Mux`] keeps a single
//! bidirectional association between connections (named by a stable
//! [`ConnKey`]) and the IPv4 peer address each of them talks to:
//!
//! ```text
//!   inbound:  source addr ──owners──▶ ConnKey ──▶ Connection::on_datagram
//!   outbound: Connection ──Link──▶ ConnKey ──peers──▶ addr ──▶ socket
//! ```
//!
//! Both directions are updated together on [`Mux::register`] and
//! [`Mux::deregister`], so the two maps can never disagree.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{SocketAddr, SocketAddrV4};

use crate::connection::Transmit;
use crate::error::{Error, Result};

/// The socket half the multiplexer writes through.
pub trait DatagramSocket {
    /// Send one datagram to `dest`.
    fn send_to(&self, datagram: &[u8], dest: SocketAddrV4) -> io::Result<()>;
}

/// Stable identifier of a live connection within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnKey(pub u64);

impl fmt::Display for ConnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of looking up the owner of an inbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The datagram belongs to this connection.
    Owner(ConnKey),
    /// No connection is bound to the source address.
    UnrecognizedPeer(SocketAddrV4),
}

/// Narrow a socket address to IPv4, the only family the protocol supports.
pub fn ipv4(addr: SocketAddr) -> Result<SocketAddrV4> {
    match addr {
        SocketAddr::V4(v4) => Ok(v4),
        SocketAddr::V6(_) => Err(Error::UnsupportedAddress(addr)),
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// Bidirectional ConnKey ↔ peer association.
#[derive(Debug, Default)]
struct Routes {
    peers: HashMap<ConnKey, SocketAddrV4>,
    owners: HashMap<SocketAddrV4, ConnKey>,
}

impl Routes {
    fn insert(&mut self, key: ConnKey, peer: SocketAddrV4) -> Result<()> {
        if self.peers.contains_key(&key) {
            return Err(Error::KeyInUse(key));
        }
        if self.owners.contains_key(&peer) {
            return Err(Error::PeerInUse(peer));
        }
        self.peers.insert(key, peer);
        self.owners.insert(peer, key);
        Ok(())
    }

    fn remove(&mut self, key: ConnKey) -> Option<SocketAddrV4> {
        let peer = self.peers.remove(&key)?;
        self.owners.remove(&peer);
        Some(peer)
    }
}

// ---------------------------------------------------------------------------
// Mux
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Mux<S> {
    socket: S,
    routes: Routes,
}

impl<S: DatagramSocket> Mux<S> {
    pub fn new(socket: S) -> Self {
        Self {
            socket,
            routes: Routes::default(),
        }
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    /// Bind `key` to `peer` in both directions.
    ///
    /// Fails without touching either map if the peer is not IPv4 or either
    /// side is already bound.
    pub fn register(&mut self, key: ConnKey, peer: SocketAddr) -> Result<SocketAddrV4> {
        let peer = ipv4(peer)?;
        self.routes.insert(key, peer)?;
        log::debug!("mux: {key} bound to {peer}");
        Ok(peer)
    }

    /// Remove both directions of `key`'s binding, returning its peer.
    pub fn deregister(&mut self, key: ConnKey) -> Option<SocketAddrV4> {
        let peer = self.routes.remove(key);
        if let Some(peer) = peer {
            log::debug!("mux: {key} released {peer}");
        }
        peer
    }

    /// Find the connection that owns datagrams from `source`.
    pub fn deliver(&self, source: SocketAddr) -> Result<Delivery> {
        let source = ipv4(source)?;
        Ok(match self.routes.owners.get(&source) {
            Some(&key) => Delivery::Owner(key),
            None => Delivery::UnrecognizedPeer(source),
        })
    }

    /// Send `datagram` to the peer bound to `key`.
    pub fn transmit(&self, key: ConnKey, datagram: &[u8]) -> Result<()> {
        let peer = self.peer(key).ok_or(Error::UnknownConnection(key))?;
        self.socket.send_to(datagram, peer)?;
        Ok(())
    }

    pub fn peer(&self, key: ConnKey) -> Option<SocketAddrV4> {
        self.routes.peers.get(&key).copied()
    }

    /// A [`Transmit`] handle that sends on behalf of `key`.
    pub fn link(&self, key: ConnKey) -> Link<'_, S> {
        Link { mux: self, key }
    }

    pub fn len(&self) -> usize {
        self.routes.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.peers.is_empty()
    }
}

/// Outbound path of one connection through the shared socket.
pub struct Link<'a, S> {
    mux: &'a Mux<S>,
    key: ConnKey,
}

impl<S: DatagramSocket> Transmit for Link<'_, S> {
    fn transmit(&mut self, datagram: &[u8]) -> Result<()> {
        self.mux.transmit(self.key, datagram)
    }
}
