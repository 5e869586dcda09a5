//! Server role.
//!
//! Listens on one UDP port and accepts any number of concurrent clients.
//! A datagram from an unknown peer spawns a new connection only if it is a
//! bare SYN; each accepted connection gets a fresh connection id and a byte
//! sink opened through the [`SinkFactory`].

use std::net::{SocketAddr, SocketAddrV4};

use crate::config::Config;
use crate::connection::{Connection, Outcome};
use crate::error::Result;
use crate::mux::{ConnKey, DatagramSocket};
use crate::packet::Header;
use crate::session::{Dispatch, Event, Session, RECV_BUFFER};
use crate::socket::Socket;
use crate::sink::SinkFactory;
use crate::timer::TimerKind;

pub struct Server<S, F> {
    session: Session<S>,
    sinks: F,
    next_conn_id: u16,
}

impl<S: DatagramSocket, F: SinkFactory> Server<S, F> {
    pub fn new(socket: S, config: Config, sinks: F) -> Self {
        Self {
            session: Session::new(socket, config),
            sinks,
            next_conn_id: 1,
        }
    }

    pub fn session(&self) -> &Session<S> {
        &self.session
    }

    /// Handle one inbound datagram, accepting a new client if it is a SYN
    /// from an unknown peer.
    pub fn handle_datagram(&mut self, from: SocketAddr, datagram: &[u8]) -> Result<()> {
        match self.session.on_datagram(from, datagram)? {
            Dispatch::Delivered(_, _) => {}
            Dispatch::UnrecognizedPeer(peer) => {
                self.accept(peer, datagram)?;
            }
        }
        Ok(())
    }

    pub fn handle_timer(&mut self, key: ConnKey, kind: TimerKind) -> Result<Outcome> {
        self.session.on_timer(key, kind)
    }

    /// Spawn a connection for `peer` if `datagram` opens one.
    pub fn accept(&mut self, peer: SocketAddrV4, datagram: &[u8]) -> Result<Option<ConnKey>> {
        let opens = matches!(Header::decode(datagram), Ok(h) if h.is_syn() && !h.is_ack());
        if !opens {
            log::debug!("dropping datagram from unknown peer {peer}");
            return Ok(None);
        }
        let Some(conn_id) = self.allocate_conn_id() else {
            log::warn!("no free connection id, refusing {peer}");
            return Ok(None);
        };

        let sink = self.sinks.open(conn_id)?;
        let conn = Connection::listen(*self.session.config(), conn_id, sink);
        let key = self.session.open(SocketAddr::V4(peer), conn)?;
        log::info!("conn {conn_id}: accepted {peer}");

        self.session.dispatch(key, datagram)?;
        Ok(Some(key))
    }

    /// Next connection id, wrapping and skipping 0 and ids still in use.
    fn allocate_conn_id(&mut self) -> Option<u16> {
        for _ in 0..=u16::MAX {
            let id = self.next_conn_id;
            self.next_conn_id = self.next_conn_id.wrapping_add(1);
            if id != 0 && !self.session.connections().any(|(_, c)| c.conn_id() == id) {
                return Some(id);
            }
        }
        None
    }
}

impl<F: SinkFactory> Server<Socket, F> {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr, config: Config, sinks: F) -> Result<Self> {
        let socket = Socket::bind(addr).await?;
        log::info!("listening on {}", socket.local_addr);
        Ok(Self::new(socket, config, sinks))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.session.local_addr()
    }

    /// Serve until a fatal error occurs.
    pub async fn run(&mut self) -> Result<()> {
        let mut buf = vec![0u8; RECV_BUFFER];
        loop {
            let handled = match self.session.next_event(&mut buf).await? {
                Event::Datagram { len, from } => self.handle_datagram(from, &buf[..len]),
                Event::Timer { key, kind } => self.handle_timer(key, kind).map(drop),
            };
            if let Err(err) = handled {
                if err.is_fatal() {
                    return Err(err);
                }
                log::warn!("{err}");
            }
        }
    }
}
