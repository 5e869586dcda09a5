//! Client role.
//!
//! Streams a byte source to a server over one connection. The first chunk
//! is read before connecting so it can ride on the handshake ACK; after
//! that the source is pumped after every event for as long as the
//! congestion window admits another segment. A chunk that does not fit is
//! held back and retried first. At end of input the connection is closed.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::Config;
use crate::connection::{Closure, Outcome, SendStatus};
use crate::error::{Error, Result};
use crate::mux::ConnKey;
use crate::packet::MAX_PAYLOAD;
use crate::session::{Dispatch, Event, Session, RECV_BUFFER};
use crate::socket::Socket;
use crate::state::ConnectionState;

pub struct Client<R> {
    session: Session<Socket>,
    key: ConnKey,
    source: R,
    /// A chunk the window had no room for.
    pending: Option<Vec<u8>>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> Client<R> {
    /// Bind an ephemeral port and send the SYN to `server`.
    pub async fn connect(server: SocketAddrV4, config: Config, mut source: R) -> Result<Self> {
        let socket = Socket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
        let first = read_chunk(&mut source).await?;
        let eof = first.is_empty();

        let mut session = Session::new(socket, config);
        let key = session.connect(SocketAddr::V4(server), first)?;
        log::info!("connecting to {server} from {}", session.local_addr());

        Ok(Self {
            session,
            key,
            source,
            pending: None,
            eof,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.session.local_addr()
    }

    /// Current state of the connection, `None` once it has been reclaimed.
    pub fn state(&self) -> Option<ConnectionState> {
        self.session.connection(self.key).map(|c| c.state())
    }

    /// Drive the transfer to completion.
    ///
    /// Returns `Ok` after a graceful close and [`Error::TimedOut`] if the
    /// server stopped answering.
    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; RECV_BUFFER];
        loop {
            let outcome = match self.session.next_event(&mut buf).await? {
                Event::Datagram { len, from } => {
                    match self.session.on_datagram(from, &buf[..len])? {
                        Dispatch::Delivered(_, outcome) => outcome,
                        Dispatch::UnrecognizedPeer(peer) => {
                            log::debug!("ignoring datagram from {peer}");
                            continue;
                        }
                    }
                }
                Event::Timer { key, kind } => self.session.on_timer(key, kind)?,
            };

            match outcome {
                Outcome::Continue => self.pump().await?,
                Outcome::Closed(Closure::Graceful) => return Ok(()),
                Outcome::Closed(Closure::Abrupt { reason }) => {
                    log::error!("transfer aborted: {reason}");
                    return Err(Error::TimedOut);
                }
            }
        }
    }

    /// Send as much of the source as the window admits; close at EOF.
    async fn pump(&mut self) -> Result<()> {
        while self.state() == Some(ConnectionState::Established) {
            let chunk = match self.pending.take() {
                Some(chunk) => chunk,
                None if self.eof => {
                    self.session.close(self.key)?;
                    break;
                }
                None => {
                    let chunk = read_chunk(&mut self.source).await?;
                    if chunk.is_empty() {
                        self.eof = true;
                        continue;
                    }
                    chunk
                }
            };

            if self.session.send(self.key, &chunk)? == SendStatus::WindowFull {
                self.pending = Some(chunk);
                break;
            }
        }
        Ok(())
    }
}

/// Read up to one full segment from `source`. Empty means end of input.
async fn read_chunk<R: AsyncRead + Unpin>(source: &mut R) -> Result<Vec<u8>> {
    let mut chunk = vec![0u8; MAX_PAYLOAD];
    let mut filled = 0;
    while filled < MAX_PAYLOAD {
        let n = source.read(&mut chunk[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    chunk.truncate(filled);
    Ok(chunk)
}
