//! Async UDP socket.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket`. Receiving is
//! async and is the session's readiness source. Sending goes through
//! [`DatagramSocket`] and never suspends, so engine entry points can send
//! from inside a synchronous call. It uses a non-blocking `std` handle to the
//! same socket, so only a full kernel send buffer turns a send into loss;
//! tokio's cached write readiness is never consulted. All protocol logic
//! lives elsewhere; this module owns only byte I/O and address resolution.

use std::io;
use std::net::{SocketAddr, SocketAddrV4};

use tokio::net::UdpSocket;

use crate::error::{Error, Result};
use crate::mux::DatagramSocket;

/// An async UDP socket bound to one local port.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (with the OS-assigned port filled in).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
    /// Non-blocking clone of `inner`, used for sends.
    sender: std::net::UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Port 0 lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self> {
        if !local_addr.is_ipv4() {
            return Err(Error::UnsupportedAddress(local_addr));
        }
        let std_socket = std::net::UdpSocket::bind(local_addr)?;
        std_socket.set_nonblocking(true)?;
        let sender = std_socket.try_clone()?;
        let inner = UdpSocket::from_std(std_socket)?;
        let local_addr = inner.local_addr()?;
        log::debug!("socket bound to {local_addr}");
        Ok(Self {
            local_addr,
            inner,
            sender,
        })
    }

    /// Wait for the next datagram. Returns `(length, sender_address)`.
    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.inner.recv_from(buf).await?)
    }
}

impl DatagramSocket for Socket {
    fn send_to(&self, datagram: &[u8], dest: SocketAddrV4) -> io::Result<()> {
        match self.sender.send_to(datagram, dest) {
            Ok(_) => Ok(()),
            // A full send buffer loses the datagram, like the network would.
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                log::warn!("send buffer full, dropping datagram to {dest}");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Resolve `host:port` to the first IPv4 address it names.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddrV4> {
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|err| Error::Resolve(format!("{host}:{port}: {err}")))?;
    addrs
        .filter_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| Error::Resolve(format!("{host}:{port}")))
}
