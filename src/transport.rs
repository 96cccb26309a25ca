//! Abstract datagram transport for the mesh client
//!
//! The [`Transport`] trait lets the client run over any async datagram
//! source, not just UDP: unit tests substitute an in-memory hub, production
//! uses [`UdpTransport`] backed by `tokio::net::UdpSocket`.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;

/// Boxed future returned by [`Transport::send_to`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = io::Result<usize>> + Send + 'a>>;

/// Boxed future returned by [`Transport::recv_from`].
pub type RecvFuture<'a> =
    Pin<Box<dyn Future<Output = io::Result<(usize, SocketAddr)>> + Send + 'a>>;

/// Async datagram transport consumed by [`MeshClient`](crate::MeshClient).
///
/// Implementors are bound at construction time and provide send/receive
/// operations addressed by `SocketAddr`. The trait is object-safe so it can
/// be injected as `Arc<dyn Transport>`.
pub trait Transport: Send + Sync + 'static {
    /// Send `buf` to `target`, returning the number of bytes written.
    fn send_to<'a>(&'a self, buf: &'a [u8], target: SocketAddr) -> SendFuture<'a>;

    /// Receive a datagram into `buf`, returning `(bytes_read, source_address)`.
    fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> RecvFuture<'a>;

    /// Return the local address this transport is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Return the IPv4 subnet mask of the network the transport is bound to,
    /// used to compute the subnet broadcast address for discovery.
    fn subnet_mask(&self) -> io::Result<Ipv4Addr>;
}

// ---------------------------------------------------------------------------
// UdpTransport — default implementation backed by tokio::net::UdpSocket
// ---------------------------------------------------------------------------

mod udp {
    use super::*;
    use tokio::net::UdpSocket;

    /// Default [`Transport`] implementation wrapping a `tokio::net::UdpSocket`
    /// with broadcast sends enabled.
    ///
    /// There is no portable way to ask the OS for the interface's subnet
    /// mask, so it is supplied at bind time (255.255.255.0 covers the common
    /// LAN case).
    pub struct UdpTransport {
        socket: UdpSocket,
        subnet_mask: Ipv4Addr,
    }

    impl UdpTransport {
        /// Bind a new UDP socket to `addr` and enable broadcast sends.
        pub async fn bind(
            addr: impl tokio::net::ToSocketAddrs,
            subnet_mask: Ipv4Addr,
        ) -> io::Result<Self> {
            let socket = UdpSocket::bind(addr).await?;
            socket.set_broadcast(true)?;
            Ok(Self {
                socket,
                subnet_mask,
            })
        }

        /// Wrap an existing `UdpSocket`. The caller is responsible for
        /// having enabled broadcast if discovery is wanted.
        pub fn new(socket: UdpSocket, subnet_mask: Ipv4Addr) -> Self {
            Self {
                socket,
                subnet_mask,
            }
        }
    }

    impl Transport for UdpTransport {
        fn send_to<'a>(&'a self, buf: &'a [u8], target: SocketAddr) -> SendFuture<'a> {
            Box::pin(self.socket.send_to(buf, target))
        }

        fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> RecvFuture<'a> {
            Box::pin(self.socket.recv_from(buf))
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            self.socket.local_addr()
        }

        fn subnet_mask(&self) -> io::Result<Ipv4Addr> {
            Ok(self.subnet_mask)
        }
    }
}

pub use udp::UdpTransport;
