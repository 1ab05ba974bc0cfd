pub mod conn_tcp;
pub mod conn_udp;

#[cfg(test)]
mod conn_test;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::ToSocketAddrs;

use crate::error::Result;

/// A bidirectional packet-ish endpoint. Wrapping sockets (TURN relays,
/// framed TCP) implement the same trait and forward to their inner conn.
#[async_trait]
pub trait Conn {
    async fn connect(&self, addr: SocketAddr) -> Result<()>;
    async fn recv(&self, buf: &mut [u8]) -> Result<usize>;
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;
    async fn send(&self, buf: &[u8]) -> Result<usize>;
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize>;
    fn local_addr(&self) -> Result<SocketAddr>;
    fn remote_addr(&self) -> Option<SocketAddr>;
    /// True for stream transports (TCP and anything tunnelled over one).
    /// Receivers must byte-reassemble instead of reading datagrams.
    fn is_reliable(&self) -> bool;
    async fn close(&self) -> Result<()>;
    fn as_any(&self) -> &(dyn std::any::Any + Send + Sync);
}

/// A Listener is a generic network listener for connection-oriented protocols.
#[async_trait]
pub trait Listener {
    /// Waits for and returns the next connection to the listener.
    async fn accept(&self) -> Result<(Arc<dyn Conn + Send + Sync>, SocketAddr)>;

    /// Closes the listener. Any blocked accept operations will be unblocked
    /// and return errors.
    async fn close(&self) -> Result<()>;

    /// Returns the listener's network address.
    fn addr(&self) -> Result<SocketAddr>;
}

pub async fn lookup_host<T>(use_ipv4: bool, host: T) -> Result<SocketAddr>
where
    T: ToSocketAddrs,
{
    for remote_addr in tokio::net::lookup_host(host).await? {
        if (use_ipv4 && remote_addr.is_ipv4()) || (!use_ipv4 && remote_addr.is_ipv6()) {
            return Ok(remote_addr);
        }
    }

    Err(crate::Error::ErrNoAddressFamily)
}
