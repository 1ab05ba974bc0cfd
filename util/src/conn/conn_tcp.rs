use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use super::{Conn, Listener};
use crate::error::Result;

/// Connected TCP stream behind the [`Conn`] trait.
///
/// Reads return whatever chunk the stream yields; message boundaries are
/// the caller's business (length-prefix framing lives a layer above).
pub struct TcpConn {
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpConn {
    pub fn new(stream: TcpStream) -> Result<Self> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            local_addr,
            peer_addr,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        })
    }

    /// Active open toward `remote`, optionally bound to `local`.
    pub async fn connect_to(remote: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(remote).await?;
        Self::new(stream)
    }
}

#[async_trait]
impl Conn for TcpConn {
    async fn connect(&self, _addr: SocketAddr) -> Result<()> {
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let mut reader = self.reader.lock().await;
        Ok(reader.read(buf).await?)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let n = self.recv(buf).await?;
        Ok((n, self.peer_addr))
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        let mut writer = self.writer.lock().await;
        writer.write_all(buf).await?;
        Ok(buf.len())
    }

    async fn send_to(&self, buf: &[u8], _target: SocketAddr) -> Result<usize> {
        self.send(buf).await
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.peer_addr)
    }

    fn is_reliable(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        Ok(())
    }

    fn as_any(&self) -> &(dyn std::any::Any + Send + Sync) {
        self
    }
}

/// Passive TCP endpoint: accepted child streams come back as [`TcpConn`]s.
pub struct TcpListenerConn {
    listener: TcpListener,
}

impl TcpListenerConn {
    pub async fn bind(local: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(local).await?;
        Ok(Self { listener })
    }
}

#[async_trait]
impl Listener for TcpListenerConn {
    async fn accept(&self) -> Result<(Arc<dyn Conn + Send + Sync>, SocketAddr)> {
        let (stream, raddr) = self.listener.accept().await?;
        let conn = TcpConn::new(stream)?;
        Ok((Arc::new(conn), raddr))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}
