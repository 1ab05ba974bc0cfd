use std::net::SocketAddr;
use std::sync::Arc;

use super::conn_tcp::{TcpConn, TcpListenerConn};
use super::conn_udp::UdpConn;
use super::{Conn, Listener};
use crate::error::Result;

fn any_addr() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

#[tokio::test]
async fn test_udp_conn_send_recv() -> Result<()> {
    let a = UdpConn::bind(any_addr()).await?;
    let b = UdpConn::bind(any_addr()).await?;
    let b_addr = b.local_addr()?;

    assert!(!a.is_reliable());

    a.send_to(b"ping", b_addr).await?;

    let mut buf = [0u8; 64];
    let (n, from) = b.recv_from(&mut buf).await?;
    assert_eq!(&buf[..n], b"ping");
    assert_eq!(from, a.local_addr()?);

    Ok(())
}

#[tokio::test]
async fn test_tcp_conn_accept_and_stream() -> Result<()> {
    let listener = TcpListenerConn::bind(any_addr()).await?;
    let server_addr = listener.addr()?;

    let client_task =
        tokio::spawn(async move { TcpConn::connect_to(server_addr).await });

    let (accepted, _raddr): (Arc<dyn Conn + Send + Sync>, _) = listener.accept().await?;
    let client = client_task.await.unwrap()?;

    assert!(client.is_reliable());

    client.send(b"hello").await?;
    let mut buf = [0u8; 64];
    let n = accepted.recv(&mut buf).await?;
    assert_eq!(&buf[..n], b"hello");

    Ok(())
}
