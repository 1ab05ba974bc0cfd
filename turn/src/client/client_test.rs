use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use stun::attributes::{ATTR_NONCE, ATTR_REALM, ATTR_USERNAME};
use stun::error_code::{ErrorCodeAttribute, CODE_UNAUTHORIZED};
use stun::message::*;
use stun::textattrs::TextAttribute;
use tokio::net::UdpSocket;
use util::conn::conn_udp::UdpConn;
use util::Conn;

use super::*;
use crate::proto::chandata::ChannelData;
use crate::proto::data::Data;
use crate::proto::lifetime::Lifetime;
use crate::proto::peeraddr::PeerAddress;
use crate::proto::relayaddr::RelayedAddress;

/// Minimal in-process TURN server: challenges the first Allocate with 401,
/// accepts the second, acks permissions and channel binds, and forwards
/// Send indications back as Data indications from the named peer.
async fn run_mock_turn_server(server: UdpSocket, relayed_port: u16) {
    let mut buf = vec![0u8; 1500];
    loop {
        let (n, from) = match server.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(_) => return,
        };

        if ChannelData::is_channel_data(&buf[..n]) {
            continue;
        }
        if !is_message(&buf[..n]) {
            continue;
        }

        let mut req = Message::new();
        req.raw = buf[..n].to_vec();
        if req.decode().is_err() {
            continue;
        }

        let mut resp = Message::new();
        match (req.typ.method, req.typ.class) {
            (METHOD_ALLOCATE, CLASS_REQUEST) => {
                if !req.contains(ATTR_USERNAME) {
                    // challenge
                    resp.build(&[
                        Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_ERROR_RESPONSE)),
                        Box::new(req.clone()),
                        Box::new(ErrorCodeAttribute {
                            code: CODE_UNAUTHORIZED,
                            reason: b"Unauthorized".to_vec(),
                        }),
                        Box::new(TextAttribute::new(ATTR_REALM, "icelink.test".to_owned())),
                        Box::new(TextAttribute::new(ATTR_NONCE, "nonce-1".to_owned())),
                    ])
                    .unwrap();
                } else {
                    resp.build(&[
                        Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_SUCCESS_RESPONSE)),
                        Box::new(req.clone()),
                        Box::new(RelayedAddress {
                            ip: "127.0.0.1".parse().unwrap(),
                            port: relayed_port,
                        }),
                        Box::new(Lifetime(Duration::from_secs(600))),
                    ])
                    .unwrap();
                }
            }
            (METHOD_CREATE_PERMISSION, CLASS_REQUEST) => {
                resp.build(&[
                    Box::new(MessageType::new(
                        METHOD_CREATE_PERMISSION,
                        CLASS_SUCCESS_RESPONSE,
                    )),
                    Box::new(req.clone()),
                ])
                .unwrap();
            }
            (METHOD_CHANNEL_BIND, CLASS_REQUEST) => {
                resp.build(&[
                    Box::new(MessageType::new(METHOD_CHANNEL_BIND, CLASS_SUCCESS_RESPONSE)),
                    Box::new(req.clone()),
                ])
                .unwrap();
            }
            (METHOD_REFRESH, CLASS_REQUEST) => {
                let mut lt = Lifetime::default();
                let _ = lt.get_from(&req);
                resp.build(&[
                    Box::new(MessageType::new(METHOD_REFRESH, CLASS_SUCCESS_RESPONSE)),
                    Box::new(req.clone()),
                    Box::new(lt),
                ])
                .unwrap();
            }
            (METHOD_SEND, CLASS_INDICATION) => {
                // reflect the payload back as a Data indication from peer
                let mut peer = PeerAddress::default();
                let mut data = Data::default();
                if peer.get_from(&req).is_err() || data.get_from(&req).is_err() {
                    continue;
                }
                resp.build(&[
                    Box::new(TransactionId::new()),
                    Box::new(MessageType::new(METHOD_DATA, CLASS_INDICATION)),
                    Box::new(peer),
                    Box::new(data),
                ])
                .unwrap();
            }
            _ => continue,
        }

        let _ = server.send_to(&resp.raw, from).await;
    }
}

#[tokio::test]
async fn test_client_allocate_and_relay_roundtrip() -> Result<()> {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server.local_addr().unwrap();
    tokio::spawn(run_mock_turn_server(server, 36000));

    let conn = UdpConn::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let client = Client::new(ClientConfig {
        turn_serv_addr: server_addr,
        username: "user".to_owned(),
        password: "pass".to_owned(),
        realm: String::new(),
        software: String::new(),
        decoded_username: None,
        decoded_password: None,
        variant: ProtocolVariant::Rfc5766,
        even_port: false,
        rto: Duration::from_millis(100),
        max_retransmissions: 3,
        conn: Arc::new(conn),
    });
    client.listen().await?;

    let relayed = client.allocate().await?;
    let relayed_addr = relayed.local_addr().map_err(Error::from)?;
    assert_eq!(relayed_addr.port(), 36000);

    // double allocate must be refused
    match client.allocate().await {
        Err(err) => assert_eq!(err, Error::ErrOneAllocateOnly),
        Ok(_) => panic!("double allocate must fail"),
    }

    // send through the relay; the mock reflects it as a Data indication
    let peer: SocketAddr = "127.0.0.1:39001".parse().unwrap();
    relayed.send_to(b"through the relay", peer).await.map_err(Error::from)?;

    let mut buf = vec![0u8; 1500];
    let (n, from) = relayed.recv_from(&mut buf).await.map_err(Error::from)?;
    assert_eq!(&buf[..n], b"through the relay");
    assert_eq!(from, peer);

    relayed.close().await.map_err(Error::from)?;
    client.close().await?;

    Ok(())
}
