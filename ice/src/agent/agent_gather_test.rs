use std::net::SocketAddr;
use std::time::Duration;

use stun::attributes::{ATTR_NONCE, ATTR_REALM, ATTR_USERNAME};
use stun::error_code::{ErrorCodeAttribute, CODE_UNAUTHORIZED};
use stun::fingerprint::FINGERPRINT;
use stun::message::*;
use stun::textattrs::TextAttribute;
use stun::xoraddr::XorMappedAddress;
use tokio::net::UdpSocket;
use tokio::time::{sleep, Instant};

use super::agent_config::{AgentConfig, TurnServerConfig, TurnTransport};
use super::*;
use crate::candidate::CandidateType;
use crate::state::ComponentState;

/// STUN server faking a NAT: the reflected port is the source port moved
/// up by a fixed rewrite offset.
async fn run_mock_stun_server(server: UdpSocket, rewrite_offset: u16) {
    let mut buf = vec![0u8; 1500];
    loop {
        let (n, from) = match server.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(_) => return,
        };
        if !is_message(&buf[..n]) {
            continue;
        }
        let mut req = Message::new();
        req.raw = buf[..n].to_vec();
        if req.decode().is_err() || req.typ != BINDING_REQUEST {
            continue;
        }

        let mut resp = Message::new();
        resp.build(&[
            Box::new(BINDING_SUCCESS),
            Box::new(req.clone()),
            Box::new(XorMappedAddress {
                ip: from.ip(),
                port: from.port() + rewrite_offset,
            }),
            Box::new(FINGERPRINT),
        ])
        .unwrap();
        let _ = server.send_to(&resp.raw, from).await;
    }
}

/// Just enough TURN to satisfy one allocation.
async fn run_mock_turn_server(server: UdpSocket, relayed_port: u16) {
    let mut buf = vec![0u8; 1500];
    loop {
        let (n, from) = match server.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(_) => return,
        };
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
            (METHOD_ALLOCATE, CLASS_REQUEST) if !req.contains(ATTR_USERNAME) => {
                resp.build(&[
                    Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_ERROR_RESPONSE)),
                    Box::new(req.clone()),
                    Box::new(ErrorCodeAttribute {
                        code: CODE_UNAUTHORIZED,
                        reason: b"Unauthorized".to_vec(),
                    }),
                    Box::new(TextAttribute::new(ATTR_REALM, "gather.test".to_owned())),
                    Box::new(TextAttribute::new(ATTR_NONCE, "n0".to_owned())),
                ])
                .unwrap();
            }
            (METHOD_ALLOCATE, CLASS_REQUEST) => {
                resp.build(&[
                    Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_SUCCESS_RESPONSE)),
                    Box::new(req.clone()),
                    Box::new(relayed_addr_attr(relayed_port)),
                    Box::new(lifetime_attr()),
                ])
                .unwrap();
            }
            (METHOD_REFRESH, CLASS_REQUEST) => {
                resp.build(&[
                    Box::new(MessageType::new(METHOD_REFRESH, CLASS_SUCCESS_RESPONSE)),
                    Box::new(req.clone()),
                ])
                .unwrap();
            }
            _ => continue,
        }
        let _ = server.send_to(&resp.raw, from).await;
    }
}

pub(crate) fn relayed_addr_attr(port: u16) -> impl Setter {
    struct RelayedSetter(u16);
    impl Setter for RelayedSetter {
        fn add_to(&self, m: &mut Message) -> std::result::Result<(), stun::Error> {
            XorMappedAddress {
                ip: "127.0.0.1".parse().unwrap(),
                port: self.0,
            }
            .add_to_as(m, stun::attributes::ATTR_XOR_RELAYED_ADDRESS)
        }
    }
    RelayedSetter(port)
}

pub(crate) fn lifetime_attr() -> impl Setter {
    struct LifetimeSetter;
    impl Setter for LifetimeSetter {
        fn add_to(&self, m: &mut Message) -> std::result::Result<(), stun::Error> {
            m.add(stun::attributes::ATTR_LIFETIME, &600u32.to_be_bytes());
            Ok(())
        }
    }
    LifetimeSetter
}

#[tokio::test]
async fn test_server_reflexive_gathering_against_mock_nat() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server.local_addr().unwrap();
    tokio::spawn(run_mock_stun_server(server, 1000));

    let agent = Agent::new(AgentConfig {
        stun_server: Some(server_addr),
        ice_tcp: false,
        local_addresses: vec!["127.0.0.1".parse().unwrap()],
        ..AgentConfig::default()
    })
    .unwrap();
    let stream_id = agent.add_stream("audio", 1).await.unwrap();
    agent.gather_candidates(stream_id).await.unwrap();

    // wait for the srflx discovery to land
    let deadline = Instant::now() + Duration::from_secs(3);
    let candidates = loop {
        let candidates = agent.get_local_candidates(stream_id, 1).await.unwrap();
        if candidates.len() == 2 {
            break candidates;
        }
        if Instant::now() > deadline {
            panic!("expected 2 candidates, have {}", candidates.len());
        }
        sleep(Duration::from_millis(20)).await;
    };

    let host = candidates
        .iter()
        .find(|c| c.candidate_type() == CandidateType::Host)
        .expect("host candidate");
    let srflx = candidates
        .iter()
        .find(|c| c.candidate_type() == CandidateType::ServerReflexive)
        .expect("srflx candidate");

    // the reflected address carries the rewrite, based on the host
    assert_eq!(srflx.addr().port(), host.addr().port() + 1000);
    assert_eq!(srflx.base_addr(), host.addr());

    agent.close().await.unwrap();
}

#[tokio::test]
async fn test_force_relay_without_turn_servers_fails_the_component() {
    let agent = Agent::new(AgentConfig {
        force_relay: true,
        ice_tcp: false,
        local_addresses: vec!["127.0.0.1".parse().unwrap()],
        ..AgentConfig::default()
    })
    .unwrap();
    let stream_id = agent.add_stream("audio", 1).await.unwrap();
    agent.gather_candidates(stream_id).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let state = agent.get_component_state(stream_id, 1).await.unwrap();
        if state == ComponentState::Failed {
            break;
        }
        if Instant::now() > deadline {
            panic!("component should fail with no candidates, state {state}");
        }
        sleep(Duration::from_millis(20)).await;
    }

    assert!(agent
        .get_local_candidates(stream_id, 1)
        .await
        .unwrap()
        .is_empty());

    agent.close().await.unwrap();
}

#[tokio::test]
async fn test_force_relay_gathers_only_relayed_candidates() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr: SocketAddr = server.local_addr().unwrap();
    tokio::spawn(run_mock_turn_server(server, 47000));

    let agent = Agent::new(AgentConfig {
        force_relay: true,
        ice_tcp: false,
        local_addresses: vec!["127.0.0.1".parse().unwrap()],
        ..AgentConfig::default()
    })
    .unwrap();
    let stream_id = agent.add_stream("audio", 1).await.unwrap();
    agent
        .set_turn_server(
            stream_id,
            1,
            TurnServerConfig {
                server: server_addr,
                username: "user".to_owned(),
                password: "pass".to_owned(),
                realm: String::new(),
                transport: TurnTransport::Udp,
            },
        )
        .await
        .unwrap();
    agent.gather_candidates(stream_id).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    let candidates = loop {
        let candidates = agent.get_local_candidates(stream_id, 1).await.unwrap();
        if !candidates.is_empty() {
            break candidates;
        }
        if Instant::now() > deadline {
            panic!("no relay candidate gathered");
        }
        sleep(Duration::from_millis(20)).await;
    };

    assert!(candidates
        .iter()
        .all(|c| c.candidate_type() == CandidateType::Relay));
    assert_eq!(candidates[0].addr().port(), 47000);
    assert_eq!(candidates[0].server_addr(), Some(server_addr));

    agent.close().await.unwrap();
}
