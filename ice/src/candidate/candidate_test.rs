use super::candidate_host::CandidateHostConfig;
use super::candidate_server_reflexive::CandidateServerReflexiveConfig;
use super::*;
use crate::candidate::candidate_base::{unmarshal_candidate, CandidateBaseConfig};
use crate::compatibility::Compatibility;

fn host(addr: &str, tcp_type: TcpType) -> CandidateBase {
    let network = if tcp_type == TcpType::Unspecified {
        "udp"
    } else {
        "tcp"
    };
    CandidateHostConfig {
        base_config: CandidateBaseConfig {
            network: network.to_owned(),
            address: addr.parse().unwrap(),
            component: 1,
            compatibility: Compatibility::Rfc5245,
            ..CandidateBaseConfig::default()
        },
        tcp_type,
    }
    .new_candidate_host()
    .unwrap()
}

#[test]
fn test_host_candidate_is_its_own_base() {
    let c = host("192.168.0.4:6000", TcpType::Unspecified);
    assert_eq!(c.addr(), c.base_addr());
    assert_eq!(c.candidate_type(), CandidateType::Host);
    assert!(c.related_address().is_none());
}

#[test]
fn test_srflx_base_is_the_host_address() {
    let c = CandidateServerReflexiveConfig {
        base_config: CandidateBaseConfig {
            network: "udp".to_owned(),
            address: "203.0.113.9:40000".parse().unwrap(),
            component: 1,
            compatibility: Compatibility::Rfc5245,
            ..CandidateBaseConfig::default()
        },
        base_addr: "192.168.0.4:6000".parse().unwrap(),
    }
    .new_candidate_server_reflexive()
    .unwrap();

    assert_eq!(c.addr().to_string(), "203.0.113.9:40000");
    assert_eq!(c.base_addr().to_string(), "192.168.0.4:6000");
    let related = c.related_address().unwrap();
    assert_eq!(related.address, "192.168.0.4");
    assert_eq!(related.port, 6000);
}

#[test]
fn test_marshal_unmarshal_roundtrip() {
    let c = host("10.0.0.1:5000", TcpType::Unspecified);
    c.set_foundation("1");

    let line = c.marshal();
    let parsed = unmarshal_candidate(&line).unwrap();

    assert!(parsed.equal(&c), "{line} did not round-trip");
    assert_eq!(parsed.priority(), c.priority());
    assert_eq!(parsed.component(), c.component());
}

#[test]
fn test_marshal_unmarshal_tcp_and_related() {
    let c = host("10.0.0.1:9000", TcpType::Passive);
    c.set_foundation("3");
    let line = c.marshal();
    assert!(line.contains("tcptype passive"), "{line}");

    let parsed = unmarshal_candidate(&line).unwrap();
    assert_eq!(parsed.tcp_type(), TcpType::Passive);
    assert!(parsed.network_type().is_tcp());

    let srflx_line = "4 1 udp 1694498815 203.0.113.9 40000 typ srflx raddr 10.0.0.1 rport 5000";
    let parsed = unmarshal_candidate(srflx_line).unwrap();
    assert_eq!(parsed.candidate_type(), CandidateType::ServerReflexive);
    assert_eq!(parsed.base_addr().to_string(), "10.0.0.1:5000");
}

#[test]
fn test_unmarshal_rejects_garbage() {
    assert!(unmarshal_candidate("1 1 udp 1234").is_err());
    assert!(
        unmarshal_candidate("1 1 udp 1234 10.0.0.1 5000 typ carrier-pigeon").is_err()
    );
    assert!(unmarshal_candidate("1 1 udp 1234 not-an-ip 5000 typ host").is_err());
}

#[test]
fn test_candidates_with_same_address_differ_by_transport() {
    let udp = host("10.0.0.1:5000", TcpType::Unspecified);
    let tcp = host("10.0.0.1:5000", TcpType::Passive);
    assert!(!udp.equal(&tcp));
}
