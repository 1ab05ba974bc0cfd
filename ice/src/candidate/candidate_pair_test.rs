use std::sync::Arc;

use super::candidate_host::CandidateHostConfig;
use super::candidate_relay::CandidateRelayConfig;
use super::*;
use crate::candidate::candidate_base::CandidateBaseConfig;
use crate::compatibility::Compatibility;

fn host_candidate(addr: &str) -> Arc<dyn Candidate + Send + Sync> {
    Arc::new(
        CandidateHostConfig {
            base_config: CandidateBaseConfig {
                network: "udp".to_owned(),
                address: addr.parse().unwrap(),
                component: 1,
                compatibility: Compatibility::Rfc5245,
                ..CandidateBaseConfig::default()
            },
            tcp_type: TcpType::Unspecified,
        }
        .new_candidate_host()
        .unwrap(),
    )
}

fn relay_candidate(addr: &str) -> Arc<dyn Candidate + Send + Sync> {
    Arc::new(
        CandidateRelayConfig {
            base_config: CandidateBaseConfig {
                network: "udp".to_owned(),
                address: addr.parse().unwrap(),
                component: 1,
                compatibility: Compatibility::Rfc5245,
                ..CandidateBaseConfig::default()
            },
            rel_addr: None,
            server_addr: Some("198.51.100.10:3478".parse().unwrap()),
            relay_client: None,
        }
        .new_candidate_relay()
        .unwrap(),
    )
}

#[test]
fn test_pair_priority_is_role_symmetric() {
    let local = host_candidate("10.0.0.1:5000");
    let remote = relay_candidate("203.0.113.1:7000");

    let controlling = CandidatePair::new(
        Arc::clone(&local),
        Arc::clone(&remote),
        true,
        CandidatePairState::Waiting,
    );
    let controlled = CandidatePair::new(local, remote, false, CandidatePairState::Waiting);

    // both agents must order the same pair identically
    assert_eq!(controlling.priority(), controlled.priority());
}

#[test]
fn test_host_host_outranks_host_relay() {
    let a = CandidatePair::new(
        host_candidate("10.0.0.1:5000"),
        host_candidate("10.0.0.2:5000"),
        true,
        CandidatePairState::Waiting,
    );
    let b = CandidatePair::new(
        host_candidate("10.0.0.1:5000"),
        relay_candidate("203.0.113.1:7000"),
        true,
        CandidatePairState::Waiting,
    );
    assert!(a.priority() > b.priority());
}

#[test]
fn test_pair_foundation_concatenates_endpoints() {
    let local = host_candidate("10.0.0.1:5000");
    let remote = host_candidate("10.0.0.2:5000");
    local.set_foundation("1");
    remote.set_foundation("remote1");

    let p = CandidatePair::new(local, remote, true, CandidatePairState::Frozen);
    assert_eq!(p.foundation(), "1:remote1");
}

#[test]
fn test_pair_state_progression() {
    let p = CandidatePair::new(
        host_candidate("10.0.0.1:5000"),
        host_candidate("10.0.0.2:5000"),
        true,
        CandidatePairState::Frozen,
    );
    assert_eq!(p.state(), CandidatePairState::Frozen);
    p.set_state(CandidatePairState::Waiting);
    assert_eq!(p.state(), CandidatePairState::Waiting);
    p.set_state(CandidatePairState::InProgress);
    p.set_state(CandidatePairState::Succeeded);
    assert_eq!(p.state(), CandidatePairState::Succeeded);
}
