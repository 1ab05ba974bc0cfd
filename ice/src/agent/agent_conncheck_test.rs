use std::sync::Arc;

use super::agent_config::AgentConfig;
use super::*;
use crate::candidate::candidate_base::CandidateBaseConfig;
use crate::candidate::candidate_host::CandidateHostConfig;
use crate::candidate::*;
use crate::compatibility::Compatibility;
use crate::tcp_type::TcpType;

fn host_candidate(
    stream_id: u32,
    addr: &str,
    network: &str,
    tcp_type: TcpType,
) -> Arc<dyn Candidate + Send + Sync> {
    Arc::new(
        CandidateHostConfig {
            base_config: CandidateBaseConfig {
                network: network.to_owned(),
                address: addr.parse().unwrap(),
                stream_id,
                component: 1,
                compatibility: Compatibility::Rfc5245,
                ..CandidateBaseConfig::default()
            },
            tcp_type,
        }
        .new_candidate_host()
        .unwrap(),
    )
}

/// A lite-mode agent: the scheduler stays quiet, so the tests can assert
/// on pair states without racing the ticker.
async fn agent_with_stream(mut config: AgentConfig) -> (Agent, u32) {
    config.full_mode = false;
    let agent = Agent::new(config).unwrap();
    let stream_id = agent.add_stream("test", 1).await.unwrap();
    agent
        .set_remote_credentials(stream_id, "rfrag".to_owned(), "rpwd-rpwd-rpwd-rpwd-rp".to_owned())
        .await
        .unwrap();
    (agent, stream_id)
}

async fn checklist_len(agent: &Agent, stream_id: u32) -> usize {
    let stream = agent.internal.find_stream(stream_id).await.unwrap();
    let checklist = stream.checklist.lock().await;
    checklist.len()
}

#[tokio::test]
async fn test_pair_list_cross_product_and_transport_rules() {
    let (agent, stream_id) = agent_with_stream(AgentConfig::default()).await;
    let stream = agent.internal.find_stream(stream_id).await.unwrap();
    let component = stream.component(1).cloned().unwrap();

    let local_udp = host_candidate(stream_id, "127.0.0.1:4000", "udp", TcpType::Unspecified);
    let local_tcp = host_candidate(stream_id, "127.0.0.1:4001", "tcp", TcpType::Passive);
    agent
        .internal
        .add_local_candidate(&stream, &component, local_udp)
        .await
        .unwrap();
    agent
        .internal
        .add_local_candidate(&stream, &component, local_tcp)
        .await
        .unwrap();

    // a UDP remote pairs with the UDP local only
    let remote_udp = host_candidate(stream_id, "127.0.0.1:5000", "udp", TcpType::Unspecified);
    agent
        .internal
        .add_remote_candidate(&stream, &component, remote_udp)
        .await;
    assert_eq!(checklist_len(&agent, stream_id).await, 1);

    // a TCP-active remote pairs with the passive local only
    let remote_tcp = host_candidate(stream_id, "127.0.0.1:5001", "tcp", TcpType::Active);
    agent
        .internal
        .add_remote_candidate(&stream, &component, remote_tcp)
        .await;
    assert_eq!(checklist_len(&agent, stream_id).await, 2);

    // active<->active never pairs
    let remote_tcp_passive_incompat =
        host_candidate(stream_id, "127.0.0.1:5002", "tcp", TcpType::Passive);
    {
        // make the local side active-only by removing the passive one
        let mut locals = component.local_candidates.lock().await;
        locals.retain(|c| !c.network_type().is_tcp());
    }
    agent
        .internal
        .add_remote_candidate(&stream, &component, remote_tcp_passive_incompat)
        .await;
    assert_eq!(checklist_len(&agent, stream_id).await, 2);

    agent.close().await.unwrap();
}

#[tokio::test]
async fn test_set_remote_candidates_is_idempotent() {
    let (agent, stream_id) = agent_with_stream(AgentConfig::default()).await;
    let stream = agent.internal.find_stream(stream_id).await.unwrap();
    let component = stream.component(1).cloned().unwrap();

    let local = host_candidate(stream_id, "127.0.0.1:4100", "udp", TcpType::Unspecified);
    agent
        .internal
        .add_local_candidate(&stream, &component, local)
        .await
        .unwrap();

    let line = "1 1 udp 1694498815 127.0.0.1 5100 typ host";
    let remote = || -> Arc<dyn Candidate + Send + Sync> {
        Arc::new(unmarshal_candidate(line).unwrap())
    };

    agent
        .set_remote_candidates(stream_id, 1, vec![remote()])
        .await
        .unwrap();
    let first = checklist_len(&agent, stream_id).await;

    agent
        .set_remote_candidates(stream_id, 1, vec![remote()])
        .await
        .unwrap();
    let second = checklist_len(&agent, stream_id).await;

    assert_eq!(first, 1);
    assert_eq!(second, first, "same list twice must not grow the checklist");

    // and the pair's committed state survived
    let state = {
        let checklist = stream.checklist.lock().await;
        checklist[0].state()
    };
    assert_eq!(state, CandidatePairState::Waiting);

    agent.close().await.unwrap();
}

#[tokio::test]
async fn test_max_connectivity_checks_keeps_top_priority_pair() {
    let (agent, stream_id) = agent_with_stream(AgentConfig {
        max_connectivity_checks: 1,
        ..AgentConfig::default()
    })
    .await;
    let stream = agent.internal.find_stream(stream_id).await.unwrap();
    let component = stream.component(1).cloned().unwrap();

    let local = host_candidate(stream_id, "127.0.0.1:4200", "udp", TcpType::Unspecified);
    agent
        .internal
        .add_local_candidate(&stream, &component, local)
        .await
        .unwrap();

    // a host remote and a relay remote: only the host pair may survive
    let host_line = "1 1 udp 2130706431 127.0.0.1 5200 typ host";
    let relay_line = "2 1 udp 16777215 127.0.0.1 5201 typ relay raddr 127.0.0.1 rport 5300";
    agent
        .set_remote_candidates(
            stream_id,
            1,
            vec![
                Arc::new(unmarshal_candidate(relay_line).unwrap()),
                Arc::new(unmarshal_candidate(host_line).unwrap()),
            ],
        )
        .await
        .unwrap();

    let stream = agent.internal.find_stream(stream_id).await.unwrap();
    let checklist = stream.checklist.lock().await;
    assert_eq!(checklist.len(), 1);
    assert_eq!(
        checklist[0].remote.candidate_type(),
        CandidateType::Host,
        "the lower-priority relay pair should have been dropped"
    );
    drop(checklist);

    agent.close().await.unwrap();
}

#[tokio::test]
async fn test_freezing_by_foundation() {
    let (agent, stream_id) = agent_with_stream(AgentConfig::default()).await;
    let stream = agent.internal.find_stream(stream_id).await.unwrap();
    let component = stream.component(1).cloned().unwrap();

    // two UDP host candidates on the same base address share a foundation
    let a = host_candidate(stream_id, "127.0.0.1:4300", "udp", TcpType::Unspecified);
    let b = host_candidate(stream_id, "127.0.0.1:4301", "udp", TcpType::Unspecified);
    agent
        .internal
        .add_local_candidate(&stream, &component, Arc::clone(&a))
        .await
        .unwrap();
    agent
        .internal
        .add_local_candidate(&stream, &component, Arc::clone(&b))
        .await
        .unwrap();
    assert_eq!(a.foundation(), b.foundation());

    let remote = host_candidate(stream_id, "127.0.0.1:5300", "udp", TcpType::Unspecified);
    agent
        .internal
        .add_remote_candidate(&stream, &component, remote)
        .await;

    {
        let checklist = stream.checklist.lock().await;
        assert_eq!(checklist.len(), 2);
        let waiting = checklist
            .iter()
            .filter(|p| p.state() == CandidatePairState::Waiting)
            .count();
        let frozen = checklist
            .iter()
            .filter(|p| p.state() == CandidatePairState::Frozen)
            .count();
        assert_eq!((waiting, frozen), (1, 1), "same foundation: one waits, one freezes");
    }

    // success on the foundation unfreezes the sibling
    let foundation = {
        let checklist = stream.checklist.lock().await;
        checklist[0].foundation()
    };
    agent.internal.unfreeze_foundation(&foundation).await;
    {
        let checklist = stream.checklist.lock().await;
        assert!(checklist
            .iter()
            .all(|p| p.state() == CandidatePairState::Waiting));
    }

    agent.close().await.unwrap();
}

#[tokio::test]
async fn test_local_foundations_differ_by_type_and_transport() {
    let (agent, stream_id) = agent_with_stream(AgentConfig::default()).await;
    let stream = agent.internal.find_stream(stream_id).await.unwrap();
    let component = stream.component(1).cloned().unwrap();

    let udp = host_candidate(stream_id, "127.0.0.1:4400", "udp", TcpType::Unspecified);
    let tcp = host_candidate(stream_id, "127.0.0.1:4401", "tcp", TcpType::Passive);
    let other_ip = host_candidate(stream_id, "127.0.0.2:4400", "udp", TcpType::Unspecified);

    agent
        .internal
        .add_local_candidate(&stream, &component, Arc::clone(&udp))
        .await
        .unwrap();
    agent
        .internal
        .add_local_candidate(&stream, &component, Arc::clone(&tcp))
        .await
        .unwrap();
    agent
        .internal
        .add_local_candidate(&stream, &component, Arc::clone(&other_ip))
        .await
        .unwrap();

    assert_ne!(udp.foundation(), tcp.foundation());
    assert_ne!(udp.foundation(), other_ip.foundation());

    agent.close().await.unwrap();
}

#[tokio::test]
async fn test_remote_prflx_foundations_count_up() {
    let (agent, stream_id) = agent_with_stream(AgentConfig::default()).await;
    let stream = agent.internal.find_stream(stream_id).await.unwrap();
    let component = stream.component(1).cloned().unwrap();

    let mk = |addr: &str| -> Arc<dyn Candidate + Send + Sync> {
        Arc::new(
            crate::candidate::candidate_peer_reflexive::CandidatePeerReflexiveConfig {
                base_config: CandidateBaseConfig {
                    network: "udp".to_owned(),
                    address: addr.parse().unwrap(),
                    stream_id,
                    component: 1,
                    priority: 1,
                    compatibility: Compatibility::Rfc5245,
                    ..CandidateBaseConfig::default()
                },
                base_addr: addr.parse().unwrap(),
            }
            .new_candidate_peer_reflexive()
            .unwrap(),
        )
    };

    let first = mk("127.0.0.1:6000");
    let second = mk("127.0.0.2:6001");
    let sibling = mk("127.0.0.1:6002");
    agent
        .internal
        .add_remote_candidate(&stream, &component, Arc::clone(&first))
        .await;
    agent
        .internal
        .add_remote_candidate(&stream, &component, Arc::clone(&second))
        .await;
    agent
        .internal
        .add_remote_candidate(&stream, &component, Arc::clone(&sibling))
        .await;

    assert_eq!(first.foundation(), "remote1");
    assert_eq!(second.foundation(), "remote2");
    // same host, different port: the foundation is shared
    assert_eq!(sibling.foundation(), "remote1");

    agent.close().await.unwrap();
}
