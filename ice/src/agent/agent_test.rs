use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};

use super::agent_config::AgentConfig;
use super::*;
use crate::candidate::unmarshal_candidate;
use crate::state::ComponentState;

fn loopback_config(controlling: bool) -> AgentConfig {
    AgentConfig {
        controlling_mode: controlling,
        ice_tcp: false,
        local_addresses: vec!["127.0.0.1".parse().unwrap()],
        ..AgentConfig::default()
    }
}

async fn gather_and_wait(agent: &Agent, stream_id: u32) -> Vec<String> {
    agent.gather_candidates(stream_id).await.unwrap();
    // host-only gathering completes synchronously; give the signal pump a
    // moment regardless
    for _ in 0..50 {
        let candidates = agent.get_local_candidates(stream_id, 1).await.unwrap();
        if !candidates.is_empty() {
            return candidates.iter().map(|c| c.marshal()).collect();
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("gathering produced no candidates");
}

/// Wires two agents together over loopback: credentials and candidate
/// lines cross as they would through signalling.
async fn interconnect(a: &Agent, a_stream: u32, b: &Agent, b_stream: u32) {
    let a_candidates = gather_and_wait(a, a_stream).await;
    let b_candidates = gather_and_wait(b, b_stream).await;

    let (a_ufrag, a_pwd) = a.get_local_user_credentials(a_stream).await.unwrap();
    let (b_ufrag, b_pwd) = b.get_local_user_credentials(b_stream).await.unwrap();

    a.set_remote_credentials(a_stream, b_ufrag, b_pwd).await.unwrap();
    b.set_remote_credentials(b_stream, a_ufrag, a_pwd).await.unwrap();

    let to_remote = |lines: &[String]| {
        lines
            .iter()
            .map(|line| {
                let c: Arc<dyn crate::candidate::Candidate + Send + Sync> =
                    Arc::new(unmarshal_candidate(line).unwrap());
                c
            })
            .collect::<Vec<_>>()
    };

    a.set_remote_candidates(a_stream, 1, to_remote(&b_candidates))
        .await
        .unwrap();
    b.set_remote_candidates(b_stream, 1, to_remote(&a_candidates))
        .await
        .unwrap();
}

async fn wait_for_state(
    agent: &Agent,
    stream_id: u32,
    wanted: ComponentState,
    deadline: Duration,
) {
    let start = Instant::now();
    loop {
        let state = agent.get_component_state(stream_id, 1).await.unwrap();
        if state == wanted {
            return;
        }
        if start.elapsed() > deadline {
            panic!("component stuck in {state}, wanted {wanted}");
        }
        sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_host_to_host_udp_connectivity_and_data() {
    let a = Agent::new(loopback_config(true)).unwrap();
    let b = Agent::new(loopback_config(false)).unwrap();

    let a_stream = a.add_stream("audio", 1).await.unwrap();
    let b_stream = b.add_stream("audio", 1).await.unwrap();

    interconnect(&a, a_stream, &b, b_stream).await;

    wait_for_state(&a, a_stream, ComponentState::Ready, Duration::from_secs(5)).await;
    wait_for_state(&b, b_stream, ComponentState::Ready, Duration::from_secs(5)).await;

    a.send(a_stream, 1, b"HELLO").await.unwrap();

    let mut buf = [0u8; 1500];
    let n = timeout(Duration::from_secs(2), b.recv(b_stream, 1, &mut buf))
        .await
        .expect("receive timed out")
        .unwrap();
    assert_eq!(&buf[..n], b"HELLO");

    // and the other direction
    b.send(b_stream, 1, b"WORLD").await.unwrap();
    let n = timeout(Duration::from_secs(2), a.recv(a_stream, 1, &mut buf))
        .await
        .expect("receive timed out")
        .unwrap();
    assert_eq!(&buf[..n], b"WORLD");

    a.close().await.unwrap();
    b.close().await.unwrap();
}

#[tokio::test]
async fn test_regular_nomination_selects_a_pair() {
    let mut config = loopback_config(true);
    config.nomination_mode = super::agent_config::NominationMode::Regular;
    let a = Agent::new(config).unwrap();
    let b = Agent::new(loopback_config(false)).unwrap();

    let a_stream = a.add_stream("data", 1).await.unwrap();
    let b_stream = b.add_stream("data", 1).await.unwrap();

    interconnect(&a, a_stream, &b, b_stream).await;

    wait_for_state(&a, a_stream, ComponentState::Ready, Duration::from_secs(5)).await;
    wait_for_state(&b, b_stream, ComponentState::Ready, Duration::from_secs(5)).await;

    let selected = a.get_selected_pair(a_stream, 1).await.unwrap();
    assert!(selected.is_some());
    assert!(selected.unwrap().is_nominated());

    a.close().await.unwrap();
    b.close().await.unwrap();
}

#[tokio::test]
async fn test_role_conflict_resolves() {
    // both sides start controlling; the smaller tie-breaker must yield
    let a = Agent::new(loopback_config(true)).unwrap();
    let b = Agent::new(loopback_config(true)).unwrap();

    let a_stream = a.add_stream("audio", 1).await.unwrap();
    let b_stream = b.add_stream("audio", 1).await.unwrap();

    interconnect(&a, a_stream, &b, b_stream).await;

    wait_for_state(&a, a_stream, ComponentState::Ready, Duration::from_secs(5)).await;
    wait_for_state(&b, b_stream, ComponentState::Ready, Duration::from_secs(5)).await;

    let a_controlling = a
        .internal
        .is_controlling
        .load(std::sync::atomic::Ordering::SeqCst);
    let b_controlling = b
        .internal
        .is_controlling
        .load(std::sync::atomic::Ordering::SeqCst);
    assert_ne!(
        a_controlling, b_controlling,
        "exactly one side must end up controlling"
    );

    a.close().await.unwrap();
    b.close().await.unwrap();
}

#[tokio::test]
async fn test_reliable_mode_delivers_in_order() {
    let mut ca = loopback_config(true);
    ca.reliable = true;
    let mut cb = loopback_config(false);
    cb.reliable = true;

    let a = Agent::new(ca).unwrap();
    let b = Agent::new(cb).unwrap();

    let a_stream = a.add_stream("reliable", 1).await.unwrap();
    let b_stream = b.add_stream("reliable", 1).await.unwrap();

    interconnect(&a, a_stream, &b, b_stream).await;

    wait_for_state(&a, a_stream, ComponentState::Ready, Duration::from_secs(5)).await;
    wait_for_state(&b, b_stream, ComponentState::Ready, Duration::from_secs(5)).await;

    // several writes; the byte stream must come out in order
    let mut sent = vec![];
    for i in 0..20u8 {
        let chunk = vec![i; 512];
        let mut offset = 0;
        while offset < chunk.len() {
            match a.send(a_stream, 1, &chunk[offset..]) .await {
                Ok(n) => offset += n,
                Err(crate::Error::ErrWouldBlock) => sleep(Duration::from_millis(5)).await,
                Err(e) => panic!("{e}"),
            }
        }
        sent.extend_from_slice(&chunk);
    }

    let mut received = vec![];
    let mut buf = [0u8; 2048];
    let deadline = Instant::now() + Duration::from_secs(10);
    while received.len() < sent.len() {
        if Instant::now() > deadline {
            panic!("only {} of {} bytes arrived", received.len(), sent.len());
        }
        match timeout(Duration::from_secs(2), b.recv(b_stream, 1, &mut buf)).await {
            Ok(Ok(n)) => received.extend_from_slice(&buf[..n]),
            Ok(Err(e)) => panic!("{e}"),
            Err(_) => panic!("receive stalled"),
        }
    }
    assert_eq!(received, sent);

    a.close().await.unwrap();
    b.close().await.unwrap();
}

#[tokio::test]
async fn test_trickle_defers_failure_until_peer_done() {
    let mut config = loopback_config(true);
    config.ice_trickle = true;
    config.idle_timeout = Duration::from_millis(200);
    let a = Agent::new(config).unwrap();

    let a_stream = a.add_stream("audio", 1).await.unwrap();
    gather_and_wait(&a, a_stream).await;
    a.set_remote_credentials(a_stream, "frag".to_owned(), "pwd-pwd-pwd-pwd-pwd-pw".to_owned())
        .await
        .unwrap();

    // no remote candidates, but the peer has not finished gathering: the
    // component must not fail yet
    sleep(Duration::from_millis(600)).await;
    let state = a.get_component_state(a_stream, 1).await.unwrap();
    assert_ne!(state, ComponentState::Failed, "trickle must defer Failed");

    // once the peer is done, the idle timeout may run out
    a.peer_candidate_gathering_done(a_stream).await.unwrap();
    wait_for_state(&a, a_stream, ComponentState::Failed, Duration::from_secs(3)).await;

    a.close().await.unwrap();
}

#[tokio::test]
async fn test_restart_regenerates_credentials_and_clears_remote_state() {
    let a = Agent::new(loopback_config(true)).unwrap();
    let a_stream = a.add_stream("audio", 1).await.unwrap();

    let before = a.get_local_user_credentials(a_stream).await.unwrap();
    a.set_remote_credentials(a_stream, "frag".to_owned(), "pwd-pwd-pwd-pwd-pwd-pw".to_owned())
        .await
        .unwrap();

    a.restart_stream(a_stream).await.unwrap();

    let after = a.get_local_user_credentials(a_stream).await.unwrap();
    assert_ne!(before, after, "restart must regenerate ufrag/pwd");

    let stream = a.internal.find_stream(a_stream).await.unwrap();
    assert!(!stream.has_remote_credentials());
    assert_eq!(stream.checklist.lock().await.len(), 0);
    assert_eq!(
        a.get_component_state(a_stream, 1).await.unwrap(),
        ComponentState::Gathering
    );

    a.close().await.unwrap();
}

#[tokio::test]
async fn test_forced_consent_loss_fails_component_once() {
    let mut ca = loopback_config(true);
    ca.consent_freshness = true;
    let mut cb = loopback_config(false);
    cb.consent_freshness = true;

    let a = Agent::new(ca).unwrap();
    let b = Agent::new(cb).unwrap();

    let a_stream = a.add_stream("audio", 1).await.unwrap();
    let b_stream = b.add_stream("audio", 1).await.unwrap();

    let failed_seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&failed_seen);
    a.on_component_state_change(Box::new(move |_, _, state| {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            if state == ComponentState::Failed {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        })
    }));

    interconnect(&a, a_stream, &b, b_stream).await;
    wait_for_state(&a, a_stream, ComponentState::Ready, Duration::from_secs(5)).await;

    a.consent_lost(a_stream, 1).await.unwrap();
    wait_for_state(&a, a_stream, ComponentState::Failed, Duration::from_secs(2)).await;

    // the transition signal fires exactly once
    sleep(Duration::from_millis(200)).await;
    assert_eq!(failed_seen.load(std::sync::atomic::Ordering::SeqCst), 1);

    // sending after revocation surfaces the permission error
    assert_eq!(
        a.send(a_stream, 1, b"nope").await.unwrap_err(),
        crate::Error::ErrConsentRevoked
    );

    a.close().await.unwrap();
    b.close().await.unwrap();
}

#[tokio::test]
async fn test_gather_candidates_twice_is_a_noop() {
    let a = Agent::new(loopback_config(true)).unwrap();
    let a_stream = a.add_stream("audio", 1).await.unwrap();

    gather_and_wait(&a, a_stream).await;
    let count = a.get_local_candidates(a_stream, 1).await.unwrap().len();

    // second call must not error and must not duplicate candidates
    a.gather_candidates(a_stream).await.unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(
        a.get_local_candidates(a_stream, 1).await.unwrap().len(),
        count
    );

    a.close().await.unwrap();
}
