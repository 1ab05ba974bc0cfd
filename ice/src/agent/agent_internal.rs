use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as SyncMutex;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::{mpsc, Mutex};

use super::agent_config::*;
use super::agent_gather::DiscoveryItem;
use super::*;
use crate::candidate::*;
use crate::compatibility::Compatibility;
use crate::component::Component;
use crate::error::*;
use crate::state::{is_valid_transition, ComponentState};
use crate::stream::Stream;

/// Notifications queued while the core mutates state and delivered to the
/// host afterwards, so a handler can re-enter the agent freely.
pub(crate) enum AgentEvent {
    ComponentStateChange(u32, u16, ComponentState),
    GatheringDone(u32),
    NewCandidate(u32, Arc<dyn Candidate + Send + Sync>),
    NewRemoteCandidate(u32, Arc<dyn Candidate + Send + Sync>),
    SelectedPairChange(
        u32,
        u16,
        Arc<dyn Candidate + Send + Sync>,
        Arc<dyn Candidate + Send + Sync>,
    ),
    InitialBindingRequest(u32),
    TransportWritable(u32, u16),
    StreamsRemoved(Vec<u32>),
}

pub struct AgentInternal {
    // configuration, fixed after construction
    pub(crate) compatibility: Compatibility,
    pub(crate) stun_server: Option<SocketAddr>,
    pub(crate) full_mode: bool,
    pub(crate) timer_ta: Duration,
    pub(crate) max_connectivity_checks: usize,
    pub(crate) nomination_mode: NominationMode,
    pub(crate) reliable: bool,
    pub(crate) ice_udp: bool,
    pub(crate) ice_tcp: bool,
    pub(crate) bytestream_tcp: bool,
    pub(crate) keepalive_conncheck: bool,
    pub(crate) force_relay: bool,
    pub(crate) stun_max_retransmissions: u32,
    pub(crate) stun_initial_timeout: Duration,
    pub(crate) conncheck_initial_timeout: Duration,
    pub(crate) stun_reliable_timeout: Duration,
    pub(crate) ice_trickle: bool,
    pub(crate) consent_freshness: bool,
    pub(crate) support_renomination: bool,
    pub(crate) idle_timeout: Duration,
    pub(crate) max_local_addresses: usize,
    pub(crate) max_turn_servers: usize,
    pub(crate) port_min: u16,
    pub(crate) port_max: u16,
    pub(crate) local_addresses: Vec<IpAddr>,

    pub(crate) tie_breaker: AtomicU64,
    pub(crate) is_controlling: AtomicBool,

    pub(crate) streams: Mutex<Vec<Arc<Stream>>>,
    pub(crate) next_stream_id: AtomicU32,
    pub(crate) next_foundation: AtomicU32,

    pub(crate) stun_registry: SyncMutex<stun::agent::Agent>,
    pub(crate) discovery_list: Mutex<Vec<DiscoveryItem>>,

    pub(crate) event_tx: Mutex<Option<mpsc::Sender<AgentEvent>>>,
    pub(crate) done_tx: Mutex<Option<mpsc::Sender<()>>>,

    pub(crate) on_component_state_change_hdlr:
        ArcSwapOption<Mutex<OnComponentStateChangeHdlrFn>>,
    pub(crate) on_candidate_hdlr: ArcSwapOption<Mutex<OnCandidateHdlrFn>>,
    pub(crate) on_new_remote_candidate_hdlr: ArcSwapOption<Mutex<OnNewRemoteCandidateHdlrFn>>,
    pub(crate) on_selected_pair_change_hdlr: ArcSwapOption<Mutex<OnSelectedPairChangeHdlrFn>>,
    pub(crate) on_initial_binding_request_hdlr:
        ArcSwapOption<Mutex<OnInitialBindingRequestHdlrFn>>,
    pub(crate) on_transport_writable_hdlr: ArcSwapOption<Mutex<OnTransportWritableHdlrFn>>,
    pub(crate) on_streams_removed_hdlr: ArcSwapOption<Mutex<OnStreamsRemovedHdlrFn>>,
}

impl AgentInternal {
    pub(super) fn new(config: &AgentConfig) -> (Self, mpsc::Receiver<AgentEvent>, mpsc::Receiver<()>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (done_tx, done_rx) = mpsc::channel(1);

        let ai = AgentInternal {
            compatibility: config.compatibility,
            stun_server: config.stun_server,
            full_mode: config.full_mode,
            timer_ta: config.timer_ta,
            max_connectivity_checks: config.max_connectivity_checks,
            nomination_mode: config.nomination_mode,
            reliable: config.reliable,
            ice_udp: config.ice_udp,
            ice_tcp: config.ice_tcp,
            bytestream_tcp: config.bytestream_tcp,
            keepalive_conncheck: config.keepalive_conncheck,
            force_relay: config.force_relay,
            stun_max_retransmissions: config.stun_max_retransmissions.clamp(1, 99),
            stun_initial_timeout: config.stun_initial_timeout,
            conncheck_initial_timeout: config.conncheck_initial_timeout,
            stun_reliable_timeout: config.stun_reliable_timeout,
            ice_trickle: config.ice_trickle,
            consent_freshness: config.consent_freshness,
            support_renomination: config.support_renomination,
            idle_timeout: config.idle_timeout,
            max_local_addresses: config.max_local_addresses,
            max_turn_servers: config.max_turn_servers,
            port_min: config.port_min,
            port_max: config.port_max,
            local_addresses: config.local_addresses.clone(),

            tie_breaker: AtomicU64::new(crate::rand::generate_tie_breaker()),
            is_controlling: AtomicBool::new(config.controlling_mode),

            streams: Mutex::new(vec![]),
            next_stream_id: AtomicU32::new(1),
            next_foundation: AtomicU32::new(1),

            stun_registry: SyncMutex::new(stun::agent::Agent::new()),
            discovery_list: Mutex::new(vec![]),

            event_tx: Mutex::new(Some(event_tx)),
            done_tx: Mutex::new(Some(done_tx)),

            on_component_state_change_hdlr: ArcSwapOption::empty(),
            on_candidate_hdlr: ArcSwapOption::empty(),
            on_new_remote_candidate_hdlr: ArcSwapOption::empty(),
            on_selected_pair_change_hdlr: ArcSwapOption::empty(),
            on_initial_binding_request_hdlr: ArcSwapOption::empty(),
            on_transport_writable_hdlr: ArcSwapOption::empty(),
            on_streams_removed_hdlr: ArcSwapOption::empty(),
        };

        (ai, event_rx, done_rx)
    }

    /// The STUN dialect flags of this agent: the compatibility mode plus
    /// the consent-freshness option.
    pub(crate) fn dialect(&self) -> stun::dialect::Dialect {
        let mut dialect = self.compatibility.dialect();
        dialect.consent_freshness = self.consent_freshness;
        dialect
    }

    pub(crate) async fn queue_event(&self, event: AgentEvent) {
        let event_tx = self.event_tx.lock().await;
        if let Some(tx) = &*event_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Delivers queued notifications outside the core's locks.
    pub(super) fn start_event_pump(self: &Arc<Self>, mut event_rx: mpsc::Receiver<AgentEvent>) {
        let ai = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    AgentEvent::ComponentStateChange(stream_id, component_id, state) => {
                        if let Some(handler) = &*ai.on_component_state_change_hdlr.load() {
                            let mut f = handler.lock().await;
                            f(stream_id, component_id, state).await;
                        }
                    }
                    AgentEvent::GatheringDone(stream_id) => {
                        if let Some(handler) = &*ai.on_candidate_hdlr.load() {
                            let mut f = handler.lock().await;
                            f(stream_id, None).await;
                        }
                    }
                    AgentEvent::NewCandidate(stream_id, c) => {
                        if let Some(handler) = &*ai.on_candidate_hdlr.load() {
                            let mut f = handler.lock().await;
                            f(stream_id, Some(c)).await;
                        }
                    }
                    AgentEvent::NewRemoteCandidate(stream_id, c) => {
                        if let Some(handler) = &*ai.on_new_remote_candidate_hdlr.load() {
                            let mut f = handler.lock().await;
                            f(stream_id, c).await;
                        }
                    }
                    AgentEvent::SelectedPairChange(stream_id, component_id, local, remote) => {
                        if let Some(handler) = &*ai.on_selected_pair_change_hdlr.load() {
                            let mut f = handler.lock().await;
                            f(stream_id, component_id, local, remote).await;
                        }
                    }
                    AgentEvent::InitialBindingRequest(stream_id) => {
                        if let Some(handler) = &*ai.on_initial_binding_request_hdlr.load() {
                            let mut f = handler.lock().await;
                            f(stream_id).await;
                        }
                    }
                    AgentEvent::TransportWritable(stream_id, component_id) => {
                        if let Some(handler) = &*ai.on_transport_writable_hdlr.load() {
                            let mut f = handler.lock().await;
                            f(stream_id, component_id).await;
                        }
                    }
                    AgentEvent::StreamsRemoved(ids) => {
                        if let Some(handler) = &*ai.on_streams_removed_hdlr.load() {
                            let mut f = handler.lock().await;
                            f(ids).await;
                        }
                    }
                }
            }
        });
    }

    /// The paced scheduler: one Ta-interval ticker drives checks,
    /// retransmissions, keepalives and the pseudo-TCP clocks.
    pub(super) fn start_ticker(self: &Arc<Self>, mut done_rx: mpsc::Receiver<()>) {
        let ai = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ai.timer_ta);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        ai.conncheck_tick().await;
                        ai.keepalive_tick().await;
                        ai.pseudo_tcp_tick().await;
                    }
                    _ = done_rx.recv() => return,
                }
            }
        });
    }

    pub(crate) async fn find_stream(&self, stream_id: u32) -> Result<Arc<Stream>> {
        let streams = self.streams.lock().await;
        streams
            .iter()
            .find(|s| s.id == stream_id)
            .cloned()
            .ok_or(Error::ErrStreamNotFound)
    }

    pub(crate) async fn find_stream_component(
        &self,
        stream_id: u32,
        component_id: u16,
    ) -> Result<(Arc<Stream>, Arc<Component>)> {
        let stream = self.find_stream(stream_id).await?;
        let component = stream
            .component(component_id)
            .cloned()
            .ok_or(Error::ErrComponentNotFound)?;
        Ok((stream, component))
    }

    /// Validated component state change; the signal is queued after the
    /// mutation.
    pub(crate) async fn set_component_state(
        &self,
        stream: &Stream,
        component: &Component,
        new_state: ComponentState,
    ) {
        let old_state = component.state();
        if old_state == new_state {
            return;
        }
        if !is_valid_transition(old_state, new_state) {
            log::warn!(
                "[{}:{}]: refusing state change {} -> {}",
                stream.id,
                component.id,
                old_state,
                new_state
            );
            return;
        }

        log::info!(
            "[{}:{}]: state change {} -> {}",
            stream.id,
            component.id,
            old_state,
            new_state
        );
        component.set_state(new_state);

        if new_state == ComponentState::Ready {
            // a component just became usable: flush anything parked on it
            self.drain_pending_packets(stream, component).await;
        }

        self.queue_event(AgentEvent::ComponentStateChange(
            stream.id,
            component.id,
            new_state,
        ))
        .await;
    }

    /// Walks every component of a stream through a state change.
    pub(crate) async fn set_stream_state(&self, stream: &Stream, new_state: ComponentState) {
        for component in &stream.components {
            self.set_component_state(stream, component, new_state).await;
        }
    }

    /// Foundation sharing rules: same type, same transport, same base
    /// address (ignoring port), and for relayed candidates the same TURN
    /// server. A fresh monotonic decimal otherwise.
    pub(crate) async fn assign_local_foundation(&self, c: &(dyn Candidate + Send + Sync)) {
        let streams = self.streams.lock().await;
        for stream in streams.iter() {
            for component in &stream.components {
                let local_candidates = component.local_candidates.lock().await;
                for n in local_candidates.iter() {
                    if c.candidate_type() != n.candidate_type() {
                        continue;
                    }
                    if c.network_type().network_short() != n.network_type().network_short()
                        || c.tcp_type() != n.tcp_type()
                    {
                        continue;
                    }
                    if c.candidate_type() == CandidateType::Relay {
                        // relayed candidates are their own base; they group
                        // by allocation address and server instead
                        if !crate::addr::equal_no_port(&c.addr(), &n.addr()) {
                            continue;
                        }
                        if c.server_addr() != n.server_addr() {
                            continue;
                        }
                    } else if !crate::addr::equal_no_port(&c.base_addr(), &n.base_addr()) {
                        continue;
                    }

                    c.set_foundation(&n.foundation());
                    return;
                }
            }
        }
        drop(streams);

        let next = self.next_foundation.fetch_add(1, Ordering::SeqCst);
        c.set_foundation(&format!("{next}"));
    }

    /// Remote peer-reflexive foundations: `"remoteN"`, avoiding collisions
    /// with every remote foundation already known.
    pub(crate) async fn assign_remote_foundation(&self, c: &(dyn Candidate + Send + Sync)) {
        let mut highest = 0u32;
        let streams = self.streams.lock().await;
        for stream in streams.iter() {
            for component in &stream.components {
                let remote_candidates = component.remote_candidates.lock().await;
                for n in remote_candidates.iter() {
                    if c.candidate_type() == n.candidate_type()
                        && c.network_type() == n.network_type()
                        && c.stream_id() == n.stream_id()
                        && crate::addr::equal_no_port(&c.addr(), &n.addr())
                    {
                        c.set_foundation(&n.foundation());
                        return;
                    }
                    if let Some(rest) = n.foundation().strip_prefix("remote") {
                        if let Ok(v) = rest.parse::<u32>() {
                            highest = highest.max(v);
                        }
                    }
                }
            }
        }
        c.set_foundation(&format!("remote{}", highest + 1));
    }

    /// Registers a gathered local candidate: dedup, foundation, dialect
    /// credentials, receive loop, signal and pair list update.
    pub(crate) async fn add_local_candidate(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        c: Arc<dyn Candidate + Send + Sync>,
    ) -> Result<()> {
        {
            let local_candidates = component.local_candidates.lock().await;
            for cand in local_candidates.iter() {
                if cand.equal(&*c) {
                    // redundant: an equivalent candidate already exists
                    let _ = c.close().await;
                    return Ok(());
                }
            }
        }

        self.assign_local_foundation(&*c).await;

        {
            let mut local_candidates = component.local_candidates.lock().await;
            local_candidates.push(Arc::clone(&c));
        }

        self.start_candidate_recv_loop(stream, component, Arc::clone(&c));

        self.queue_event(AgentEvent::NewCandidate(stream.id, Arc::clone(&c)))
            .await;

        self.update_pair_list(stream).await;
        Ok(())
    }

    /// Adds a remote candidate (signalled or learned peer-reflexive) and
    /// refreshes the pair list. Adding the same candidate twice changes
    /// nothing.
    pub(crate) async fn add_remote_candidate(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        c: Arc<dyn Candidate + Send + Sync>,
    ) {
        {
            let remote_candidates = component.remote_candidates.lock().await;
            for cand in remote_candidates.iter() {
                if cand.equal(&*c) {
                    return;
                }
            }
        }

        if c.foundation().is_empty() {
            self.assign_remote_foundation(&*c).await;
        }

        {
            let mut remote_candidates = component.remote_candidates.lock().await;
            remote_candidates.push(Arc::clone(&c));
        }

        self.queue_event(AgentEvent::NewRemoteCandidate(stream.id, Arc::clone(&c)))
            .await;

        self.update_pair_list(stream).await;
    }

    /// Regenerates the conncheck list of a stream from the current
    /// candidates. Existing pairs keep their state, so re-supplying the
    /// same remote candidates is idempotent.
    pub(crate) async fn update_pair_list(&self, stream: &Arc<Stream>) {
        let controlling = self.is_controlling.load(Ordering::SeqCst);
        let mut checklist = stream.checklist.lock().await;

        for component in &stream.components {
            let locals = component.local_candidates.lock().await;
            let remotes = component.remote_candidates.lock().await;

            for local in locals.iter() {
                // a server-reflexive local is never checked from; its base
                // (the host candidate) stands in for it
                if local.candidate_type() == CandidateType::ServerReflexive {
                    continue;
                }
                for remote in remotes.iter() {
                    if !local.network_type().is_compatible_with(remote.network_type()) {
                        continue;
                    }
                    if local.network_type().is_tcp()
                        && !local.tcp_type().is_compatible_with(remote.tcp_type())
                    {
                        continue;
                    }

                    let exists = checklist
                        .iter()
                        .any(|p| p.local.equal(&**local) && p.remote.equal(&**remote));
                    if exists {
                        continue;
                    }

                    let pair = Arc::new(CandidatePair::new(
                        Arc::clone(local),
                        Arc::clone(remote),
                        controlling,
                        CandidatePairState::Frozen,
                    ));
                    checklist.push(pair);
                }
            }
        }

        // priority order, highest first
        checklist.sort_by(|a, b| b.priority().cmp(&a.priority()));

        // cap the list; the tail is simply dropped
        checklist.truncate(self.max_connectivity_checks);

        // initial unfreezing: the best pair of each foundation goes to
        // Waiting, later ones with a shared foundation stay Frozen
        let mut seen_foundations: Vec<String> = vec![];
        for pair in checklist.iter() {
            let foundation = pair.foundation();
            if pair.state() == CandidatePairState::Frozen {
                if !seen_foundations.contains(&foundation) {
                    pair.set_state(CandidatePairState::Waiting);
                }
            }
            seen_foundations.push(foundation);
        }
    }

    /// When a pair succeeds, every frozen pair sharing its foundation is
    /// unfrozen, across all streams.
    pub(crate) async fn unfreeze_foundation(&self, foundation: &str) {
        let streams = self.streams.lock().await;
        for stream in streams.iter() {
            let checklist = stream.checklist.lock().await;
            for pair in checklist.iter() {
                if pair.state() == CandidatePairState::Frozen && pair.foundation() == foundation {
                    pair.set_state(CandidatePairState::Waiting);
                }
            }
        }
    }

    /// Commits a nominated pair as the component's selected pair.
    pub(crate) async fn select_pair(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        pair: &Arc<CandidatePair>,
    ) {
        pair.nominated.store(true, Ordering::SeqCst);

        let previous = component.selected_pair();
        let changed = match &previous {
            Some(prev) => !Arc::ptr_eq(prev, pair),
            None => true,
        };
        if !changed {
            return;
        }

        log::info!(
            "[{}:{}]: selected pair {}",
            stream.id,
            component.id,
            pair
        );
        component.selected_pair.store(Some(Arc::clone(pair)));
        if let Ok(mut consent) = component.consent.lock() {
            consent.last_received = std::time::Instant::now();
            consent.last_check = std::time::Instant::now();
        }

        self.queue_event(AgentEvent::SelectedPairChange(
            stream.id,
            component.id,
            Arc::clone(&pair.local),
            Arc::clone(&pair.remote),
        ))
        .await;

        self.set_component_state(stream, component, ComponentState::Connected)
            .await;

        self.engage_pseudo_tcp(stream, component, pair).await;

        self.set_component_state(stream, component, ComponentState::Ready)
            .await;
    }

    /// The agent swapped roles after a conflict: pair priorities flip, and
    /// a now-controlled agent must not keep nominating.
    pub(crate) async fn on_role_swap(&self, controlling: bool) {
        self.is_controlling.store(controlling, Ordering::SeqCst);
        let streams = self.streams.lock().await;
        for stream in streams.iter() {
            let mut checklist = stream.checklist.lock().await;
            for pair in checklist.iter() {
                pair.set_role_controlling(controlling);
                if !controlling {
                    pair.use_candidate.store(false, Ordering::SeqCst);
                }
            }
            checklist.sort_by(|a, b| b.priority().cmp(&a.priority()));
        }
    }

    /// Forced or detected consent loss: the component fails immediately.
    pub(crate) async fn consent_lost(
        &self,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
    ) {
        self.set_component_state(stream, component, ComponentState::Failed)
            .await;
    }

    pub(crate) async fn close(&self) -> Result<()> {
        {
            let mut done_tx = self.done_tx.lock().await;
            if done_tx.is_none() {
                return Err(Error::ErrClosed);
            }
            done_tx.take();
        }

        let streams: Vec<Arc<Stream>> = {
            let mut streams = self.streams.lock().await;
            streams.drain(..).collect()
        };
        for stream in &streams {
            for component in &stream.components {
                component.recv_buffer.close().await;
                component.close_candidates().await;
            }
        }

        {
            let mut event_tx = self.event_tx.lock().await;
            event_tx.take();
        }

        if let Ok(mut registry) = self.stun_registry.lock() {
            let _ = registry.close();
        }

        Ok(())
    }

    pub(crate) fn get_name(&self) -> &str {
        if self.is_controlling.load(Ordering::SeqCst) {
            "controlling"
        } else {
            "controlled"
        }
    }
}
