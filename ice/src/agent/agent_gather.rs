use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use stun::agent::TransactionId;
use stun::fingerprint::FINGERPRINT;
use stun::message::*;
use stun::timer::{RetransmissionTimer, TimerAction};
use util::conn::conn_tcp::TcpListenerConn;
use util::conn::conn_udp::UdpConn;
use util::conn::{Conn, Listener};

use super::agent_config::{TurnServerConfig, TurnTransport};
use super::agent_internal::{AgentEvent, AgentInternal};
use crate::candidate::candidate_base::CandidateBaseConfig;
use crate::candidate::candidate_host::CandidateHostConfig;
use crate::candidate::candidate_relay::CandidateRelayConfig;
use crate::candidate::candidate_server_reflexive::CandidateServerReflexiveConfig;
use crate::candidate::*;
use crate::compatibility::Compatibility;
use crate::component::Component;
use crate::error::*;
use crate::state::{ComponentState, GatheringState};
use crate::stream::Stream;
use crate::tcp_type::TcpType;

/// The discard port advertised by active TCP candidates (RFC 6544).
const TCP_ACTIVE_PORT: u16 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DiscoveryType {
    ServerReflexive,
    Relay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DiscoveryState {
    /// Never transmitted; the paced loop picks these up one per tick.
    Unscheduled,
    InProgress,
    Done,
}

/// A pending gathering transaction against a STUN or TURN server.
pub(crate) struct DiscoveryItem {
    pub(crate) typ: DiscoveryType,
    pub(crate) state: DiscoveryState,
    pub(crate) server: SocketAddr,
    pub(crate) stream_id: u32,
    pub(crate) component_id: u16,
    /// The host candidate whose socket carries the transaction.
    pub(crate) host: Option<Arc<dyn Candidate + Send + Sync>>,
    pub(crate) turn: Option<TurnServerConfig>,
    pub(crate) tid: Option<TransactionId>,
    pub(crate) timer: RetransmissionTimer,
    /// Raw request bytes kept for retransmission.
    pub(crate) raw: Vec<u8>,
}

impl AgentInternal {
    /// Local addresses to bind host candidates on: the configured override
    /// when present, otherwise the default-route address (plus loopback as
    /// a fallback). Link-local addresses are filtered out.
    pub(crate) async fn gather_local_addresses(&self) -> Vec<IpAddr> {
        let mut addrs: Vec<IpAddr> = if self.local_addresses.is_empty() {
            let mut found = vec![];
            if let Ok(probe) = tokio::net::UdpSocket::bind("0.0.0.0:0").await {
                // a connected UDP socket reveals the default-route address
                // without sending a single packet
                if probe.connect("198.51.100.1:9").await.is_ok() {
                    if let Ok(local) = probe.local_addr() {
                        if !local.ip().is_unspecified() {
                            found.push(local.ip());
                        }
                    }
                }
            }
            if found.is_empty() {
                found.push(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
            }
            found
        } else {
            self.local_addresses.clone()
        };

        addrs.retain(|ip| !crate::addr::is_link_local(ip));
        addrs.truncate(self.max_local_addresses);
        addrs
    }

    /// Binds a UDP socket on `ip` within the configured port range. The
    /// range is cycled once strictly, then once more accepting ports that
    /// other components already claimed.
    async fn bind_udp_in_range(&self, ip: IpAddr) -> Result<UdpConn> {
        if self.port_min == 0 && self.port_max == 0 {
            return UdpConn::bind(SocketAddr::new(ip, 0))
                .await
                .map_err(Error::from);
        }

        for accept_duplicate in [false, true] {
            for port in self.port_min..=self.port_max {
                match UdpConn::bind(SocketAddr::new(ip, port)).await {
                    Ok(conn) => return Ok(conn),
                    Err(err) => {
                        if accept_duplicate {
                            log::debug!("port {port} unusable on second pass: {err}");
                        }
                    }
                }
            }
        }
        Err(Error::Other("port range exhausted".to_owned()))
    }

    /// Gathering entry point: host candidates first, then the paced
    /// server-reflexive and relay discoveries.
    pub(crate) async fn gather_candidates_for_stream(self: &Arc<Self>, stream: &Arc<Stream>) {
        stream
            .gathering_state
            .store(GatheringState::Gathering as u8, Ordering::SeqCst);
        self.set_stream_state(stream, ComponentState::Gathering).await;

        let addresses = self.gather_local_addresses().await;

        for component in &stream.components {
            self.gather_host_candidates(stream, component, &addresses)
                .await;
            self.queue_discoveries(stream, component).await;
        }

        let pending = {
            let discovery_list = self.discovery_list.lock().await;
            discovery_list
                .iter()
                .any(|item| item.stream_id == stream.id && item.state != DiscoveryState::Done)
        };

        if pending {
            self.start_discovery_ticker(stream.id);
        } else {
            self.finish_gathering(stream).await;
        }
    }

    async fn gather_host_candidates(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        addresses: &[IpAddr],
    ) {
        for ip in addresses {
            if self.ice_udp {
                match self.bind_udp_in_range(*ip).await {
                    Ok(conn) => {
                        let local_addr = match conn.local_addr() {
                            Ok(a) => a,
                            Err(_) => continue,
                        };
                        let host = CandidateHostConfig {
                            base_config: CandidateBaseConfig {
                                network: "udp".to_owned(),
                                address: local_addr,
                                stream_id: stream.id,
                                component: component.id,
                                compatibility: self.compatibility,
                                conn: Some(Arc::new(conn)),
                                ..CandidateBaseConfig::default()
                            },
                            tcp_type: TcpType::Unspecified,
                        }
                        .new_candidate_host();

                        match host {
                            Ok(mut host) => {
                                self.maybe_assign_candidate_credentials(&mut host);
                                let host: Arc<dyn Candidate + Send + Sync> = Arc::new(host);
                                if self.force_relay {
                                    // the socket exists only to reach TURN;
                                    // the candidate itself is withheld
                                    let _ = host.close().await;
                                } else if let Err(err) = self
                                    .add_local_candidate(stream, component, Arc::clone(&host))
                                    .await
                                {
                                    log::warn!("failed to add host candidate: {err}");
                                }
                            }
                            Err(err) => log::warn!("failed to create host candidate: {err}"),
                        }
                    }
                    Err(err) => {
                        log::warn!("cannot create socket on {ip}: {err}");
                    }
                }
            }

            if self.ice_tcp && !self.force_relay {
                self.gather_tcp_host_candidates(stream, component, *ip).await;
            }
        }
    }

    async fn gather_tcp_host_candidates(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        ip: IpAddr,
    ) {
        // passive: a listener whose accepted connections feed the component
        match TcpListenerConn::bind(SocketAddr::new(ip, 0)).await {
            Ok(listener) => {
                let local_addr = match Listener::addr(&listener) {
                    Ok(a) => a,
                    Err(_) => return,
                };
                let passive = CandidateHostConfig {
                    base_config: CandidateBaseConfig {
                        network: "tcp".to_owned(),
                        address: local_addr,
                        stream_id: stream.id,
                        component: component.id,
                        compatibility: self.compatibility,
                        ..CandidateBaseConfig::default()
                    },
                    tcp_type: TcpType::Passive,
                }
                .new_candidate_host();

                if let Ok(mut passive) = passive {
                    self.maybe_assign_candidate_credentials(&mut passive);
                    let passive: Arc<dyn Candidate + Send + Sync> = Arc::new(passive);
                    if self
                        .add_local_candidate(stream, component, Arc::clone(&passive))
                        .await
                        .is_ok()
                    {
                        self.start_tcp_accept_loop(stream, component, passive, listener);
                    }
                }
            }
            Err(err) => log::warn!("cannot listen on {ip}: {err}"),
        }

        // active: no socket until a check dials out; advertised on the
        // discard port
        let active = CandidateHostConfig {
            base_config: CandidateBaseConfig {
                network: "tcp".to_owned(),
                address: SocketAddr::new(ip, TCP_ACTIVE_PORT),
                stream_id: stream.id,
                component: component.id,
                compatibility: self.compatibility,
                ..CandidateBaseConfig::default()
            },
            tcp_type: TcpType::Active,
        }
        .new_candidate_host();

        if let Ok(mut active) = active {
            self.maybe_assign_candidate_credentials(&mut active);
            let active: Arc<dyn Candidate + Send + Sync> = Arc::new(active);
            if let Err(err) = self.add_local_candidate(stream, component, active).await {
                log::warn!("failed to add active tcp candidate: {err}");
            }
        }
    }

    fn maybe_assign_candidate_credentials(
        &self,
        candidate: &mut crate::candidate::CandidateBase,
    ) {
        if !self.compatibility.uses_candidate_credentials() {
            return;
        }
        use base64::prelude::BASE64_STANDARD;
        use base64::Engine;
        let username = BASE64_STANDARD.encode(crate::rand::generate_credential_bytes(
            crate::rand::LEN_CANDIDATE_USERNAME,
        ));
        let password = BASE64_STANDARD.encode(crate::rand::generate_credential_bytes(
            crate::rand::LEN_CANDIDATE_PASSWORD,
        ));
        candidate.set_candidate_credentials(username, password);
    }

    /// Queues srflx and relay discovery items for every eligible host
    /// candidate of the component.
    async fn queue_discoveries(self: &Arc<Self>, stream: &Arc<Stream>, component: &Arc<Component>) {
        let locals: Vec<Arc<dyn Candidate + Send + Sync>> = {
            let locals = component.local_candidates.lock().await;
            locals.clone()
        };

        let mut items = vec![];

        if !self.force_relay {
            if let Some(stun_server) = self.stun_server {
                for host in &locals {
                    if host.candidate_type() != CandidateType::Host
                        || !host.network_type().is_udp()
                        || crate::addr::is_link_local(&host.addr().ip())
                    {
                        continue;
                    }
                    if (stun_server.is_ipv4() && !host.network_type().is_ipv4())
                        || (!stun_server.is_ipv4() && host.network_type().is_ipv4())
                    {
                        continue;
                    }
                    items.push(DiscoveryItem {
                        typ: DiscoveryType::ServerReflexive,
                        state: DiscoveryState::Unscheduled,
                        server: stun_server,
                        stream_id: stream.id,
                        component_id: component.id,
                        host: Some(Arc::clone(host)),
                        turn: None,
                        tid: None,
                        timer: RetransmissionTimer::new(
                            self.stun_initial_timeout,
                            self.stun_max_retransmissions,
                            false,
                            self.stun_reliable_timeout,
                        ),
                        raw: vec![],
                    });
                }
            }
        }

        let turn_servers: Vec<TurnServerConfig> = component
            .turn_servers
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        for turn_server in turn_servers.iter().take(self.max_turn_servers) {
            if turn_server.transport != TurnTransport::Udp {
                // relaying over TCP/TLS needs the proxy layers this core
                // treats as external collaborators
                log::warn!("skipping non-UDP TURN server {}", turn_server.server);
                continue;
            }
            items.push(DiscoveryItem {
                typ: DiscoveryType::Relay,
                state: DiscoveryState::Unscheduled,
                server: turn_server.server,
                stream_id: stream.id,
                component_id: component.id,
                host: None,
                turn: Some(turn_server.clone()),
                tid: None,
                timer: RetransmissionTimer::new(
                    self.stun_initial_timeout,
                    self.stun_max_retransmissions,
                    false,
                    self.stun_reliable_timeout,
                ),
                raw: vec![],
            });
        }

        let mut discovery_list = self.discovery_list.lock().await;
        discovery_list.extend(items);
    }

    /// The paced discovery loop: every Ta, start at most one unscheduled
    /// item; otherwise advance the retransmission timers of the items in
    /// flight.
    fn start_discovery_ticker(self: &Arc<Self>, stream_id: u32) {
        let ai = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ai.timer_ta);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if ai.done_tx.lock().await.is_none() {
                    return;
                }
                if ai.discovery_tick(stream_id).await {
                    return;
                }
            }
        });
    }

    /// One discovery tick; true once everything for the stream is done.
    pub(crate) async fn discovery_tick(self: &Arc<Self>, stream_id: u32) -> bool {
        let mut to_start: Option<usize> = None;
        let mut retransmit: Vec<(usize, Vec<u8>)> = vec![];
        let mut expired: Vec<usize> = vec![];

        {
            let mut discovery_list = self.discovery_list.lock().await;
            let now = Instant::now();

            if let Some(idx) = discovery_list
                .iter()
                .position(|i| i.stream_id == stream_id && i.state == DiscoveryState::Unscheduled)
            {
                to_start = Some(idx);
            } else {
                for (idx, item) in discovery_list.iter_mut().enumerate() {
                    if item.stream_id != stream_id
                        || item.state != DiscoveryState::InProgress
                        || item.typ != DiscoveryType::ServerReflexive
                    {
                        continue;
                    }
                    if item.timer.has_fired(now) {
                        match item.timer.on_timeout(now) {
                            TimerAction::Retransmit => {
                                retransmit.push((idx, item.raw.clone()));
                            }
                            TimerAction::Fail => expired.push(idx),
                        }
                    }
                }
                for idx in &expired {
                    discovery_list[*idx].state = DiscoveryState::Done;
                    log::debug!(
                        "srflx discovery against {} exhausted retransmissions",
                        discovery_list[*idx].server
                    );
                }
            }
        }

        if let Some(idx) = to_start {
            self.start_discovery_item(idx).await;
        }
        for (idx, raw) in retransmit {
            let (host, server) = {
                let discovery_list = self.discovery_list.lock().await;
                let item = &discovery_list[idx];
                (item.host.clone(), item.server)
            };
            if let Some(host) = host {
                if let Some(conn) = host.get_conn() {
                    let _ = conn.send_to(&raw, server).await;
                }
            }
        }

        self.check_gathering_done(stream_id).await
    }

    async fn start_discovery_item(self: &Arc<Self>, idx: usize) {
        enum Work {
            Srflx(Arc<dyn Candidate + Send + Sync>, SocketAddr, Vec<u8>),
            Relay(TurnServerConfig, u32, u16),
        }

        let work = {
            let mut discovery_list = self.discovery_list.lock().await;
            let item = match discovery_list.get_mut(idx) {
                Some(item) => item,
                None => return,
            };
            item.state = DiscoveryState::InProgress;

            match item.typ {
                DiscoveryType::ServerReflexive => {
                    let host = match &item.host {
                        Some(h) => Arc::clone(h),
                        None => {
                            item.state = DiscoveryState::Done;
                            return;
                        }
                    };

                    let mut msg = Message::new();
                    let tid = TransactionId::new();
                    let mut setters: Vec<Box<dyn Setter>> =
                        vec![Box::new(BINDING_REQUEST), Box::new(tid)];
                    if self.dialect().add_fingerprint {
                        setters.push(Box::new(FINGERPRINT));
                    }
                    if msg.build(&setters).is_err() {
                        item.state = DiscoveryState::Done;
                        return;
                    }

                    item.tid = Some(tid);
                    item.raw = msg.raw.clone();
                    item.timer.start(Instant::now());
                    Work::Srflx(host, item.server, msg.raw.clone())
                }
                DiscoveryType::Relay => {
                    let turn = match &item.turn {
                        Some(t) => t.clone(),
                        None => {
                            item.state = DiscoveryState::Done;
                            return;
                        }
                    };
                    Work::Relay(turn, item.stream_id, item.component_id)
                }
            }
        };

        match work {
            Work::Srflx(host, server, raw) => {
                if let Some(conn) = host.get_conn() {
                    if let Err(err) = conn.send_to(&raw, server).await {
                        log::debug!("srflx discovery send failed: {err}");
                    }
                }
            }
            Work::Relay(turn, stream_id, component_id) => {
                let ai = Arc::clone(self);
                tokio::spawn(async move {
                    ai.run_relay_discovery(idx, turn, stream_id, component_id)
                        .await;
                });
            }
        }
    }

    /// Allocates on a TURN server and registers the relayed candidate.
    async fn run_relay_discovery(
        self: &Arc<Self>,
        idx: usize,
        turn_server: TurnServerConfig,
        stream_id: u32,
        component_id: u16,
    ) {
        let result = self
            .allocate_relay_candidate(&turn_server, stream_id, component_id)
            .await;

        if let Err(err) = result {
            log::warn!(
                "relay discovery against {} failed: {err}",
                turn_server.server
            );
        }

        {
            let mut discovery_list = self.discovery_list.lock().await;
            if let Some(item) = discovery_list.get_mut(idx) {
                item.state = DiscoveryState::Done;
            }
        }
        self.check_gathering_done(stream_id).await;
    }

    async fn allocate_relay_candidate(
        self: &Arc<Self>,
        turn_server: &TurnServerConfig,
        stream_id: u32,
        component_id: u16,
    ) -> Result<()> {
        let (stream, component) = self.find_stream_component(stream_id, component_id).await?;

        let bind_ip: IpAddr = if turn_server.server.is_ipv4() {
            "0.0.0.0".parse()?
        } else {
            "::".parse()?
        };
        let base = UdpConn::bind(SocketAddr::new(bind_ip, 0)).await?;

        let (decoded_username, decoded_password) =
            if self.compatibility.uses_candidate_credentials() {
                use base64::prelude::BASE64_STANDARD;
                use base64::Engine;
                (
                    BASE64_STANDARD.decode(&turn_server.username).ok(),
                    BASE64_STANDARD.decode(&turn_server.password).ok(),
                )
            } else {
                (None, None)
            };

        let client = turn::client::Client::new(turn::client::ClientConfig {
            turn_serv_addr: turn_server.server,
            username: turn_server.username.clone(),
            password: turn_server.password.clone(),
            realm: turn_server.realm.clone(),
            software: String::new(),
            decoded_username,
            decoded_password,
            variant: self.compatibility.turn_variant(),
            even_port: false,
            rto: self.stun_initial_timeout,
            max_retransmissions: self.stun_max_retransmissions,
            conn: Arc::new(base),
        });
        client.listen().await?;

        let relayed = client.allocate().await?;
        let relayed_addr = relayed.local_addr().map_err(Error::from)?;

        let mut relay = CandidateRelayConfig {
            base_config: CandidateBaseConfig {
                network: "udp".to_owned(),
                address: relayed_addr,
                stream_id,
                component: component_id,
                compatibility: self.compatibility,
                conn: Some(relayed),
                ..CandidateBaseConfig::default()
            },
            rel_addr: None,
            server_addr: Some(turn_server.server),
            relay_client: Some(client),
        }
        .new_candidate_relay()?;
        self.maybe_assign_candidate_credentials(&mut relay);

        let relay: Arc<dyn Candidate + Send + Sync> = Arc::new(relay);
        self.add_local_candidate(&stream, &component, relay).await?;

        // the R2 dialect drops server-reflexive candidates once a relayed
        // one from the same server exists
        if self.compatibility == Compatibility::Oc2007R2 {
            self.prune_srflx_candidates(&component).await;
        }

        Ok(())
    }

    async fn prune_srflx_candidates(&self, component: &Arc<Component>) {
        let mut pruned = vec![];
        {
            let mut locals = component.local_candidates.lock().await;
            locals.retain(|c| {
                if c.candidate_type() == CandidateType::ServerReflexive {
                    pruned.push(Arc::clone(c));
                    false
                } else {
                    true
                }
            });
        }
        for c in pruned {
            let _ = c.close().await;
        }
    }

    /// Handles a Binding success that matched a discovery transaction id.
    pub(crate) async fn handle_discovery_response(self: &Arc<Self>, msg: &Message) {
        let matched = {
            let mut discovery_list = self.discovery_list.lock().await;
            discovery_list
                .iter_mut()
                .enumerate()
                .find(|(_, item)| {
                    item.state == DiscoveryState::InProgress && item.tid == Some(msg.transaction_id)
                })
                .map(|(idx, item)| {
                    item.state = DiscoveryState::Done;
                    item.timer.stop();
                    (
                        idx,
                        item.stream_id,
                        item.component_id,
                        item.host.clone(),
                    )
                })
        };

        let Some((_idx, stream_id, component_id, host)) = matched else {
            return;
        };
        let Some(host) = host else { return };

        let mut mapped = stun::xoraddr::XorMappedAddress::default();
        let mapped_addr = if mapped.get_from(msg).is_ok() {
            Some(SocketAddr::new(mapped.ip, mapped.port))
        } else {
            let mut plain = stun::addr::MappedAddress::default();
            plain
                .get_from(msg)
                .ok()
                .map(|_| SocketAddr::new(plain.ip, plain.port))
        };

        let Some(mapped_addr) = mapped_addr else {
            self.check_gathering_done(stream_id).await;
            return;
        };

        if mapped_addr == host.addr() {
            // not behind a NAT on this path: the reflection is redundant
            self.check_gathering_done(stream_id).await;
            return;
        }

        if let Ok((stream, component)) = self.find_stream_component(stream_id, component_id).await
        {
            let srflx = CandidateServerReflexiveConfig {
                base_config: CandidateBaseConfig {
                    network: "udp".to_owned(),
                    address: mapped_addr,
                    stream_id,
                    component: component_id,
                    compatibility: self.compatibility,
                    conn: host.get_conn(),
                    ..CandidateBaseConfig::default()
                },
                base_addr: host.addr(),
            }
            .new_candidate_server_reflexive();

            match srflx {
                Ok(mut srflx) => {
                    self.maybe_assign_candidate_credentials(&mut srflx);
                    let srflx: Arc<dyn Candidate + Send + Sync> = Arc::new(srflx);
                    if let Err(err) = self.add_local_candidate(&stream, &component, srflx).await {
                        log::warn!("failed to add srflx candidate: {err}");
                    }
                }
                Err(err) => log::warn!("failed to create srflx candidate: {err}"),
            }
        }

        self.check_gathering_done(stream_id).await;
    }

    /// True (and signals) once every discovery item of the stream is done.
    pub(crate) async fn check_gathering_done(self: &Arc<Self>, stream_id: u32) -> bool {
        let all_done = {
            let discovery_list = self.discovery_list.lock().await;
            !discovery_list
                .iter()
                .any(|item| item.stream_id == stream_id && item.state != DiscoveryState::Done)
        };
        if !all_done {
            return false;
        }

        if let Ok(stream) = self.find_stream(stream_id).await {
            if stream.gathering_state() == GatheringState::Gathering {
                self.finish_gathering(&stream).await;
            }
        }
        true
    }

    pub(crate) async fn finish_gathering(self: &Arc<Self>, stream: &Arc<Stream>) {
        stream
            .gathering_state
            .store(GatheringState::Complete as u8, Ordering::SeqCst);

        // a component that gathered nothing at all can never connect
        for component in &stream.components {
            let empty = component.local_candidates.lock().await.is_empty();
            if empty {
                self.set_component_state(stream, component, ComponentState::Failed)
                    .await;
            }
        }

        self.queue_event(AgentEvent::GatheringDone(stream.id)).await;
        log::debug!("[{}]: gathering done", stream.id);
    }

    /// Accepted connections on a passive TCP listener join the component's
    /// receive path; the first one also becomes the candidate's socket.
    fn start_tcp_accept_loop(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        candidate: Arc<dyn Candidate + Send + Sync>,
        listener: TcpListenerConn,
    ) {
        let ai = Arc::clone(self);
        let stream = Arc::clone(stream);
        let component = Arc::clone(component);
        tokio::spawn(async move {
            loop {
                let (conn, raddr) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(err) => {
                        log::debug!("tcp accept loop ended: {err}");
                        return;
                    }
                };
                log::debug!(
                    "[{}:{}]: accepted tcp connection from {}",
                    stream.id,
                    component.id,
                    raddr
                );
                if candidate.get_conn().is_none() {
                    candidate.set_conn(Arc::clone(&conn));
                }
                ai.start_conn_recv_loop(
                    &stream,
                    &component,
                    Arc::clone(&candidate),
                    conn,
                    true,
                );
            }
        });
    }
}
