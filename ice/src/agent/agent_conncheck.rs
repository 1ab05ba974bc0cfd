use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use stun::agent::TransactionId;
use stun::error_code::*;
use stun::fingerprint::FINGERPRINT;
use stun::integrity::MessageIntegrity;
use stun::message::*;
use stun::textattrs::Username;
use stun::timer::{RetransmissionTimer, TimerAction};

use super::agent_config::{
    NominationMode, CONSENT_CHECK_INTERVAL, CONSENT_TIMEOUT, DEFAULT_KEEPALIVE_INTERVAL,
};
use super::agent_internal::{AgentEvent, AgentInternal};
use crate::candidate::candidate_base::CandidateBaseConfig;
use crate::candidate::candidate_peer_reflexive::CandidatePeerReflexiveConfig;
use crate::candidate::*;
use crate::component::Component;
use crate::control::{AttrControlled, AttrControlling, AttrNomination};
use crate::priority::PriorityAttr;
use crate::state::ComponentState;
use crate::stream::Stream;
use crate::use_candidate::UseCandidateAttr;

impl AgentInternal {
    /// One Ta tick of the check scheduler: a Waiting pair first, then the
    /// triggered queue, then retransmission housekeeping, then the
    /// terminal-state evaluation.
    pub(crate) async fn conncheck_tick(self: &Arc<Self>) {
        if !self.full_mode {
            // lite agents never initiate checks
            return;
        }

        let streams: Vec<Arc<Stream>> = {
            let streams = self.streams.lock().await;
            streams.clone()
        };

        let mut transmitted = false;
        for stream in &streams {
            if !stream.has_remote_credentials() {
                continue;
            }

            if !transmitted {
                if let Some(pair) = self.next_waiting_pair(stream).await {
                    self.send_check(stream, &pair).await;
                    transmitted = true;
                    continue;
                }
                if let Some(pair) = {
                    let mut triggered = stream.triggered_queue.lock().await;
                    triggered.pop_front()
                } {
                    // the pair may have completed while queued
                    if pair.state() != CandidatePairState::InProgress {
                        self.send_check(stream, &pair).await;
                        transmitted = true;
                        continue;
                    }
                }
            }

            self.check_retransmissions(stream).await;
            self.evaluate_checklist(stream).await;
        }
    }

    async fn next_waiting_pair(&self, stream: &Arc<Stream>) -> Option<Arc<CandidatePair>> {
        let checklist = stream.checklist.lock().await;
        checklist
            .iter()
            .filter(|p| p.state() == CandidatePairState::Waiting)
            .max_by_key(|p| p.priority())
            .cloned()
    }

    /// Credentials for an outgoing check on `remote`: dialects with
    /// per-candidate credentials override the stream pair.
    fn check_credentials(
        &self,
        stream: &Stream,
        remote: &Arc<dyn Candidate + Send + Sync>,
    ) -> (String, String) {
        let (local_ufrag, _) = stream.local_credentials();
        let (remote_ufrag, remote_pwd) = stream.remote_credentials();

        if self.compatibility.uses_candidate_credentials() {
            if let (Some(r_user), Some(r_pwd)) =
                (remote.candidate_username(), remote.candidate_password())
            {
                return (format!("{r_user}:{local_ufrag}"), r_pwd);
            }
        }
        (format!("{remote_ufrag}:{local_ufrag}"), remote_pwd)
    }

    /// Sends one connectivity check on `pair` and marks it In-Progress.
    pub(crate) async fn send_check(self: &Arc<Self>, stream: &Arc<Stream>, pair: &Arc<CandidatePair>) {
        let controlling = self.is_controlling.load(Ordering::SeqCst);
        let tie_breaker = self.tie_breaker.load(Ordering::SeqCst);
        let dialect = self.dialect();

        let (username, pwd) = self.check_credentials(stream, &pair.remote);

        let use_candidate = controlling
            && (self.nomination_mode == NominationMode::Aggressive
                || pair.use_candidate.load(Ordering::SeqCst));
        if use_candidate {
            pair.use_candidate.store(true, Ordering::SeqCst);
        }

        let renominating = use_candidate
            && self.support_renomination
            && self
                .component_of_pair(stream, pair)
                .map(|c| c.selected_pair().is_some())
                .unwrap_or(false);

        let tid = TransactionId::new();
        let prflx_priority = self.compatibility.candidate_priority(
            CandidateType::PeerReflexive,
            pair.local.tcp_type(),
            pair.local.network_type().is_tcp(),
            pair.local.component(),
        );

        let mut setters: Vec<Box<dyn Setter>> = vec![
            Box::new(BINDING_REQUEST),
            Box::new(tid),
            Box::new(Username::new(stun::attributes::ATTR_USERNAME, username)),
            Box::new(PriorityAttr(prflx_priority)),
        ];
        if controlling {
            setters.push(Box::new(AttrControlling(tie_breaker)));
        } else {
            setters.push(Box::new(AttrControlled(tie_breaker)));
        }
        if use_candidate {
            setters.push(Box::new(UseCandidateAttr::new()));
        }
        if renominating {
            setters.push(Box::new(AttrNomination(1)));
        }
        if !dialect.ignore_credentials {
            setters.push(Box::new(MessageIntegrity::new_short_term_integrity(pwd)));
        }
        if dialect.add_fingerprint {
            setters.push(Box::new(FINGERPRINT));
        }

        let mut msg = Message::new();
        msg.unaligned = dialect.unaligned_attributes;
        if let Err(err) = msg.build(&setters) {
            log::error!("[{}]: failed to build check: {}", self.get_name(), err);
            return;
        }

        // a re-check on the selected pair drops Ready back to Connected
        // until it confirms
        if let Some(component) = self.component_of_pair(stream, pair) {
            if let Some(selected) = component.selected_pair() {
                if Arc::ptr_eq(&selected, pair)
                    && component.state() == ComponentState::Ready
                {
                    self.set_component_state(stream, &component, ComponentState::Connected)
                        .await;
                }
            }
        }

        pair.set_state(CandidatePairState::InProgress);
        pair.set_transaction_id(Some(tid));
        pair.check_sent_controlling.store(controlling, Ordering::SeqCst);
        if let Ok(mut raw) = pair.last_request.lock() {
            *raw = msg.raw.clone();
        }
        pair.binding_request_count.fetch_add(1, Ordering::SeqCst);
        {
            let reliable = pair.local.network_type().is_tcp();
            if let Ok(mut timer) = pair.timer.lock() {
                *timer = RetransmissionTimer::new(
                    self.conncheck_initial_timeout,
                    self.stun_max_retransmissions,
                    reliable,
                    self.stun_reliable_timeout,
                );
                timer.start(Instant::now());
            }
        }
        if let Ok(mut registry) = self.stun_registry.lock() {
            let _ = registry.remember_transaction(tid, Instant::now() + Duration::from_secs(30));
        }

        log::trace!(
            "[{}]: check from {} to {}",
            self.get_name(),
            pair.local,
            pair.remote
        );
        self.send_stun_on_pair(stream, pair, msg.raw).await;
    }

    fn component_of_pair(&self, stream: &Arc<Stream>, pair: &Arc<CandidatePair>) -> Option<Arc<Component>> {
        stream.component(pair.local.component()).cloned()
    }

    /// Ships STUN over a pair: framed on stream transports, dialing the
    /// active TCP side on first use.
    async fn send_stun_on_pair(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        pair: &Arc<CandidatePair>,
        raw: Vec<u8>,
    ) {
        use crate::tcp_type::TcpType;

        let is_tcp = pair.local.network_type().is_tcp();
        let payload = if is_tcp {
            crate::framing::encode_frame(&raw)
        } else {
            raw
        };

        if is_tcp
            && pair.local.tcp_type() == TcpType::Active
            && pair.local.get_conn().is_none()
        {
            let ai = Arc::clone(self);
            let stream = Arc::clone(stream);
            let pair = Arc::clone(pair);
            tokio::spawn(async move {
                let remote_addr = pair.remote.addr();
                match util::conn::conn_tcp::TcpConn::connect_to(remote_addr).await {
                    Ok(conn) => {
                        let conn: Arc<dyn util::Conn + Send + Sync> = Arc::new(conn);
                        pair.local.set_conn(Arc::clone(&conn));
                        if let Some(component) = ai.component_of_pair(&stream, &pair) {
                            ai.start_conn_recv_loop(
                                &stream,
                                &component,
                                Arc::clone(&pair.local),
                                conn,
                                true,
                            );
                        }
                        if let Err(err) = pair.write(&payload).await {
                            log::debug!("tcp check send failed: {err}");
                        }
                    }
                    Err(err) => {
                        log::debug!("tcp dial to {remote_addr} failed: {err}");
                        pair.set_state(CandidatePairState::Failed);
                    }
                }
            });
            return;
        }

        if let Err(err) = pair.write(&payload).await {
            log::trace!("[{}]: failed to send check: {}", self.get_name(), err);
        }
    }

    /// Retransmits or expires In-Progress pairs whose timer fired.
    async fn check_retransmissions(&self, stream: &Arc<Stream>) {
        let pairs: Vec<Arc<CandidatePair>> = {
            let checklist = stream.checklist.lock().await;
            checklist
                .iter()
                .filter(|p| p.state() == CandidatePairState::InProgress)
                .cloned()
                .collect()
        };

        let now = Instant::now();
        for pair in pairs {
            let action = {
                match pair.timer.lock() {
                    Ok(mut timer) => {
                        if timer.has_fired(now) {
                            Some(timer.on_timeout(now))
                        } else {
                            None
                        }
                    }
                    Err(_) => None,
                }
            };

            match action {
                Some(TimerAction::Retransmit) => {
                    let raw = pair.last_request.lock().map(|r| r.clone()).unwrap_or_default();
                    if raw.is_empty() {
                        continue;
                    }
                    let payload = if pair.local.network_type().is_tcp() {
                        crate::framing::encode_frame(&raw)
                    } else {
                        raw
                    };
                    if let Err(err) = pair.write(&payload).await {
                        log::trace!("[{}]: retransmit failed: {}", self.get_name(), err);
                    }
                }
                Some(TimerAction::Fail) => {
                    log::debug!("[{}]: pair timed out: {}", self.get_name(), pair);
                    pair.set_state(CandidatePairState::Failed);
                    if let Some(tid) = pair.current_transaction_id() {
                        if let Ok(mut registry) = self.stun_registry.lock() {
                            let _ = registry.forget_transaction(tid);
                        }
                    }
                    pair.set_transaction_id(None);
                }
                None => {}
            }
        }
    }

    /// Step 4 of the tick: once every pair is terminal, either settle the
    /// stream or count down the idle timeout toward Failed.
    async fn evaluate_checklist(&self, stream: &Arc<Stream>) {
        let (all_terminal, any_succeeded, empty) = {
            let checklist = stream.checklist.lock().await;
            let all_terminal = checklist.iter().all(|p| {
                matches!(
                    p.state(),
                    CandidatePairState::Succeeded | CandidatePairState::Failed
                )
            });
            let any_succeeded = checklist
                .iter()
                .any(|p| p.state() == CandidatePairState::Succeeded);
            (all_terminal, any_succeeded, checklist.is_empty())
        };

        if !all_terminal && !empty {
            if let Ok(mut since) = stream.all_failed_since.lock() {
                *since = None;
            }
            return;
        }
        if any_succeeded {
            return;
        }

        // nothing works: trickle defers the verdict until the peer is done
        if self.ice_trickle && !stream.peer_gathering_done.load(Ordering::SeqCst) {
            return;
        }
        if empty && !stream.has_remote_credentials() {
            return;
        }

        let failed_long_enough = {
            match stream.all_failed_since.lock() {
                Ok(mut since) => match *since {
                    Some(t) => t.elapsed() >= self.idle_timeout,
                    None => {
                        *since = Some(Instant::now());
                        false
                    }
                },
                Err(_) => false,
            }
        };

        if failed_long_enough {
            for component in &stream.components {
                if component.selected_pair().is_none() {
                    self.set_component_state(stream, component, ComponentState::Failed)
                        .await;
                }
            }
        }
    }

    /// Processes an authenticated Binding request.
    pub(crate) async fn handle_binding_request(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        local: &Arc<dyn Candidate + Send + Sync>,
        msg: &Message,
        src_addr: SocketAddr,
    ) -> bool {
        let dialect = self.dialect();

        if !dialect.ignore_credentials {
            let (local_ufrag, _) = stream.local_credentials();
            match msg.get(stun::attributes::ATTR_USERNAME) {
                Ok(username) => {
                    let username = String::from_utf8_lossy(&username).to_string();
                    if !username.starts_with(&format!("{local_ufrag}:")) {
                        log::warn!(
                            "[{}]: request from {} for a different ufrag",
                            self.get_name(),
                            src_addr
                        );
                        return true;
                    }
                }
                Err(_) => return true,
            }
        }

        // role conflict resolution (the larger tie-breaker keeps its role)
        let controlling = self.is_controlling.load(Ordering::SeqCst);
        let our_tie_breaker = self.tie_breaker.load(Ordering::SeqCst);
        if controlling {
            let mut theirs = AttrControlling::default();
            if theirs.get_from(msg).is_ok() {
                if our_tie_breaker >= theirs.0 {
                    self.send_role_conflict(stream, local, msg, src_addr).await;
                    return true;
                }
                log::debug!("[{}]: role conflict, switching to controlled", self.get_name());
                self.on_role_swap(false).await;
            }
        } else {
            let mut theirs = AttrControlled::default();
            if theirs.get_from(msg).is_ok() {
                if our_tie_breaker < theirs.0 {
                    self.send_role_conflict(stream, local, msg, src_addr).await;
                    return true;
                }
                log::debug!("[{}]: role conflict, switching to controlling", self.get_name());
                self.on_role_swap(true).await;
            }
        }

        if !stream.initial_binding_request_seen.swap(true, Ordering::SeqCst) {
            self.queue_event(AgentEvent::InitialBindingRequest(stream.id)).await;
        }

        // learn a peer-reflexive remote candidate from unknown sources
        let remote = match self.find_remote_candidate(component, src_addr).await {
            Some(remote) => remote,
            None => {
                let mut priority = PriorityAttr::default();
                let _ = priority.get_from(msg);

                let prflx = CandidatePeerReflexiveConfig {
                    base_config: CandidateBaseConfig {
                        network: local.network_type().network_short(),
                        address: src_addr,
                        stream_id: stream.id,
                        component: component.id,
                        priority: priority.0,
                        compatibility: self.compatibility,
                        ..CandidateBaseConfig::default()
                    },
                    base_addr: src_addr,
                }
                .new_candidate_peer_reflexive();

                match prflx {
                    Ok(prflx) => {
                        let prflx: Arc<dyn Candidate + Send + Sync> = Arc::new(prflx);
                        log::debug!(
                            "[{}]: learned peer-reflexive remote {}",
                            self.get_name(),
                            src_addr
                        );
                        self.add_remote_candidate(stream, component, Arc::clone(&prflx))
                            .await;
                        prflx
                    }
                    Err(err) => {
                        log::error!("[{}]: failed to create prflx: {}", self.get_name(), err);
                        return true;
                    }
                }
            }
        };
        remote.seen(false);
        self.note_consent_traffic(component, &remote);

        self.send_binding_success(stream, local, msg, src_addr).await;

        // triggered check / nomination handling on the matching pair
        let pair = self.find_pair(stream, local, &remote).await;
        let Some(pair) = pair else {
            return true;
        };

        // only the controlled side acts on a nomination
        let use_candidate = !self.is_controlling.load(Ordering::SeqCst)
            && (UseCandidateAttr::is_set(msg)
                || (self.support_renomination
                    && msg.contains(stun::attributes::ATTR_NOMINATION)));

        if use_candidate {
            if pair.state() == CandidatePairState::Succeeded {
                let renomination_allowed =
                    self.support_renomination || component.selected_pair().is_none();
                if renomination_allowed {
                    self.select_pair(stream, component, &pair).await;
                }
            } else {
                // nominate as soon as the triggered check validates
                pair.nominate_on_success.store(true, Ordering::SeqCst);
            }
        }

        match pair.state() {
            CandidatePairState::Frozen
            | CandidatePairState::Waiting
            | CandidatePairState::Failed => {
                let mut triggered = stream.triggered_queue.lock().await;
                if !triggered.iter().any(|p| Arc::ptr_eq(p, &pair)) {
                    triggered.push_back(Arc::clone(&pair));
                }
            }
            CandidatePairState::InProgress | CandidatePairState::Succeeded => {}
        }

        true
    }

    async fn send_role_conflict(
        &self,
        stream: &Arc<Stream>,
        local: &Arc<dyn Candidate + Send + Sync>,
        request: &Message,
        src_addr: SocketAddr,
    ) {
        let dialect = self.dialect();
        let (_, local_pwd) = stream.local_credentials();

        let mut setters: Vec<Box<dyn Setter>> = vec![
            Box::new(BINDING_ERROR),
            Box::new(request.clone()),
            Box::new(ErrorCodeAttribute {
                code: CODE_ROLE_CONFLICT,
                reason: b"Role Conflict".to_vec(),
            }),
        ];
        if !dialect.ignore_credentials {
            setters.push(Box::new(MessageIntegrity::new_short_term_integrity(
                local_pwd,
            )));
        }
        if dialect.add_fingerprint {
            setters.push(Box::new(FINGERPRINT));
        }

        let mut msg = Message::new();
        msg.unaligned = dialect.unaligned_attributes;
        if msg.build(&setters).is_ok() {
            self.write_raw_to(local, &msg.raw, src_addr).await;
        }
    }

    async fn send_binding_success(
        &self,
        stream: &Arc<Stream>,
        local: &Arc<dyn Candidate + Send + Sync>,
        request: &Message,
        src_addr: SocketAddr,
    ) {
        let dialect = self.dialect();
        let (_, local_pwd) = stream.local_credentials();

        let mut setters: Vec<Box<dyn Setter>> = vec![
            Box::new(BINDING_SUCCESS),
            Box::new(request.clone()),
            Box::new(stun::xoraddr::XorMappedAddress {
                ip: src_addr.ip(),
                port: src_addr.port(),
            }),
        ];
        if !dialect.ignore_credentials {
            setters.push(Box::new(MessageIntegrity::new_short_term_integrity(
                local_pwd,
            )));
        }
        if dialect.add_fingerprint {
            setters.push(Box::new(FINGERPRINT));
        }

        let mut msg = Message::new();
        msg.unaligned = dialect.unaligned_attributes;
        match msg.build(&setters) {
            Ok(()) => self.write_raw_to(local, &msg.raw, src_addr).await,
            Err(err) => log::warn!(
                "[{}]: failed to build binding success: {}",
                self.get_name(),
                err
            ),
        }
    }

    /// Raw write from a local candidate's socket, framed on stream
    /// transports.
    async fn write_raw_to(
        &self,
        local: &Arc<dyn Candidate + Send + Sync>,
        raw: &[u8],
        dst: SocketAddr,
    ) {
        let payload = if local.network_type().is_tcp() {
            crate::framing::encode_frame(raw)
        } else {
            raw.to_vec()
        };
        if let Some(conn) = local.get_conn() {
            if let Err(err) = conn.send_to(&payload, dst).await {
                log::trace!("[{}]: failed to send response: {}", self.get_name(), err);
            }
            local.seen(true);
        }
    }

    pub(crate) async fn find_pair(
        &self,
        stream: &Arc<Stream>,
        local: &Arc<dyn Candidate + Send + Sync>,
        remote: &Arc<dyn Candidate + Send + Sync>,
    ) -> Option<Arc<CandidatePair>> {
        let checklist = stream.checklist.lock().await;
        checklist
            .iter()
            .find(|p| p.local.equal(&**local) && p.remote.equal(&**remote))
            .cloned()
    }

    /// Processes a Binding response matched to an outstanding check.
    pub(crate) async fn handle_check_response(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        _local: &Arc<dyn Candidate + Send + Sync>,
        msg: &Message,
        src_addr: SocketAddr,
    ) -> bool {
        let pair = {
            let checklist = stream.checklist.lock().await;
            checklist
                .iter()
                .find(|p| p.current_transaction_id() == Some(msg.transaction_id))
                .cloned()
        };

        let Some(pair) = pair else {
            log::trace!(
                "[{}]: response with unknown transaction id from {}",
                self.get_name(),
                src_addr
            );
            return false;
        };

        if let Ok(mut registry) = self.stun_registry.lock() {
            let _ = registry.forget_transaction(msg.transaction_id);
        }

        if msg.typ.class == CLASS_ERROR_RESPONSE {
            return self
                .handle_check_error(stream, component, &pair, msg)
                .await;
        }

        // responses must come back from the address the check went to
        if src_addr != pair.remote.addr() {
            log::debug!(
                "[{}]: discarding response: expected {}, got {}",
                self.get_name(),
                pair.remote.addr(),
                src_addr
            );
            return true;
        }

        // a reflection that differs from the local address means the peer
        // sees a peer-reflexive view of this candidate
        let mut mapped = stun::xoraddr::XorMappedAddress::default();
        if mapped.get_from(msg).is_ok() {
            let mapped_addr = SocketAddr::new(mapped.ip, mapped.port);
            if mapped_addr != pair.local.addr()
                && self
                    .local_candidate_by_addr(component, mapped_addr)
                    .await
                    .is_none()
            {
                self.learn_prflx_local(stream, component, &pair, mapped_addr)
                    .await;
            }
        }

        pair.set_state(CandidatePairState::Succeeded);
        pair.set_transaction_id(None);
        if let Ok(mut timer) = pair.timer.lock() {
            timer.stop();
        }
        pair.remote.seen(false);
        self.note_consent_traffic(component, &pair.remote);

        log::debug!("[{}]: pair succeeded: {}", self.get_name(), pair);
        self.unfreeze_foundation(&pair.foundation()).await;

        if component.state() == ComponentState::Connecting {
            self.set_component_state(stream, component, ComponentState::Connected)
                .await;
        }

        // a confirmed re-check on the selected pair restores Ready
        if let Some(selected) = component.selected_pair() {
            if Arc::ptr_eq(&selected, &pair)
                && component.state() == ComponentState::Connected
            {
                self.set_component_state(stream, component, ComponentState::Ready)
                    .await;
            }
        }

        let nominated_now = pair.use_candidate.load(Ordering::SeqCst)
            || pair.nominate_on_success.swap(false, Ordering::SeqCst);

        if nominated_now {
            let better = match component.selected_pair() {
                Some(selected) => pair.priority() > selected.priority(),
                None => true,
            };
            if better {
                self.select_pair(stream, component, &pair).await;
            }
        } else if self.is_controlling.load(Ordering::SeqCst)
            && self.nomination_mode == NominationMode::Regular
            && component.selected_pair().is_none()
        {
            // regular nomination: confirm the best validated pair with a
            // second, USE-CANDIDATE carrying check
            let best = self.get_best_valid_pair(stream, component).await;
            if let Some(best) = best {
                if Arc::ptr_eq(&best, &pair) {
                    pair.use_candidate.store(true, Ordering::SeqCst);
                    let mut triggered = stream.triggered_queue.lock().await;
                    if !triggered.iter().any(|p| Arc::ptr_eq(p, &pair)) {
                        triggered.push_back(Arc::clone(&pair));
                    }
                }
            }
        }

        true
    }

    async fn handle_check_error(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        pair: &Arc<CandidatePair>,
        msg: &Message,
    ) -> bool {
        let mut code = ErrorCodeAttribute::default();
        let code = match code.get_from(msg) {
            Ok(()) => code.code,
            Err(_) => {
                pair.set_state(CandidatePairState::Failed);
                pair.set_transaction_id(None);
                return true;
            }
        };

        if code == CODE_ROLE_CONFLICT {
            // the peer kept its role; we swap and retry the check, unless
            // the role already changed after this check went out (a stale
            // 487 must not flip it back)
            let controlling = self.is_controlling.load(Ordering::SeqCst);
            if pair.check_sent_controlling.load(Ordering::SeqCst) == controlling {
                log::debug!(
                    "[{}]: 487 role conflict, switching to {}",
                    self.get_name(),
                    if controlling { "controlled" } else { "controlling" }
                );
                self.on_role_swap(!controlling).await;
            }

            pair.set_state(CandidatePairState::Waiting);
            pair.set_transaction_id(None);
            let mut triggered = stream.triggered_queue.lock().await;
            if !triggered.iter().any(|p| Arc::ptr_eq(p, pair)) {
                triggered.push_back(Arc::clone(pair));
            }
            return true;
        }

        // an authenticated failure on the selected pair revokes consent
        if self.consent_freshness {
            if let Some(selected) = component.selected_pair() {
                if Arc::ptr_eq(&selected, pair) {
                    log::warn!(
                        "[{}:{}]: consent revoked by error {}",
                        stream.id,
                        component.id,
                        code.0
                    );
                    self.set_component_state(stream, component, ComponentState::Failed)
                        .await;
                    return true;
                }
            }
        }

        pair.set_state(CandidatePairState::Failed);
        pair.set_transaction_id(None);
        true
    }

    async fn local_candidate_by_addr(
        &self,
        component: &Arc<Component>,
        addr: SocketAddr,
    ) -> Option<Arc<dyn Candidate + Send + Sync>> {
        let locals = component.local_candidates.lock().await;
        locals.iter().find(|c| c.addr() == addr).cloned()
    }

    /// A success response reflected an unknown local address: record it as
    /// a peer-reflexive local candidate sharing the original socket.
    async fn learn_prflx_local(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        pair: &Arc<CandidatePair>,
        mapped_addr: SocketAddr,
    ) {
        let prflx = CandidatePeerReflexiveConfig {
            base_config: CandidateBaseConfig {
                network: pair.local.network_type().network_short(),
                address: mapped_addr,
                stream_id: stream.id,
                component: component.id,
                compatibility: self.compatibility,
                conn: pair.local.get_conn(),
                ..CandidateBaseConfig::default()
            },
            base_addr: pair.local.base_addr(),
        }
        .new_candidate_peer_reflexive();

        match prflx {
            Ok(prflx) => {
                log::debug!(
                    "[{}]: learned peer-reflexive local {}",
                    self.get_name(),
                    mapped_addr
                );
                let prflx: Arc<dyn Candidate + Send + Sync> = Arc::new(prflx);
                if let Err(err) = self.add_local_candidate(stream, component, prflx).await {
                    log::warn!("failed to add prflx local: {err}");
                }
            }
            Err(err) => log::warn!("failed to create prflx local: {err}"),
        }
    }

    /// Authenticated traffic from the selected pair's remote refreshes
    /// consent.
    fn note_consent_traffic(&self, component: &Arc<Component>, remote: &Arc<dyn Candidate + Send + Sync>) {
        if let Some(selected) = component.selected_pair() {
            if selected.remote.equal(&**remote) {
                if let Ok(mut consent) = component.consent.lock() {
                    consent.last_received = Instant::now();
                }
            }
        }
    }

    /// Consent-freshness checks and keepalives over the selected pairs.
    pub(crate) async fn keepalive_tick(self: &Arc<Self>) {
        let streams: Vec<Arc<Stream>> = {
            let streams = self.streams.lock().await;
            streams.clone()
        };

        for stream in &streams {
            for component in &stream.components {
                if component.state() != ComponentState::Ready {
                    continue;
                }
                let Some(pair) = component.selected_pair() else {
                    continue;
                };

                if self.consent_freshness {
                    self.consent_tick(stream, component, &pair).await;
                } else {
                    self.plain_keepalive_tick(stream, component, &pair).await;
                }
            }
        }
    }

    async fn consent_tick(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        pair: &Arc<CandidatePair>,
    ) {
        let (lost, due) = match component.consent.lock() {
            Ok(mut consent) => {
                let lost = consent.last_received.elapsed() > CONSENT_TIMEOUT;
                let due = consent.last_check.elapsed() >= consent.next_interval;
                if due {
                    consent.last_check = Instant::now();
                    // 5 s with a ±1 s spread so consent checks from many
                    // components do not line up
                    let jitter_ms: i64 = rand::thread_rng().gen_range(-1000..=1000);
                    consent.next_interval = if jitter_ms >= 0 {
                        CONSENT_CHECK_INTERVAL + Duration::from_millis(jitter_ms as u64)
                    } else {
                        CONSENT_CHECK_INTERVAL - Duration::from_millis((-jitter_ms) as u64)
                    };
                }
                (lost, due)
            }
            Err(_) => (false, false),
        };

        if lost {
            log::warn!(
                "[{}:{}]: consent lost after {}s of silence",
                stream.id,
                component.id,
                CONSENT_TIMEOUT.as_secs()
            );
            self.set_component_state(stream, component, ComponentState::Failed)
                .await;
            return;
        }

        if due {
            self.send_keepalive_check(stream, pair).await;
        }
    }

    async fn plain_keepalive_tick(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        pair: &Arc<CandidatePair>,
    ) {
        let due = match component.consent.lock() {
            Ok(mut consent) => {
                if consent.last_check.elapsed() >= DEFAULT_KEEPALIVE_INTERVAL {
                    consent.last_check = Instant::now();
                    true
                } else {
                    false
                }
            }
            Err(_) => false,
        };
        if !due {
            return;
        }

        if self.keepalive_conncheck {
            // request-based keepalive; a timeout never fails the pair
            self.send_keepalive_check(stream, pair).await;
        } else {
            let dialect = self.dialect();
            let mut setters: Vec<Box<dyn Setter>> = vec![
                Box::new(BINDING_INDICATION),
                Box::new(TransactionId::new()),
            ];
            if dialect.add_fingerprint {
                setters.push(Box::new(FINGERPRINT));
            }
            let mut msg = Message::new();
            msg.unaligned = dialect.unaligned_attributes;
            if msg.build(&setters).is_ok() {
                self.send_stun_on_pair(stream, pair, msg.raw).await;
            }
        }
    }

    /// An authenticated Binding request over the selected pair. Unlike a
    /// real check it leaves the pair state alone; the response (or the
    /// 30 s silence rule) drives consent instead.
    async fn send_keepalive_check(self: &Arc<Self>, stream: &Arc<Stream>, pair: &Arc<CandidatePair>) {
        let controlling = self.is_controlling.load(Ordering::SeqCst);
        let tie_breaker = self.tie_breaker.load(Ordering::SeqCst);
        let dialect = self.dialect();
        let (username, pwd) = self.check_credentials(stream, &pair.remote);

        let tid = TransactionId::new();
        let prflx_priority = self.compatibility.candidate_priority(
            CandidateType::PeerReflexive,
            pair.local.tcp_type(),
            pair.local.network_type().is_tcp(),
            pair.local.component(),
        );

        let mut setters: Vec<Box<dyn Setter>> = vec![
            Box::new(BINDING_REQUEST),
            Box::new(tid),
            Box::new(Username::new(stun::attributes::ATTR_USERNAME, username)),
            Box::new(PriorityAttr(prflx_priority)),
        ];
        if controlling {
            setters.push(Box::new(AttrControlling(tie_breaker)));
        } else {
            setters.push(Box::new(AttrControlled(tie_breaker)));
        }
        if !dialect.ignore_credentials {
            setters.push(Box::new(MessageIntegrity::new_short_term_integrity(pwd)));
        }
        if dialect.add_fingerprint {
            setters.push(Box::new(FINGERPRINT));
        }

        let mut msg = Message::new();
        msg.unaligned = dialect.unaligned_attributes;
        if msg.build(&setters).is_err() {
            return;
        }

        pair.set_transaction_id(Some(tid));
        if let Ok(mut registry) = self.stun_registry.lock() {
            let _ = registry.remember_transaction(tid, Instant::now() + Duration::from_secs(30));
        }
        self.send_stun_on_pair(stream, pair, msg.raw).await;
    }
}
