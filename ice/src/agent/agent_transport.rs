use std::sync::Arc;

use stun::message::*;
use tokio::sync::{broadcast, mpsc};
use util::Conn;

use super::agent_internal::{AgentEvent, AgentInternal};
use super::Agent;
use crate::candidate::*;
use crate::component::{Component, MAX_PENDING_PACKETS};
use crate::error::*;
use crate::framing::{encode_frame, FrameDecoder};
use crate::pseudo_tcp::{PseudoTcp, PseudoTcpEvent};
use crate::state::ComponentState;
use crate::stream::Stream;

impl Agent {
    /// Hands bytes to a component: pseudo-TCP in reliable mode, RFC 4571
    /// framing over ICE-TCP, plain datagrams otherwise.
    pub async fn send(&self, stream_id: u32, component_id: u16, buf: &[u8]) -> Result<usize> {
        let (stream, component) = self
            .internal
            .find_stream_component(stream_id, component_id)
            .await?;

        if component.state() == ComponentState::Failed {
            // a consent-freshness agent got here by revocation; anything
            // else is a dead transport
            return if self.internal.consent_freshness {
                Err(Error::ErrConsentRevoked)
            } else {
                Err(Error::ErrTransportFailed)
            };
        }

        // reliable mode over an unreliable pair rides the engine; over an
        // ICE-TCP pair the transport itself is already reliable
        if self.internal.reliable {
            let mut pst = component.pseudo_tcp.lock().await;
            if let Some(engine) = pst.as_mut() {
                let now = component.pst_now();
                let n = engine.send(now, buf)?;
                drop(pst);
                self.internal.flush_pseudo_tcp(&stream, &component).await;
                return Ok(n);
            }
            drop(pst);
            let tcp_selected = component
                .selected_pair()
                .map(|p| p.local.network_type().is_tcp())
                .unwrap_or(false);
            if !tcp_selected {
                // nothing selected yet: no engine to buffer in
                return Err(Error::ErrNoCandidatePairs);
            }
        }

        let pair = match component.selected_pair() {
            Some(pair) => pair,
            None => self
                .internal
                .get_best_valid_pair(&stream, &component)
                .await
                .ok_or(Error::ErrNoCandidatePairs)?,
        };

        if pair.local.network_type().is_tcp() {
            pair.write(&encode_frame(buf)).await?;
        } else {
            pair.write(buf).await?;
        }
        Ok(buf.len())
    }

    /// Receives the next packet (or, in bytestream mode, the next run of
    /// bytes), waiting until data is available.
    pub async fn recv(&self, stream_id: u32, component_id: u16, buf: &mut [u8]) -> Result<usize> {
        let (_, component) = self
            .internal
            .find_stream_component(stream_id, component_id)
            .await?;
        self.recv_inner(&component, buf).await
    }

    /// Like [`Agent::recv`] but cancellable: a message (or closure) on
    /// `cancel_rx` aborts the wait with `ErrCancelled`.
    pub async fn recv_cancelable(
        &self,
        stream_id: u32,
        component_id: u16,
        buf: &mut [u8],
        mut cancel_rx: mpsc::Receiver<()>,
    ) -> Result<usize> {
        let (_, component) = self
            .internal
            .find_stream_component(stream_id, component_id)
            .await?;

        tokio::select! {
            result = self.recv_inner(&component, buf) => result,
            _ = cancel_rx.recv() => Err(Error::ErrCancelled),
        }
    }

    /// Non-blocking receive; `ErrWouldBlock` when nothing is queued.
    pub async fn try_recv(
        &self,
        stream_id: u32,
        component_id: u16,
        buf: &mut [u8],
    ) -> Result<usize> {
        let (_, component) = self
            .internal
            .find_stream_component(stream_id, component_id)
            .await?;

        {
            let mut pst = component.pseudo_tcp.lock().await;
            if let Some(engine) = pst.as_mut() {
                return engine.recv(buf);
            }
        }

        match component.recv_buffer.try_read(buf).await {
            Ok(Some(n)) => Ok(n),
            Ok(None) => Err(Error::ErrWouldBlock),
            Err(err) => Err(err.into()),
        }
    }

    async fn recv_inner(&self, component: &Arc<Component>, buf: &mut [u8]) -> Result<usize> {
        if self.internal.reliable {
            // pseudo-TCP delivery; also covers the window before the
            // engine exists (pre-selection)
            loop {
                let notified = component.pst_notify.notified();
                tokio::pin!(notified);
                // register before checking, so a Readable firing in
                // between is not lost
                notified.as_mut().enable();
                {
                    let mut pst = component.pseudo_tcp.lock().await;
                    if let Some(engine) = pst.as_mut() {
                        match engine.recv(buf) {
                            Err(Error::ErrWouldBlock) => {}
                            other => return other,
                        }
                    }
                }
                notified.await;
            }
        }

        if self.internal.bytestream_tcp {
            return self.recv_bytestream(component, buf).await;
        }

        component
            .recv_buffer
            .read(buf, None)
            .await
            .map_err(Error::from)
    }

    /// Bytestream mode: packet boundaries dissolve; reads drain as many
    /// queued packets as fit and remember the remainder.
    async fn recv_bytestream(&self, component: &Arc<Component>, buf: &mut [u8]) -> Result<usize> {
        let mut copied = 0;

        {
            let mut spill = component.byte_spill.lock().await;
            while copied < buf.len() {
                match spill.pop_front() {
                    Some(b) => {
                        buf[copied] = b;
                        copied += 1;
                    }
                    None => break,
                }
            }
        }

        let mut packet = vec![0u8; crate::candidate::RECEIVE_MTU];
        loop {
            if copied > 0 {
                // only take more without waiting
                match component.recv_buffer.try_read(&mut packet).await {
                    Ok(Some(n)) => {
                        copied += self
                            .spill_into(component, &packet[..n], buf, copied)
                            .await;
                    }
                    Ok(None) | Err(_) => break,
                }
            } else {
                let n = component
                    .recv_buffer
                    .read(&mut packet, None)
                    .await
                    .map_err(Error::from)?;
                copied += self.spill_into(component, &packet[..n], buf, copied).await;
            }
            if copied >= buf.len() {
                break;
            }
        }

        Ok(copied)
    }

    async fn spill_into(
        &self,
        component: &Arc<Component>,
        packet: &[u8],
        buf: &mut [u8],
        offset: usize,
    ) -> usize {
        let room = buf.len() - offset;
        let take = std::cmp::min(room, packet.len());
        buf[offset..offset + take].copy_from_slice(&packet[..take]);
        if take < packet.len() {
            let mut spill = component.byte_spill.lock().await;
            spill.extend(&packet[take..]);
        }
        take
    }
}

impl AgentInternal {
    /// Starts the receive loop of a candidate's own socket.
    pub(crate) fn start_candidate_recv_loop(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        candidate: Arc<dyn Candidate + Send + Sync>,
    ) {
        match candidate.candidate_type() {
            // reflexive candidates ride their base's socket, which already
            // has a loop; a second reader would split the datagram stream
            CandidateType::ServerReflexive | CandidateType::PeerReflexive => return,
            _ => {}
        }
        let conn = match candidate.get_conn() {
            Some(conn) => conn,
            // active TCP candidates get their socket when a check dials
            None => return,
        };
        let deframe =
            conn.is_reliable() && candidate.candidate_type() != CandidateType::Relay;
        self.start_conn_recv_loop(stream, component, candidate, conn, deframe);
    }

    /// The per-socket receive path of the demultiplexer.
    pub(crate) fn start_conn_recv_loop(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        candidate: Arc<dyn Candidate + Send + Sync>,
        conn: Arc<dyn Conn + Send + Sync>,
        deframe: bool,
    ) {
        let (closed_ch_tx, mut closed_ch_rx) = broadcast::channel(1);
        let closed_ch = candidate.get_closed_ch();
        let ai = Arc::clone(self);
        let stream = Arc::clone(stream);
        let component = Arc::clone(component);

        tokio::spawn(async move {
            {
                let mut closed = closed_ch.lock().await;
                *closed = Some(closed_ch_tx);
            }

            let mut buffer = vec![0u8; RECEIVE_MTU];
            let mut decoder = FrameDecoder::new();

            loop {
                let (n, src_addr) = tokio::select! {
                    result = conn.recv_from(&mut buffer) => {
                        match result {
                            Ok(pair) => pair,
                            Err(err) => {
                                log::debug!(
                                    "[{}:{}]: receive loop ended: {}",
                                    stream.id, component.id, err
                                );
                                ai.on_socket_failed(&stream, &component, &candidate).await;
                                return;
                            }
                        }
                    }
                    _ = closed_ch_rx.recv() => return,
                };
                if n == 0 && conn.is_reliable() {
                    // orderly TCP shutdown from the peer
                    ai.on_socket_failed(&stream, &component, &candidate).await;
                    return;
                }

                if deframe {
                    for frame in decoder.push(&buffer[..n]) {
                        ai.handle_inbound_packet(&stream, &component, &candidate, &frame, src_addr)
                            .await;
                    }
                } else {
                    ai.handle_inbound_packet(
                        &stream,
                        &component,
                        &candidate,
                        &buffer[..n],
                        src_addr,
                    )
                    .await;
                }
            }
        });
    }

    /// A socket died under a component. If the selected pair was riding
    /// it, the component fails.
    async fn on_socket_failed(
        &self,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        candidate: &Arc<dyn Candidate + Send + Sync>,
    ) {
        if let Some(selected) = component.selected_pair() {
            if selected.local.id() == candidate.id() {
                self.set_component_state(stream, component, ComponentState::Failed)
                    .await;
            }
        }
    }

    /// The demultiplexer tail: STUN classification, validation, conncheck
    /// dispatch, then pseudo-TCP or user delivery.
    pub(crate) async fn handle_inbound_packet(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        local: &Arc<dyn Candidate + Send + Sync>,
        data: &[u8],
        src_addr: std::net::SocketAddr,
    ) {
        if self.force_relay && local.candidate_type() != CandidateType::Relay {
            // in force-relay mode nothing that bypassed the relay counts
            return;
        }

        if is_message(data) {
            let mut msg = Message {
                unaligned: self.dialect().unaligned_attributes,
                ..Message::default()
            };
            if msg.write(data).is_err() {
                log::warn!(
                    "[{}]: dropping undecodable STUN from {}",
                    self.get_name(),
                    src_addr
                );
                return;
            }
            self.handle_inbound_stun(stream, component, local, msg, src_addr)
                .await;
            return;
        }

        // application data
        let engaged = {
            let pst = component.pseudo_tcp.lock().await;
            pst.is_some()
        };
        if self.reliable {
            if engaged {
                {
                    let mut pst = component.pseudo_tcp.lock().await;
                    if let Some(engine) = pst.as_mut() {
                        let now = component.pst_now();
                        let _ = engine.notify_packet(now, data);
                    }
                }
                self.flush_pseudo_tcp(stream, component).await;
            } else {
                // no pair selected yet: park the packet so an early
                // handshake segment is not dropped
                let mut pending = component.pending_packets.lock().await;
                if pending.len() < MAX_PENDING_PACKETS {
                    pending.push_back(data.to_vec());
                }
            }
            return;
        }

        if !self.validate_non_stun_traffic(component, src_addr).await {
            log::warn!(
                "[{}]: discarded message from {}, not a known remote candidate",
                self.get_name(),
                src_addr
            );
            return;
        }

        if let Err(err) = component.recv_buffer.write(data).await {
            log::warn!("[{}]: failed to queue packet: {}", self.get_name(), err);
        }
    }

    /// Slow validation and dispatch of a decoded STUN message.
    async fn handle_inbound_stun(
        self: &Arc<Self>,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
        local: &Arc<dyn Candidate + Send + Sync>,
        mut msg: Message,
        src_addr: std::net::SocketAddr,
    ) {
        let dialect = self.dialect();

        let handled = match msg.typ.class {
            CLASS_REQUEST => {
                let (_, local_pwd) = stream.local_credentials();
                if let Err(err) = msg.validate(Some(local_pwd.as_bytes()), dialect) {
                    log::warn!(
                        "[{}]: discarding request from {}: {}",
                        self.get_name(),
                        src_addr,
                        err
                    );
                    return;
                }
                self.handle_binding_request(stream, component, local, &msg, src_addr)
                    .await
            }
            CLASS_SUCCESS_RESPONSE | CLASS_ERROR_RESPONSE => {
                // discovery transactions are unauthenticated
                if self.is_discovery_response(&msg).await {
                    if let Err(err) = msg.validate(None, dialect) {
                        log::warn!("[{}]: bad discovery response: {}", self.get_name(), err);
                        return;
                    }
                    self.handle_discovery_response(&msg).await;
                    true
                } else {
                    let (_, remote_pwd) = stream.remote_credentials();
                    if let Err(err) = msg.validate(Some(remote_pwd.as_bytes()), dialect) {
                        log::warn!(
                            "[{}]: discarding response from {}: {}",
                            self.get_name(),
                            src_addr,
                            err
                        );
                        return;
                    }
                    self.handle_check_response(stream, component, local, &msg, src_addr)
                        .await
                }
            }
            CLASS_INDICATION => {
                if msg.validate(None, dialect).is_err() {
                    return;
                }
                // keepalive: refresh liveness of the sender
                if let Some(remote) = self.find_remote_candidate(component, src_addr).await {
                    remote.seen(false);
                }
                true
            }
            _ => false,
        };

        if !handled {
            log::trace!(
                "[{}]: unhandled STUN {} from {}",
                self.get_name(),
                msg,
                src_addr
            );
        }
    }

    pub(crate) async fn is_discovery_response(&self, msg: &Message) -> bool {
        let discovery_list = self.discovery_list.lock().await;
        discovery_list
            .iter()
            .any(|item| item.tid == Some(msg.transaction_id))
    }

    pub(crate) async fn find_remote_candidate(
        &self,
        component: &Arc<Component>,
        addr: std::net::SocketAddr,
    ) -> Option<Arc<dyn Candidate + Send + Sync>> {
        let remote_candidates = component.remote_candidates.lock().await;
        remote_candidates
            .iter()
            .find(|c| c.addr() == addr)
            .cloned()
    }

    /// Non-STUN traffic counts only when its source is a known remote
    /// candidate.
    pub(crate) async fn validate_non_stun_traffic(
        &self,
        component: &Arc<Component>,
        addr: std::net::SocketAddr,
    ) -> bool {
        match self.find_remote_candidate(component, addr).await {
            Some(remote) => {
                remote.seen(false);
                true
            }
            None => false,
        }
    }

    /// The best already-validated pair, for sends before nomination lands.
    pub(crate) async fn get_best_valid_pair(
        &self,
        stream: &Arc<Stream>,
        component: &Arc<Component>,
    ) -> Option<Arc<CandidatePair>> {
        let checklist = stream.checklist.lock().await;
        checklist
            .iter()
            .filter(|p| {
                p.local.component() == component.id
                    && p.state() == CandidatePairState::Succeeded
            })
            .max_by_key(|p| p.priority())
            .cloned()
    }

    /// Sets up pseudo-TCP over a freshly selected unreliable pair and
    /// replays any packets that arrived before selection.
    pub(crate) async fn engage_pseudo_tcp(
        &self,
        stream: &Stream,
        component: &Component,
        pair: &Arc<CandidatePair>,
    ) {
        if !self.reliable || pair.local.network_type().is_tcp() {
            return;
        }

        let controlling = self.is_controlling.load(std::sync::atomic::Ordering::SeqCst);
        {
            let mut pst = component.pseudo_tcp.lock().await;
            if pst.is_none() {
                let mut engine = PseudoTcp::new(u32::from(component.id));
                if controlling {
                    let now = component.pst_now();
                    let _ = engine.connect(now);
                }
                *pst = Some(engine);
            }
        }

        // packets that raced selection go through the engine now
        let parked: Vec<Vec<u8>> = {
            let mut pending = component.pending_packets.lock().await;
            pending.drain(..).collect()
        };
        if !parked.is_empty() {
            let mut pst = component.pseudo_tcp.lock().await;
            if let Some(engine) = pst.as_mut() {
                let now = component.pst_now();
                for packet in parked {
                    let _ = engine.notify_packet(now, &packet);
                }
            }
        }

        self.flush_pseudo_tcp(stream, component).await;
    }

    pub(crate) async fn drain_pending_packets(
        &self,
        stream: &Stream,
        component: &Component,
    ) {
        if !self.reliable {
            return;
        }
        let engaged = {
            let pst = component.pseudo_tcp.lock().await;
            pst.is_some()
        };
        if !engaged {
            return;
        }
        let parked: Vec<Vec<u8>> = {
            let mut pending = component.pending_packets.lock().await;
            pending.drain(..).collect()
        };
        if parked.is_empty() {
            return;
        }
        {
            let mut pst = component.pseudo_tcp.lock().await;
            if let Some(engine) = pst.as_mut() {
                let now = component.pst_now();
                for packet in parked {
                    let _ = engine.notify_packet(now, &packet);
                }
            }
        }
        self.flush_pseudo_tcp(stream, component).await;
    }

    /// Ships the engine's outbound datagrams over the selected pair and
    /// turns its events into notifications.
    pub(crate) async fn flush_pseudo_tcp(
        &self,
        stream: &Stream,
        component: &Component,
    ) {
        let (transmits, events) = {
            let mut pst = component.pseudo_tcp.lock().await;
            let engine = match pst.as_mut() {
                Some(engine) => engine,
                None => return,
            };
            let mut transmits = vec![];
            while let Some(p) = engine.poll_transmit() {
                transmits.push(p);
            }
            let mut events = vec![];
            while let Some(e) = engine.poll_event() {
                events.push(e);
            }
            (transmits, events)
        };

        if !transmits.is_empty() {
            if let Some(pair) = component.selected_pair() {
                for packet in transmits {
                    if let Err(err) = pair.write(&packet).await {
                        log::debug!("pseudo-tcp transmit failed: {err}");
                    }
                }
            }
        }

        for event in events {
            match event {
                PseudoTcpEvent::Readable => {
                    component.pst_notify.notify_waiters();
                }
                PseudoTcpEvent::Opened | PseudoTcpEvent::Writable => {
                    component.pst_notify.notify_waiters();
                    self.queue_event(AgentEvent::TransportWritable(stream.id, component.id))
                        .await;
                }
                PseudoTcpEvent::Closed(err) => {
                    component.pst_notify.notify_waiters();
                    if let Some(err) = err {
                        log::warn!(
                            "[{}:{}]: pseudo-tcp closed: {}",
                            stream.id,
                            component.id,
                            err
                        );
                        Box::pin(self.set_component_state(
                            stream,
                            component,
                            ComponentState::Failed,
                        ))
                        .await;
                    }
                }
            }
        }
    }

    /// Advances every engaged pseudo-TCP clock whose deadline passed.
    pub(crate) async fn pseudo_tcp_tick(self: &Arc<Self>) {
        let streams: Vec<Arc<Stream>> = {
            let streams = self.streams.lock().await;
            streams.clone()
        };

        for stream in streams {
            for component in &stream.components {
                let fired = {
                    let mut pst = component.pseudo_tcp.lock().await;
                    match pst.as_mut() {
                        Some(engine) => {
                            let now = component.pst_now();
                            match engine.get_next_clock(now) {
                                Some(deadline)
                                    if (now.wrapping_sub(deadline) as i32) >= 0 =>
                                {
                                    engine.notify_clock(now);
                                    true
                                }
                                _ => false,
                            }
                        }
                        None => false,
                    }
                };
                if fired {
                    self.flush_pseudo_tcp(&stream, component).await;
                }
            }
        }
    }
}

