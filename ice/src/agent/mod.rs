#[cfg(test)]
mod agent_conncheck_test;
#[cfg(test)]
mod agent_gather_test;
#[cfg(test)]
mod agent_test;

pub mod agent_config;
pub mod agent_conncheck;
pub mod agent_gather;
pub(crate) mod agent_internal;
pub mod agent_transport;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use agent_config::*;
use agent_internal::*;
use tokio::sync::{mpsc, Mutex};

use crate::candidate::*;
use crate::error::*;
use crate::state::ComponentState;

pub type OnComponentStateChangeHdlrFn = Box<
    dyn (FnMut(u32, u16, ComponentState) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;
pub type OnCandidateHdlrFn = Box<
    dyn (FnMut(
            u32,
            Option<Arc<dyn Candidate + Send + Sync>>,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;
pub type OnNewRemoteCandidateHdlrFn = Box<
    dyn (FnMut(
            u32,
            Arc<dyn Candidate + Send + Sync>,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;
pub type OnSelectedPairChangeHdlrFn = Box<
    dyn (FnMut(
            u32,
            u16,
            Arc<dyn Candidate + Send + Sync>,
            Arc<dyn Candidate + Send + Sync>,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;
pub type OnInitialBindingRequestHdlrFn =
    Box<dyn (FnMut(u32) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync>;
pub type OnTransportWritableHdlrFn =
    Box<dyn (FnMut(u32, u16) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync>;
pub type OnStreamsRemovedHdlrFn =
    Box<dyn (FnMut(Vec<u32>) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync>;

/// The ICE agent: streams of components, candidate gathering,
/// connectivity checking, and datagram (or pseudo-TCP) transfer over the
/// selected pairs.
pub struct Agent {
    pub(crate) internal: Arc<AgentInternal>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Result<Self> {
        if !config.ice_udp && !config.ice_tcp {
            return Err(Error::ErrNoTransportEnabled);
        }

        let (ai, event_rx, done_rx) = AgentInternal::new(&config);
        let internal = Arc::new(ai);
        internal.start_event_pump(event_rx);
        internal.start_ticker(done_rx);

        Ok(Agent { internal })
    }

    /// Creates a new stream with `n_components` components and returns its
    /// id. Credentials are generated immediately.
    pub async fn add_stream(&self, name: &str, n_components: u16) -> Result<u32> {
        if n_components == 0 {
            return Err(Error::ErrNoComponents);
        }
        self.ensure_open().await?;

        let id = self
            .internal
            .next_stream_id
            .fetch_add(1, Ordering::SeqCst);
        let stream = Arc::new(crate::stream::Stream::new(id, name.to_owned(), n_components));

        let mut streams = self.internal.streams.lock().await;
        streams.push(stream);
        Ok(id)
    }

    /// Detaches the stream synchronously and drains its TURN allocations
    /// asynchronously before releasing the sockets.
    pub async fn remove_stream(&self, stream_id: u32) -> Result<()> {
        let stream = {
            let mut streams = self.internal.streams.lock().await;
            let pos = streams
                .iter()
                .position(|s| s.id == stream_id)
                .ok_or(Error::ErrStreamNotFound)?;
            streams.remove(pos)
        };

        // relayed candidates send a zero-lifetime refresh from close();
        // run that off the caller's back
        let internal = Arc::clone(&self.internal);
        tokio::spawn(async move {
            for component in &stream.components {
                component.recv_buffer.close().await;
                component.close_candidates().await;
            }
            internal
                .queue_event(AgentEvent::StreamsRemoved(vec![stream.id]))
                .await;
        });

        Ok(())
    }

    /// Adds a TURN server to a component's list, bounded by the configured
    /// maximum. Preference order is list order.
    pub async fn set_turn_server(
        &self,
        stream_id: u32,
        component_id: u16,
        server: TurnServerConfig,
    ) -> Result<()> {
        let (_, component) = self
            .internal
            .find_stream_component(stream_id, component_id)
            .await?;
        let mut servers = component
            .turn_servers
            .lock()
            .map_err(|_| Error::Other("poisoned turn server list".to_owned()))?;
        if servers.len() >= self.internal.max_turn_servers {
            return Err(Error::Other("too many TURN servers".to_owned()));
        }
        servers.push(server);
        Ok(())
    }

    /// Starts candidate discovery for a stream. A second call for the same
    /// stream is a silent no-op.
    pub async fn gather_candidates(&self, stream_id: u32) -> Result<()> {
        self.ensure_open().await?;
        let stream = self.internal.find_stream(stream_id).await?;

        if stream.gathering_started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.internal.gather_candidates_for_stream(&stream).await;
        Ok(())
    }

    /// Sets the credentials of the remote agent for a stream.
    pub async fn set_remote_credentials(
        &self,
        stream_id: u32,
        remote_ufrag: String,
        remote_pwd: String,
    ) -> Result<()> {
        if remote_ufrag.is_empty() {
            return Err(Error::ErrRemoteUfragEmpty);
        }
        if remote_pwd.is_empty() {
            return Err(Error::ErrRemotePwdEmpty);
        }

        let stream = self.internal.find_stream(stream_id).await?;
        if let Ok(mut u) = stream.remote_ufrag.lock() {
            *u = remote_ufrag;
        }
        if let Ok(mut p) = stream.remote_pwd.lock() {
            *p = remote_pwd;
        }

        // checks may start as soon as pairs exist
        for component in &stream.components {
            if component.state() < ComponentState::Connecting {
                self.internal
                    .set_component_state(&stream, component, ComponentState::Connecting)
                    .await;
            }
        }
        self.internal.update_pair_list(&stream).await;
        Ok(())
    }

    /// Supplies remote candidates for one component. Supplying the same
    /// list twice leaves the committed state untouched.
    pub async fn set_remote_candidates(
        &self,
        stream_id: u32,
        component_id: u16,
        candidates: Vec<Arc<dyn Candidate + Send + Sync>>,
    ) -> Result<()> {
        let (stream, component) = self
            .internal
            .find_stream_component(stream_id, component_id)
            .await?;

        for c in candidates {
            self.internal
                .add_remote_candidate(&stream, &component, c)
                .await;
        }
        Ok(())
    }

    /// Trickle: the peer finished gathering; pending failure decisions may
    /// now be taken.
    pub async fn peer_candidate_gathering_done(&self, stream_id: u32) -> Result<()> {
        let stream = self.internal.find_stream(stream_id).await?;
        stream.peer_gathering_done.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Restarts ICE on every stream.
    pub async fn restart(&self) -> Result<()> {
        let streams: Vec<_> = {
            let streams = self.internal.streams.lock().await;
            streams.clone()
        };
        for stream in streams {
            self.restart_stream(stream.id).await?;
        }
        Ok(())
    }

    /// ICE restart for one stream: fresh credentials, cleared remote
    /// candidates and conncheck list, components back to Gathering.
    pub async fn restart_stream(&self, stream_id: u32) -> Result<()> {
        let stream = self.internal.find_stream(stream_id).await?;
        stream.restart_credentials().await;
        self.internal
            .set_stream_state(&stream, ComponentState::Gathering)
            .await;
        Ok(())
    }

    /// Forces consent loss on a component (RFC 7675 revocation).
    pub async fn consent_lost(&self, stream_id: u32, component_id: u16) -> Result<()> {
        let (stream, component) = self
            .internal
            .find_stream_component(stream_id, component_id)
            .await?;
        self.internal.consent_lost(&stream, &component).await;
        Ok(())
    }

    /// Cancels all work, drains TURN allocations and releases sockets.
    pub async fn close(&self) -> Result<()> {
        self.internal.close().await
    }

    pub async fn get_local_candidates(
        &self,
        stream_id: u32,
        component_id: u16,
    ) -> Result<Vec<Arc<dyn Candidate + Send + Sync>>> {
        let (_, component) = self
            .internal
            .find_stream_component(stream_id, component_id)
            .await?;
        let local_candidates = component.local_candidates.lock().await;
        Ok(local_candidates.clone())
    }

    pub async fn get_local_user_credentials(&self, stream_id: u32) -> Result<(String, String)> {
        let stream = self.internal.find_stream(stream_id).await?;
        Ok(stream.local_credentials())
    }

    pub async fn get_selected_pair(
        &self,
        stream_id: u32,
        component_id: u16,
    ) -> Result<Option<Arc<CandidatePair>>> {
        let (_, component) = self
            .internal
            .find_stream_component(stream_id, component_id)
            .await?;
        Ok(component.selected_pair())
    }

    pub async fn get_component_state(
        &self,
        stream_id: u32,
        component_id: u16,
    ) -> Result<ComponentState> {
        let (_, component) = self
            .internal
            .find_stream_component(stream_id, component_id)
            .await?;
        Ok(component.state())
    }

    /// Sets a handler fired on every component state change.
    pub fn on_component_state_change(&self, f: OnComponentStateChangeHdlrFn) {
        self.internal
            .on_component_state_change_hdlr
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// Sets a handler fired for each gathered local candidate; `None`
    /// closes a stream's gathering.
    pub fn on_candidate(&self, f: OnCandidateHdlrFn) {
        self.internal
            .on_candidate_hdlr
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// Sets a handler fired when a remote candidate is learned.
    pub fn on_new_remote_candidate(&self, f: OnNewRemoteCandidateHdlrFn) {
        self.internal
            .on_new_remote_candidate_hdlr
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// Sets a handler fired when a component's selected pair changes.
    pub fn on_selected_pair_change(&self, f: OnSelectedPairChangeHdlrFn) {
        self.internal
            .on_selected_pair_change_hdlr
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// Sets a handler fired on the first authenticated binding request of
    /// a stream.
    pub fn on_initial_binding_request(&self, f: OnInitialBindingRequestHdlrFn) {
        self.internal
            .on_initial_binding_request_hdlr
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// Sets a handler fired when a previously blocked component can accept
    /// writes again.
    pub fn on_transport_writable(&self, f: OnTransportWritableHdlrFn) {
        self.internal
            .on_transport_writable_hdlr
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// Sets a handler fired after streams have been removed and drained.
    pub fn on_streams_removed(&self, f: OnStreamsRemovedHdlrFn) {
        self.internal
            .on_streams_removed_hdlr
            .store(Some(Arc::new(Mutex::new(f))));
    }

    async fn ensure_open(&self) -> Result<()> {
        let done_tx = self.internal.done_tx.lock().await;
        if done_tx.is_none() {
            return Err(Error::ErrClosed);
        }
        Ok(())
    }
}
