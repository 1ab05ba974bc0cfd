use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::sync::Mutex as SyncMutex;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::candidate::CandidatePair;
use crate::component::Component;
use crate::rand::{generate_pwd, generate_ufrag};
use crate::state::GatheringState;

/// A group of components sharing ICE credentials and one conncheck list.
pub struct Stream {
    pub(crate) id: u32,
    pub(crate) name: String,
    pub(crate) components: Vec<Arc<Component>>,

    pub(crate) local_ufrag: SyncMutex<String>,
    pub(crate) local_pwd: SyncMutex<String>,
    pub(crate) remote_ufrag: SyncMutex<String>,
    pub(crate) remote_pwd: SyncMutex<String>,

    pub(crate) gathering_started: AtomicBool,
    pub(crate) gathering_state: AtomicU8,
    /// Trickle: the peer told us its gathering finished.
    pub(crate) peer_gathering_done: AtomicBool,
    pub(crate) initial_binding_request_seen: AtomicBool,

    pub(crate) checklist: Mutex<Vec<Arc<CandidatePair>>>,
    pub(crate) triggered_queue: Mutex<VecDeque<Arc<CandidatePair>>>,

    /// When every pair first turned terminal without a selection; starts
    /// the idle-timeout countdown toward Failed.
    pub(crate) all_failed_since: SyncMutex<Option<Instant>>,
}

impl Stream {
    pub(crate) fn new(id: u32, name: String, n_components: u16) -> Self {
        let components = (1..=n_components)
            .map(|component_id| Arc::new(Component::new(id, component_id)))
            .collect();

        Stream {
            id,
            name,
            components,
            local_ufrag: SyncMutex::new(generate_ufrag()),
            local_pwd: SyncMutex::new(generate_pwd()),
            remote_ufrag: SyncMutex::new(String::new()),
            remote_pwd: SyncMutex::new(String::new()),
            gathering_started: AtomicBool::new(false),
            gathering_state: AtomicU8::new(GatheringState::New as u8),
            peer_gathering_done: AtomicBool::new(false),
            initial_binding_request_seen: AtomicBool::new(false),
            checklist: Mutex::new(vec![]),
            triggered_queue: Mutex::new(VecDeque::new()),
            all_failed_since: SyncMutex::new(None),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn component(&self, component_id: u16) -> Option<&Arc<Component>> {
        self.components.get(component_id.checked_sub(1)? as usize)
    }

    pub(crate) fn local_credentials(&self) -> (String, String) {
        let ufrag = self.local_ufrag.lock().map(|u| u.clone()).unwrap_or_default();
        let pwd = self.local_pwd.lock().map(|p| p.clone()).unwrap_or_default();
        (ufrag, pwd)
    }

    pub(crate) fn remote_credentials(&self) -> (String, String) {
        let ufrag = self
            .remote_ufrag
            .lock()
            .map(|u| u.clone())
            .unwrap_or_default();
        let pwd = self.remote_pwd.lock().map(|p| p.clone()).unwrap_or_default();
        (ufrag, pwd)
    }

    pub(crate) fn has_remote_credentials(&self) -> bool {
        let (ufrag, pwd) = self.remote_credentials();
        !ufrag.is_empty() && !pwd.is_empty()
    }

    pub(crate) fn gathering_state(&self) -> GatheringState {
        self.gathering_state.load(Ordering::SeqCst).into()
    }

    /// ICE restart: fresh credentials, forgotten remote state, empty
    /// conncheck list. Local candidates survive; gathering may run again.
    pub(crate) async fn restart_credentials(&self) {
        if let Ok(mut u) = self.local_ufrag.lock() {
            *u = generate_ufrag();
        }
        if let Ok(mut p) = self.local_pwd.lock() {
            *p = generate_pwd();
        }
        if let Ok(mut u) = self.remote_ufrag.lock() {
            u.clear();
        }
        if let Ok(mut p) = self.remote_pwd.lock() {
            p.clear();
        }
        self.peer_gathering_done.store(false, Ordering::SeqCst);
        self.initial_binding_request_seen.store(false, Ordering::SeqCst);
        self.gathering_started.store(false, Ordering::SeqCst);
        self.gathering_state
            .store(GatheringState::New as u8, Ordering::SeqCst);
        if let Ok(mut t) = self.all_failed_since.lock() {
            *t = None;
        }

        self.checklist.lock().await.clear();
        self.triggered_queue.lock().await.clear();

        for component in &self.components {
            component.selected_pair.store(None);
            component.remote_candidates.lock().await.clear();
            let mut pst = component.pseudo_tcp.lock().await;
            *pst = None;
        }
    }
}
