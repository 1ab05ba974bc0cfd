use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::sync::Mutex as SyncMutex;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use tokio::sync::{Mutex, Notify};
use util::Buffer;

use crate::agent::agent_config::TurnServerConfig;
use crate::candidate::{Candidate, CandidatePair};
use crate::pseudo_tcp::PseudoTcp;
use crate::state::ComponentState;

/// The receive queue keeps at most this much data before writers start to
/// drop.
pub(crate) const MAX_COMPONENT_BUFFER_SIZE: usize = 1000 * 1000;

/// Inbound packets parked while no pair is selected yet, so an early
/// handshake datagram is never lost.
pub(crate) const MAX_PENDING_PACKETS: usize = 64;

pub(crate) struct ConsentState {
    /// Last authenticated traffic seen on the selected pair.
    pub(crate) last_received: Instant,
    /// When the previous consent check (or keepalive) went out.
    pub(crate) last_check: Instant,
    /// Jittered interval until the next check.
    pub(crate) next_interval: std::time::Duration,
}

impl Default for ConsentState {
    fn default() -> Self {
        ConsentState {
            last_received: Instant::now(),
            last_check: Instant::now(),
            next_interval: crate::agent::agent_config::CONSENT_CHECK_INTERVAL,
        }
    }
}

/// The smallest transport unit of a stream: one selected pair, one receive
/// queue, optionally one pseudo-TCP instance.
pub struct Component {
    pub(crate) stream_id: u32,
    pub(crate) id: u16,

    pub(crate) state: AtomicU8,

    pub(crate) local_candidates: Mutex<Vec<Arc<dyn Candidate + Send + Sync>>>,
    pub(crate) remote_candidates: Mutex<Vec<Arc<dyn Candidate + Send + Sync>>>,

    /// At most one selected pair; its local candidate's socket stays
    /// attached to this component for as long as it is selected.
    pub(crate) selected_pair: ArcSwapOption<CandidatePair>,

    pub(crate) turn_servers: SyncMutex<Vec<TurnServerConfig>>,

    /// User-visible receive queue (packet boundaries preserved).
    pub(crate) recv_buffer: Buffer,
    /// Spill-over for bytestream-mode reads that stop mid-packet.
    pub(crate) byte_spill: Mutex<VecDeque<u8>>,

    pub(crate) pending_packets: Mutex<VecDeque<Vec<u8>>>,

    /// Reliable-mode engine over an unreliable selected pair.
    pub(crate) pseudo_tcp: Mutex<Option<PseudoTcp>>,
    /// Wakes readers blocked on the engine.
    pub(crate) pst_notify: Arc<Notify>,
    /// Epoch for the engine's millisecond clock.
    pub(crate) pst_epoch: SyncMutex<Option<Instant>>,

    pub(crate) consent: SyncMutex<ConsentState>,
}

impl Component {
    pub(crate) fn new(stream_id: u32, id: u16) -> Self {
        Component {
            stream_id,
            id,
            state: AtomicU8::new(ComponentState::Disconnected as u8),
            local_candidates: Mutex::new(vec![]),
            remote_candidates: Mutex::new(vec![]),
            selected_pair: ArcSwapOption::empty(),
            turn_servers: SyncMutex::new(vec![]),
            recv_buffer: Buffer::new(0, MAX_COMPONENT_BUFFER_SIZE),
            byte_spill: Mutex::new(VecDeque::new()),
            pending_packets: Mutex::new(VecDeque::new()),
            pseudo_tcp: Mutex::new(None),
            pst_notify: Arc::new(Notify::new()),
            pst_epoch: SyncMutex::new(None),
            consent: SyncMutex::new(ConsentState::default()),
        }
    }

    pub fn state(&self) -> ComponentState {
        self.state.load(Ordering::SeqCst).into()
    }

    pub(crate) fn set_state(&self, state: ComponentState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn selected_pair(&self) -> Option<Arc<CandidatePair>> {
        self.selected_pair.load().clone()
    }

    /// Milliseconds on the pseudo-TCP clock, counted from the first use.
    pub(crate) fn pst_now(&self) -> u32 {
        let mut epoch = match self.pst_epoch.lock() {
            Ok(e) => e,
            Err(_) => return 0,
        };
        let base = epoch.get_or_insert_with(Instant::now);
        base.elapsed().as_millis() as u32
    }

    pub(crate) async fn close_candidates(&self) {
        let mut local = self.local_candidates.lock().await;
        for c in local.iter() {
            if let Err(err) = c.close().await {
                log::warn!(
                    "[{}:{}]: failed to close candidate {}: {}",
                    self.stream_id,
                    self.id,
                    c,
                    err
                );
            }
        }
        local.clear();
        drop(local);

        let mut remote = self.remote_candidates.lock().await;
        remote.clear();
    }
}
