use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;
use std::sync::Mutex as SyncMutex;

use serde::Serialize;
use stun::agent::TransactionId;
use stun::timer::RetransmissionTimer;

use super::*;

/// Per-pair connectivity check state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CandidatePairState {
    /// On hold until a pair with the same foundation succeeds or fails.
    #[serde(rename = "frozen")]
    Frozen = 0,

    /// Eligible for a check as soon as the scheduler reaches it.
    #[serde(rename = "waiting")]
    Waiting = 1,

    /// A check is outstanding on this pair.
    #[serde(rename = "in-progress")]
    InProgress = 2,

    /// The check produced a valid response.
    #[serde(rename = "succeeded")]
    Succeeded = 3,

    /// The check timed out or produced an unrecoverable error.
    #[serde(rename = "failed")]
    Failed = 4,
}

impl From<u8> for CandidatePairState {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Waiting,
            2 => Self::InProgress,
            3 => Self::Succeeded,
            4 => Self::Failed,
            _ => Self::Frozen,
        }
    }
}

impl Default for CandidatePairState {
    fn default() -> Self {
        Self::Frozen
    }
}

impl fmt::Display for CandidatePairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Frozen => "frozen",
            Self::Waiting => "waiting",
            Self::InProgress => "in-progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// An ordered (local, remote) combination under connectivity checking.
pub struct CandidatePair {
    pub local: Arc<dyn Candidate + Send + Sync>,
    pub remote: Arc<dyn Candidate + Send + Sync>,

    pub(crate) ice_role_controlling: AtomicBool,
    pub(crate) state: AtomicU8,
    pub(crate) nominated: AtomicBool,
    /// Set when the next check on this pair must carry USE-CANDIDATE.
    pub(crate) use_candidate: AtomicBool,
    /// Set while a regular-nomination confirmation check is outstanding.
    pub(crate) nominate_on_success: AtomicBool,
    /// Role carried by the outstanding check, to detect stale 487s.
    pub(crate) check_sent_controlling: AtomicBool,
    pub(crate) binding_request_count: AtomicU16,

    /// Transaction id of the outstanding check; at most one at a time.
    pub(crate) transaction_id: SyncMutex<Option<TransactionId>>,
    /// Raw bytes of the outstanding check, kept for retransmission.
    pub(crate) last_request: SyncMutex<Vec<u8>>,
    pub(crate) timer: SyncMutex<RetransmissionTimer>,
}

impl fmt::Debug for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prio {} (local, prio {}) {} <-> {} (remote, prio {})",
            self.priority(),
            self.local.priority(),
            self.local,
            self.remote,
            self.remote.priority()
        )
    }
}

impl fmt::Display for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prio {} (local, prio {}) {} <-> {} (remote, prio {})",
            self.priority(),
            self.local.priority(),
            self.local,
            self.remote,
            self.remote.priority()
        )
    }
}

impl PartialEq for CandidatePair {
    fn eq(&self, other: &Self) -> bool {
        self.local.equal(&*other.local) && self.remote.equal(&*other.remote)
    }
}

impl CandidatePair {
    #[must_use]
    pub fn new(
        local: Arc<dyn Candidate + Send + Sync>,
        remote: Arc<dyn Candidate + Send + Sync>,
        controlling: bool,
        initial_state: CandidatePairState,
    ) -> Self {
        Self {
            local,
            remote,
            ice_role_controlling: AtomicBool::new(controlling),
            state: AtomicU8::new(initial_state as u8),
            nominated: AtomicBool::new(false),
            use_candidate: AtomicBool::new(false),
            nominate_on_success: AtomicBool::new(false),
            check_sent_controlling: AtomicBool::new(controlling),
            binding_request_count: AtomicU16::new(0),
            transaction_id: SyncMutex::new(None),
            last_request: SyncMutex::new(vec![]),
            timer: SyncMutex::new(RetransmissionTimer::default()),
        }
    }

    /// The freezing group of the pair.
    pub fn foundation(&self) -> String {
        format!("{}:{}", self.local.foundation(), self.remote.foundation())
    }

    /// RFC 5245 section 5.7.2: with G the controlling-side candidate
    /// priority and D the controlled-side one,
    /// `pair priority = 2^32*MIN(G,D) + 2*MAX(G,D) + (G>D?1:0)`.
    pub fn priority(&self) -> u64 {
        let (g, d) = if self.ice_role_controlling.load(Ordering::SeqCst) {
            (self.local.priority(), self.remote.priority())
        } else {
            (self.remote.priority(), self.local.priority())
        };

        // 1<<32 would overflow u32; and were both g and d u32::MAX the
        // true formula would overflow u64
        ((1 << 32_u64) - 1) * u64::from(std::cmp::min(g, d))
            + 2 * u64::from(std::cmp::max(g, d))
            + u64::from(g > d)
    }

    pub fn state(&self) -> CandidatePairState {
        self.state.load(Ordering::SeqCst).into()
    }

    pub fn set_state(&self, state: CandidatePairState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn is_nominated(&self) -> bool {
        self.nominated.load(Ordering::SeqCst)
    }

    pub(crate) fn set_role_controlling(&self, controlling: bool) {
        self.ice_role_controlling.store(controlling, Ordering::SeqCst);
    }

    pub(crate) fn current_transaction_id(&self) -> Option<TransactionId> {
        self.transaction_id.lock().map(|t| *t).unwrap_or(None)
    }

    pub(crate) fn set_transaction_id(&self, id: Option<TransactionId>) {
        if let Ok(mut t) = self.transaction_id.lock() {
            *t = id;
        }
    }

    pub async fn write(&self, b: &[u8]) -> Result<usize> {
        self.local.write_to(b, &*self.remote).await
    }
}
