#[cfg(test)]
mod timer_test;

use std::time::{Duration, Instant};

/// Default initial retransmission timeout for gathering transactions.
pub const DEFAULT_INITIAL_RTO: Duration = Duration::from_millis(200);
/// Default total number of transmissions (Rc).
pub const DEFAULT_MAX_RETRANSMISSIONS: u32 = 7;
/// The wait after the final transmission is RTO multiplied by this.
pub const DEFAULT_LAST_MULTIPLIER: u32 = 16;
/// Single timeout replacing the whole schedule on reliable transports.
pub const DEFAULT_RELIABLE_TIMEOUT: Duration = Duration::from_millis(7200);

/// What the caller must do when a scheduled deadline fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// Send the request again and keep waiting.
    Retransmit,
    /// The schedule is exhausted; fail the transaction.
    Fail,
}

/// The retransmission schedule of a single STUN transaction: an initial
/// interval of RTO, doubled after every retransmission, for `Rc` total
/// transmissions, except that the wait after the last one is RTO·m. On
/// reliable transports a single long timeout replaces the sequence.
///
/// The timer is a pure value: the owner records deadlines and calls
/// [`RetransmissionTimer::on_timeout`] when they pass, which keeps paced
/// tick loops in charge of all IO.
#[derive(Debug, Clone)]
pub struct RetransmissionTimer {
    rto: Duration,
    max_retransmissions: u32,
    last_multiplier: u32,
    reliable: bool,
    reliable_timeout: Duration,
    transmissions: u32,
    next_interval: Duration,
    deadline: Option<Instant>,
}

impl Default for RetransmissionTimer {
    fn default() -> Self {
        RetransmissionTimer::new(
            DEFAULT_INITIAL_RTO,
            DEFAULT_MAX_RETRANSMISSIONS,
            false,
            DEFAULT_RELIABLE_TIMEOUT,
        )
    }
}

impl RetransmissionTimer {
    pub fn new(
        rto: Duration,
        max_retransmissions: u32,
        reliable: bool,
        reliable_timeout: Duration,
    ) -> Self {
        RetransmissionTimer {
            rto,
            max_retransmissions,
            last_multiplier: DEFAULT_LAST_MULTIPLIER,
            reliable,
            reliable_timeout,
            transmissions: 0,
            next_interval: rto,
            deadline: None,
        }
    }

    /// Arms the timer after the first transmission went out.
    pub fn start(&mut self, now: Instant) {
        self.transmissions = 1;
        if self.reliable {
            self.deadline = Some(now + self.reliable_timeout);
        } else {
            self.next_interval = self.rto;
            self.deadline = Some(now + self.current_interval());
        }
    }

    fn current_interval(&self) -> Duration {
        if self.transmissions >= self.max_retransmissions {
            self.rto * self.last_multiplier
        } else {
            self.next_interval
        }
    }

    /// The instant the owner should next look at this transaction, `None`
    /// while unarmed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn has_fired(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(d) if d <= now)
    }

    /// Advances the schedule once its deadline passed.
    pub fn on_timeout(&mut self, now: Instant) -> TimerAction {
        if self.reliable || self.transmissions >= self.max_retransmissions {
            self.deadline = None;
            return TimerAction::Fail;
        }

        self.transmissions += 1;
        self.next_interval *= 2;
        self.deadline = Some(now + self.current_interval());
        TimerAction::Retransmit
    }

    /// Number of transmissions performed so far.
    pub fn transmissions(&self) -> u32 {
        self.transmissions
    }

    /// Disarms the schedule (response arrived, transaction cancelled).
    pub fn stop(&mut self) {
        self.deadline = None;
    }
}
