use std::fmt;

use serde::Serialize;

/// Per-component connectivity state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ComponentState {
    /// No activity has been scheduled yet.
    #[serde(rename = "disconnected")]
    Disconnected = 0,

    /// Local candidates are being gathered.
    #[serde(rename = "gathering")]
    Gathering = 1,

    /// Connectivity checks are in progress.
    #[serde(rename = "connecting")]
    Connecting = 2,

    /// At least one pair works, but selection is not final.
    #[serde(rename = "connected")]
    Connected = 3,

    /// A pair has been nominated and selected.
    #[serde(rename = "ready")]
    Ready = 4,

    /// No working pair could be found or the one in use broke.
    #[serde(rename = "failed")]
    Failed = 5,
}

impl Default for ComponentState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl From<u8> for ComponentState {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Gathering,
            2 => Self::Connecting,
            3 => Self::Connected,
            4 => Self::Ready,
            5 => Self::Failed,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Disconnected => "disconnected",
            Self::Gathering => "gathering",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// The legal transition set. Failed is reachable from everywhere, restart
/// can always go back to Gathering, and Ready drops to Connected when a
/// check on the selected pair is retried.
pub fn is_valid_transition(old: ComponentState, new: ComponentState) -> bool {
    use ComponentState::*;

    if old == new {
        return false;
    }
    matches!(
        (old, new),
        (_, Failed)
            | (_, Gathering)
            | (Disconnected, Connecting)
            | (Gathering, Connecting)
            | (Connecting, Connected)
            | (Connected, Ready)
            | (Ready, Connected)
            | (Connected, Connecting)
            | (Failed, Connecting)
    )
}

/// State of the candidate gathering process for a stream.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum GatheringState {
    /// Gathering has not been started.
    New,
    /// Gathering is ongoing.
    Gathering,
    /// Every discovery item finished.
    Complete,
}

impl Default for GatheringState {
    fn default() -> Self {
        Self::New
    }
}

impl From<u8> for GatheringState {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Gathering,
            2 => Self::Complete,
            _ => Self::New,
        }
    }
}

impl fmt::Display for GatheringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::New => "new",
            Self::Gathering => "gathering",
            Self::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod state_test {
    use super::*;

    #[test]
    fn test_standard_progression_is_valid() {
        use ComponentState::*;
        let path = [Disconnected, Gathering, Connecting, Connected, Ready];
        for w in path.windows(2) {
            assert!(is_valid_transition(w[0], w[1]), "{} -> {}", w[0], w[1]);
        }
    }

    #[test]
    fn test_failed_is_reachable_from_everywhere() {
        use ComponentState::*;
        for s in [Disconnected, Gathering, Connecting, Connected, Ready] {
            assert!(is_valid_transition(s, Failed));
        }
    }

    #[test]
    fn test_ready_can_fall_back_to_connected() {
        assert!(is_valid_transition(
            ComponentState::Ready,
            ComponentState::Connected
        ));
    }

    #[test]
    fn test_backwards_jumps_are_rejected() {
        use ComponentState::*;
        assert!(!is_valid_transition(Ready, Connecting));
        assert!(!is_valid_transition(Connected, Disconnected));
        assert!(!is_valid_transition(Ready, Ready));
    }
}
