use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::compatibility::Compatibility;

/// Pacing interval Ta for gathering and checks.
pub(crate) const DEFAULT_TIMER_TA: Duration = Duration::from_millis(20);

/// Cap on the conncheck list, per stream.
pub(crate) const DEFAULT_MAX_CONNECTIVITY_CHECKS: usize = 100;

/// Initial retransmission timeout for discovery transactions.
pub(crate) const DEFAULT_STUN_INITIAL_TIMEOUT: Duration = Duration::from_millis(200);

/// Initial retransmission timeout for connectivity checks; checks are
/// paced tightly, so their schedule starts shorter than discovery's.
pub(crate) const DEFAULT_CONNCHECK_INITIAL_TIMEOUT: Duration = Duration::from_millis(50);

/// Total transmissions per STUN transaction (Rc).
pub(crate) const DEFAULT_STUN_MAX_RETRANSMISSIONS: u32 = 7;

/// Single timeout replacing the schedule on reliable transports.
pub(crate) const DEFAULT_STUN_RELIABLE_TIMEOUT: Duration = Duration::from_millis(7200);

/// Grace period before a stream with only failed pairs goes Failed.
pub(crate) const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Consent freshness check period (RFC 7675) and its loss timeout.
pub(crate) const CONSENT_CHECK_INTERVAL: Duration = Duration::from_secs(5);
pub(crate) const CONSENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Keepalive period when consent freshness is off.
pub(crate) const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

pub(crate) const DEFAULT_MAX_LOCAL_ADDRESSES: usize = 8;
pub(crate) const DEFAULT_MAX_TURN_SERVERS: usize = 4;

/// How a TURN server is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnTransport {
    Udp,
    Tcp,
    Tls,
}

impl Default for TurnTransport {
    fn default() -> Self {
        Self::Udp
    }
}

/// One TURN server usable by a component. Its preference is its index in
/// the per-component list.
#[derive(Debug, Clone)]
pub struct TurnServerConfig {
    pub server: SocketAddr,
    pub username: String,
    pub password: String,
    pub realm: String,
    pub transport: TurnTransport,
}

/// The nomination strategy of the controlling agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NominationMode {
    /// Nominate with a second, USE-CANDIDATE carrying check once a pair
    /// succeeded.
    Regular,
    /// Carry USE-CANDIDATE on every check and accept the first success.
    Aggressive,
}

impl Default for NominationMode {
    fn default() -> Self {
        Self::Aggressive
    }
}

/// Collects the arguments to `Agent` construction into one structure.
pub struct AgentConfig {
    /// Wire dialect; drives the STUN codec flags, priority formula,
    /// credential coding and TURN variant.
    pub compatibility: Compatibility,

    /// Server for server-reflexive gathering, if any.
    pub stun_server: Option<SocketAddr>,

    /// Initial ICE role.
    pub controlling_mode: bool,

    /// Lite mode never initiates checks; it only responds.
    pub full_mode: bool,

    /// Pacing interval Ta for gathering and checks.
    pub timer_ta: Duration,

    /// Conncheck list cap per stream.
    pub max_connectivity_checks: usize,

    pub nomination_mode: NominationMode,

    /// Engage pseudo-TCP over unreliable selected pairs.
    pub reliable: bool,

    /// Which transports to gather. At least one must stay enabled.
    pub ice_udp: bool,
    pub ice_tcp: bool,

    /// Merge packet boundaries on ICE-TCP instead of preserving them.
    pub bytestream_tcp: bool,

    /// Use Binding requests (never failing the pair) as keepalives.
    pub keepalive_conncheck: bool,

    /// Keep only relayed candidates and TURN-sourced inbound traffic.
    pub force_relay: bool,

    /// Total transmissions per STUN transaction (Rc), 1..=99.
    pub stun_max_retransmissions: u32,

    /// Initial retransmission timeout (RTO) for discovery.
    pub stun_initial_timeout: Duration,

    /// Initial retransmission timeout for connectivity checks.
    pub conncheck_initial_timeout: Duration,

    /// Single timeout for STUN over reliable transports.
    pub stun_reliable_timeout: Duration,

    /// Defer failure until the peer says its gathering is done.
    pub ice_trickle: bool,

    /// RFC 7675 consent freshness on selected pairs.
    pub consent_freshness: bool,

    /// Accept NOMINATION attributes after initial selection.
    pub support_renomination: bool,

    /// Grace period before Failed once every pair is terminal.
    pub idle_timeout: Duration,

    /// Cap on gathered host addresses per component.
    pub max_local_addresses: usize,

    /// Cap on TURN servers per component.
    pub max_turn_servers: usize,

    /// Host candidate port range; (0, 0) uses ephemeral ports.
    pub port_min: u16,
    pub port_max: u16,

    /// Local addresses to gather host candidates on. When empty the agent
    /// enumerates the machine's addresses itself.
    pub local_addresses: Vec<IpAddr>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            compatibility: Compatibility::Rfc5245,
            stun_server: None,
            controlling_mode: true,
            full_mode: true,
            timer_ta: DEFAULT_TIMER_TA,
            max_connectivity_checks: DEFAULT_MAX_CONNECTIVITY_CHECKS,
            nomination_mode: NominationMode::Aggressive,
            reliable: false,
            ice_udp: true,
            ice_tcp: true,
            bytestream_tcp: false,
            keepalive_conncheck: false,
            force_relay: false,
            stun_max_retransmissions: DEFAULT_STUN_MAX_RETRANSMISSIONS,
            stun_initial_timeout: DEFAULT_STUN_INITIAL_TIMEOUT,
            conncheck_initial_timeout: DEFAULT_CONNCHECK_INITIAL_TIMEOUT,
            stun_reliable_timeout: DEFAULT_STUN_RELIABLE_TIMEOUT,
            ice_trickle: false,
            consent_freshness: false,
            support_renomination: false,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_local_addresses: DEFAULT_MAX_LOCAL_ADDRESSES,
            max_turn_servers: DEFAULT_MAX_TURN_SERVERS,
            port_min: 0,
            port_max: 0,
            local_addresses: vec![],
        }
    }
}
