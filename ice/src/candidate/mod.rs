#[cfg(test)]
mod candidate_pair_test;
#[cfg(test)]
mod candidate_test;

pub mod candidate_base;
pub mod candidate_host;
pub mod candidate_pair;
pub mod candidate_peer_reflexive;
pub mod candidate_relay;
pub mod candidate_server_reflexive;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

use crate::error::Result;
use crate::network_type::NetworkType;
use crate::tcp_type::TcpType;

pub use candidate_base::{unmarshal_candidate, CandidateBase, CandidateBaseConfig};
pub use candidate_pair::{CandidatePair, CandidatePairState};

pub(crate) const RECEIVE_MTU: usize = 8192;

/// A potential transport address of this agent or its peer.
#[async_trait]
pub trait Candidate: fmt::Display {
    /// The foundation: equal for two candidates of the same type,
    /// transport, base address and (for relayed ones) TURN server, which
    /// is what parameterizes pair freezing.
    fn foundation(&self) -> String;
    fn set_foundation(&self, foundation: &str);

    /// A unique identifier for just this candidate.
    fn id(&self) -> String;

    fn stream_id(&self) -> u32;
    fn component(&self) -> u16;
    fn set_component(&self, c: u16);

    fn last_received(&self) -> SystemTime;
    fn last_sent(&self) -> SystemTime;

    fn network_type(&self) -> NetworkType;
    fn candidate_type(&self) -> CandidateType;
    fn tcp_type(&self) -> TcpType;

    /// The advertised transport address.
    fn addr(&self) -> SocketAddr;
    /// The local address this candidate is based on: the host address the
    /// server reflection was learned from, or the relayed address itself.
    fn base_addr(&self) -> SocketAddr;
    /// The TURN server holding the allocation, for relayed candidates.
    fn server_addr(&self) -> Option<SocketAddr>;

    fn priority(&self) -> u32;

    /// Credentials carried per candidate by some dialects.
    fn candidate_username(&self) -> Option<String>;
    fn candidate_password(&self) -> Option<String>;

    fn related_address(&self) -> Option<CandidateRelatedAddress>;

    /// The candidate line form, re-parsable by [`unmarshal_candidate`].
    fn marshal(&self) -> String;

    async fn close(&self) -> Result<()>;
    fn seen(&self, outbound: bool);

    async fn write_to(&self, raw: &[u8], dst: &(dyn Candidate + Send + Sync)) -> Result<usize>;
    fn equal(&self, other: &dyn Candidate) -> bool;

    fn get_conn(&self) -> Option<Arc<dyn util::Conn + Send + Sync>>;
    /// Attaches a socket after construction: the dialed stream of an
    /// active TCP candidate, or the connection accepted by a passive one.
    fn set_conn(&self, conn: Arc<dyn util::Conn + Send + Sync>);
    fn get_closed_ch(&self) -> Arc<Mutex<Option<broadcast::Sender<()>>>>;
}

/// The type of an ICE candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CandidateType {
    #[serde(rename = "unspecified")]
    Unspecified,
    #[serde(rename = "host")]
    Host,
    #[serde(rename = "srflx")]
    ServerReflexive,
    #[serde(rename = "prflx")]
    PeerReflexive,
    #[serde(rename = "relay")]
    Relay,
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Host => "host",
            Self::ServerReflexive => "srflx",
            Self::PeerReflexive => "prflx",
            Self::Relay => "relay",
            Self::Unspecified => "unknown candidate type",
        };
        write!(f, "{s}")
    }
}

impl Default for CandidateType {
    fn default() -> Self {
        Self::Unspecified
    }
}

impl CandidateType {
    /// Type preference of RFC 5245 section 4.1.2.2: 126 for host, 110 for
    /// peer reflexive, 100 for server reflexive, 0 for relayed.
    #[must_use]
    pub const fn preference(self) -> u16 {
        match self {
            Self::Host => 126,
            Self::PeerReflexive => 110,
            Self::ServerReflexive => 100,
            Self::Relay | Self::Unspecified => 0,
        }
    }
}

/// The transport address a candidate is derived from, carried in the
/// candidate line for diagnostics.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct CandidateRelatedAddress {
    pub address: String,
    pub port: u16,
}

impl fmt::Display for CandidateRelatedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " related {}:{}", self.address, self.port)
    }
}
