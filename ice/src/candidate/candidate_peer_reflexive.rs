use super::*;
use crate::candidate::candidate_base::{CandidateBase, CandidateBaseConfig};

/// A candidate learned from a connectivity check arriving from (or
/// reflecting) a previously unknown transport address.
pub struct CandidatePeerReflexiveConfig {
    pub base_config: CandidateBaseConfig,
    pub base_addr: std::net::SocketAddr,
}

impl CandidatePeerReflexiveConfig {
    pub fn new_candidate_peer_reflexive(self) -> Result<CandidateBase> {
        let related = CandidateRelatedAddress {
            address: self.base_addr.ip().to_string(),
            port: self.base_addr.port(),
        };
        CandidateBase::new_common(
            self.base_config,
            CandidateType::PeerReflexive,
            TcpType::Unspecified,
            self.base_addr,
            None,
            Some(related),
        )
    }
}
