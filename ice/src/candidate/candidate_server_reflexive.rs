use super::*;
use crate::candidate::candidate_base::{CandidateBase, CandidateBaseConfig};

/// A candidate learned from a STUN Binding response: the public address is
/// the server's reflection, the base is the host candidate it was sent
/// from.
pub struct CandidateServerReflexiveConfig {
    pub base_config: CandidateBaseConfig,
    pub base_addr: std::net::SocketAddr,
}

impl CandidateServerReflexiveConfig {
    pub fn new_candidate_server_reflexive(self) -> Result<CandidateBase> {
        let related = CandidateRelatedAddress {
            address: self.base_addr.ip().to_string(),
            port: self.base_addr.port(),
        };
        CandidateBase::new_common(
            self.base_config,
            CandidateType::ServerReflexive,
            TcpType::Unspecified,
            self.base_addr,
            None,
            Some(related),
        )
    }
}
