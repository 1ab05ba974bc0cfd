use super::*;
use crate::candidate::candidate_base::{CandidateBase, CandidateBaseConfig};

/// A candidate bound directly on a local interface.
#[derive(Default)]
pub struct CandidateHostConfig {
    pub base_config: CandidateBaseConfig,
    pub tcp_type: TcpType,
}

impl CandidateHostConfig {
    pub fn new_candidate_host(self) -> Result<CandidateBase> {
        let addr = self.base_config.address;
        CandidateBase::new_common(
            self.base_config,
            CandidateType::Host,
            self.tcp_type,
            addr, // a host candidate is its own base
            None,
            None,
        )
    }
}
