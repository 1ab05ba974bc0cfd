use std::net::SocketAddr;

use super::*;
use crate::candidate::candidate_base::{CandidateBase, CandidateBaseConfig};

/// A candidate allocated on a TURN server. Its base is the relayed address
/// itself, and candidates from the same server share a foundation.
pub struct CandidateRelayConfig {
    pub base_config: CandidateBaseConfig,
    pub rel_addr: Option<SocketAddr>,
    pub server_addr: Option<SocketAddr>,
    /// The client owning the allocation; closed with the candidate.
    pub relay_client: Option<turn::client::Client>,
}

impl CandidateRelayConfig {
    pub fn new_candidate_relay(self) -> Result<CandidateBase> {
        let addr = self.base_config.address;
        let related = self.rel_addr.map(|a| CandidateRelatedAddress {
            address: a.ip().to_string(),
            port: a.port(),
        });
        let mut base = CandidateBase::new_common(
            self.base_config,
            CandidateType::Relay,
            TcpType::Unspecified,
            addr, // the base of a relayed candidate is the candidate itself
            self.server_addr,
            related,
        )?;
        if let Some(client) = self.relay_client {
            base.set_relay_client(client);
        }
        Ok(base)
    }
}
