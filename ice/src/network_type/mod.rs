use std::fmt;
use std::net::IpAddr;

use serde::Serialize;

use crate::error::*;

pub(crate) const UDP: &str = "udp";
pub(crate) const TCP: &str = "tcp";

/// The transport protocol and address family of a candidate.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash, Serialize)]
pub enum NetworkType {
    #[serde(rename = "udp4")]
    Udp4,
    #[serde(rename = "udp6")]
    Udp6,
    #[serde(rename = "tcp4")]
    Tcp4,
    #[serde(rename = "tcp6")]
    Tcp6,
}

impl Default for NetworkType {
    fn default() -> Self {
        Self::Udp4
    }
}

impl From<u8> for NetworkType {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Udp6,
            2 => Self::Tcp4,
            3 => Self::Tcp6,
            _ => Self::Udp4,
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Udp4 => "udp4",
            Self::Udp6 => "udp6",
            Self::Tcp4 => "tcp4",
            Self::Tcp6 => "tcp6",
        };
        write!(f, "{s}")
    }
}

impl NetworkType {
    pub fn new(network: &str, ip: &IpAddr) -> Result<Self> {
        determine_network_type(network, ip)
    }

    /// Short protocol name ("udp" / "tcp") used in the candidate line.
    pub fn network_short(&self) -> String {
        match *self {
            Self::Udp4 | Self::Udp6 => UDP.to_owned(),
            Self::Tcp4 | Self::Tcp6 => TCP.to_owned(),
        }
    }

    pub fn is_udp(&self) -> bool {
        matches!(*self, Self::Udp4 | Self::Udp6)
    }

    pub fn is_tcp(&self) -> bool {
        matches!(*self, Self::Tcp4 | Self::Tcp6)
    }

    pub fn is_ipv4(&self) -> bool {
        matches!(*self, Self::Udp4 | Self::Tcp4)
    }

    pub fn is_ipv6(&self) -> bool {
        matches!(*self, Self::Udp6 | Self::Tcp6)
    }

    /// Candidates can only be paired over the same protocol and family.
    pub fn is_compatible_with(&self, other: NetworkType) -> bool {
        self.is_udp() == other.is_udp() && self.is_ipv4() == other.is_ipv4()
    }
}

pub(crate) fn determine_network_type(network: &str, ip: &IpAddr) -> Result<NetworkType> {
    let ipv4 = ip.is_ipv4();
    if network.starts_with(UDP) {
        if ipv4 {
            Ok(NetworkType::Udp4)
        } else {
            Ok(NetworkType::Udp6)
        }
    } else if network.starts_with(TCP) {
        if ipv4 {
            Ok(NetworkType::Tcp4)
        } else {
            Ok(NetworkType::Tcp6)
        }
    } else {
        Err(Error::ErrAddressParseFailed)
    }
}
