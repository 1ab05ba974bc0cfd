use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use stun::attributes::ATTR_XOR_RELAYED_ADDRESS;
use stun::message::*;
use stun::xoraddr::XorMappedAddress;

/// XOR-RELAYED-ADDRESS attribute (RFC 5766 section 14.5): the transport
/// address the server allocated on behalf of the client.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct RelayedAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for RelayedAddress {
    fn default() -> Self {
        RelayedAddress {
            ip: IpAddr::V4(Ipv4Addr::from(0)),
            port: 0,
        }
    }
}

impl fmt::Display for RelayedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(_) => write!(f, "{}:{}", self.ip, self.port),
            IpAddr::V6(_) => write!(f, "[{}]:{}", self.ip, self.port),
        }
    }
}

impl Setter for RelayedAddress {
    fn add_to(&self, m: &mut Message) -> std::result::Result<(), stun::Error> {
        let a = XorMappedAddress {
            ip: self.ip,
            port: self.port,
        };
        a.add_to_as(m, ATTR_XOR_RELAYED_ADDRESS)
    }
}

impl Getter for RelayedAddress {
    fn get_from(&mut self, m: &Message) -> std::result::Result<(), stun::Error> {
        let mut a = XorMappedAddress::default();
        a.get_from_as(m, ATTR_XOR_RELAYED_ADDRESS)?;
        self.ip = a.ip;
        self.port = a.port;
        Ok(())
    }
}
