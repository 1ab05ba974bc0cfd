use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::attributes::*;
use crate::checks::*;
use crate::error::*;
use crate::message::*;

pub const FAMILY_IPV4: u16 = 0x01;
pub const FAMILY_IPV6: u16 = 0x02;

pub const IPV4LEN: usize = 4;
pub const IPV6LEN: usize = 16;

/// MAPPED-ADDRESS attribute (RFC 5389 section 15.1), also the shape of the
/// legacy un-xored address attributes.
pub struct MappedAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for MappedAddress {
    fn default() -> Self {
        MappedAddress {
            ip: IpAddr::V4(Ipv4Addr::from(0)),
            port: 0,
        }
    }
}

impl fmt::Display for MappedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(_) => write!(f, "{}:{}", self.ip, self.port),
            IpAddr::V6(_) => write!(f, "[{}]:{}", self.ip, self.port),
        }
    }
}

impl Setter for MappedAddress {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        self.add_to_as(m, ATTR_MAPPED_ADDRESS)
    }
}

impl Getter for MappedAddress {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        self.get_from_as(m, ATTR_MAPPED_ADDRESS)
    }
}

impl MappedAddress {
    /// Adds this value to `m` as attribute `t`.
    pub fn add_to_as(&self, m: &mut Message, t: AttrType) -> Result<()> {
        let (family, ip) = match self.ip {
            IpAddr::V4(ipv4) => (FAMILY_IPV4, ipv4.octets().to_vec()),
            IpAddr::V6(ipv6) => (FAMILY_IPV6, ipv6.octets().to_vec()),
        };

        let mut value = vec![0u8; 4];
        value[0..2].copy_from_slice(&family.to_be_bytes());
        value[2..4].copy_from_slice(&self.port.to_be_bytes());
        value.extend_from_slice(&ip);
        m.add(t, &value);
        Ok(())
    }

    /// Decodes attribute `t` from `m` into this value.
    pub fn get_from_as(&mut self, m: &Message, t: AttrType) -> Result<()> {
        let v = m.get(t)?;
        if v.len() <= 4 {
            return Err(Error::ErrUnexpectedEof);
        }

        let family = u16::from_be_bytes([v[0], v[1]]);
        if family != FAMILY_IPV4 && family != FAMILY_IPV6 {
            return Err(Error::ErrBadAddressFamily);
        }
        self.port = u16::from_be_bytes([v[2], v[3]]);

        if family == FAMILY_IPV6 {
            check_overflow(t, v[4..].len(), IPV6LEN)?;
            let mut ip = [0u8; IPV6LEN];
            let l = std::cmp::min(ip.len(), v[4..].len());
            ip[..l].copy_from_slice(&v[4..4 + l]);
            self.ip = IpAddr::V6(Ipv6Addr::from(ip));
        } else {
            check_overflow(t, v[4..].len(), IPV4LEN)?;
            let mut ip = [0u8; IPV4LEN];
            let l = std::cmp::min(ip.len(), v[4..].len());
            ip[..l].copy_from_slice(&v[4..4 + l]);
            self.ip = IpAddr::V4(Ipv4Addr::from(ip));
        }

        Ok(())
    }
}
