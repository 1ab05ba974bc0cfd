#[cfg(test)]
mod proto_test;

pub mod chandata;
pub mod channum;
pub mod data;
pub mod evenport;
pub mod lifetime;
pub mod peeraddr;
pub mod relayaddr;
pub mod reqtrans;

use std::fmt;

/// IANA assigned protocol number carried in REQUESTED-TRANSPORT.
#[derive(PartialEq, Eq, Default, Copy, Clone, Debug)]
pub struct Protocol(pub u8);

/// IANA assigned protocol number for UDP.
pub const PROTO_UDP: Protocol = Protocol(17);

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let others = format!("{}", self.0);
        let s = match *self {
            PROTO_UDP => "UDP",
            _ => others.as_str(),
        };

        write!(f, "{s}")
    }
}
