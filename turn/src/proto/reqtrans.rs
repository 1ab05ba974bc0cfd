use std::fmt;

use stun::attributes::ATTR_REQUESTED_TRANSPORT;
use stun::checks::*;
use stun::message::*;

use crate::proto::Protocol;

const REQUESTED_TRANSPORT_SIZE: usize = 4;

/// REQUESTED-TRANSPORT attribute (RFC 5766 section 14.7): the protocol
/// number in the first byte, the remaining three reserved.
#[derive(Default, Debug, PartialEq, Eq, Copy, Clone)]
pub struct RequestedTransport {
    pub protocol: Protocol,
}

impl fmt::Display for RequestedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol: {}", self.protocol)
    }
}

impl Setter for RequestedTransport {
    fn add_to(&self, m: &mut Message) -> std::result::Result<(), stun::Error> {
        let mut v = vec![0u8; REQUESTED_TRANSPORT_SIZE];
        v[0] = self.protocol.0;
        m.add(ATTR_REQUESTED_TRANSPORT, &v);
        Ok(())
    }
}

impl Getter for RequestedTransport {
    fn get_from(&mut self, m: &Message) -> std::result::Result<(), stun::Error> {
        let v = m.get(ATTR_REQUESTED_TRANSPORT)?;
        check_size(ATTR_REQUESTED_TRANSPORT, v.len(), REQUESTED_TRANSPORT_SIZE)?;
        self.protocol = Protocol(v[0]);
        Ok(())
    }
}
