use std::fmt;

use stun::attributes::ATTR_EVEN_PORT;
use stun::message::*;

/// EVEN-PORT attribute (RFC 5766 section 14.6): requests an even relay
/// port, optionally reserving the next one.
#[derive(Default, Debug, PartialEq, Eq, Copy, Clone)]
pub struct EvenPort {
    /// R bit: reserve the port number following the allocated one.
    pub reserve_port: bool,
}

impl fmt::Display for EvenPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reserve_port {
            write!(f, "reserve: true")
        } else {
            write!(f, "reserve: false")
        }
    }
}

impl Setter for EvenPort {
    fn add_to(&self, m: &mut Message) -> std::result::Result<(), stun::Error> {
        let mut v = vec![0u8; 1];
        if self.reserve_port {
            v[0] = 0x80;
        }
        m.add(ATTR_EVEN_PORT, &v);
        Ok(())
    }
}

impl Getter for EvenPort {
    fn get_from(&mut self, m: &Message) -> std::result::Result<(), stun::Error> {
        let v = m.get(ATTR_EVEN_PORT)?;
        if v.is_empty() {
            return Err(stun::Error::ErrUnexpectedEof);
        }
        self.reserve_port = v[0] & 0x80 != 0;
        Ok(())
    }
}
