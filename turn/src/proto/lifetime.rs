use std::fmt;
use std::time::Duration;

use stun::attributes::ATTR_LIFETIME;
use stun::checks::*;
use stun::message::*;

const LIFETIME_SIZE: usize = 4; // seconds as u32

/// LIFETIME attribute (RFC 5766 section 14.2): allocation lifetime in
/// seconds. Zero requests deletion.
#[derive(Default, Debug, PartialEq, Eq, Copy, Clone)]
pub struct Lifetime(pub Duration);

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0.as_secs())
    }
}

impl Setter for Lifetime {
    fn add_to(&self, m: &mut Message) -> std::result::Result<(), stun::Error> {
        let v = (self.0.as_secs() as u32).to_be_bytes();
        m.add(ATTR_LIFETIME, &v);
        Ok(())
    }
}

impl Getter for Lifetime {
    fn get_from(&mut self, m: &Message) -> std::result::Result<(), stun::Error> {
        let v = m.get(ATTR_LIFETIME)?;
        check_size(ATTR_LIFETIME, v.len(), LIFETIME_SIZE)?;
        let seconds = u32::from_be_bytes([v[0], v[1], v[2], v[3]]);
        self.0 = Duration::from_secs(seconds as u64);
        Ok(())
    }
}
