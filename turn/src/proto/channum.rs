use std::fmt;

use stun::attributes::ATTR_CHANNEL_NUMBER;
use stun::checks::*;
use stun::message::*;

use crate::error::*;

/// Minimum allowed channel number (RFC 5766 section 11).
pub const MIN_CHANNEL_NUMBER: u16 = 0x4000;
/// Maximum allowed channel number.
pub const MAX_CHANNEL_NUMBER: u16 = 0x7FFF;

const CHANNEL_NUMBER_SIZE: usize = 4;

/// CHANNEL-NUMBER attribute: the number is in the first two bytes, the
/// trailing two are reserved-for-future-use.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct ChannelNumber(pub u16);

impl fmt::Display for ChannelNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CHANNEL-NUMBER: {}", self.0)
    }
}

impl Setter for ChannelNumber {
    fn add_to(&self, m: &mut Message) -> std::result::Result<(), stun::Error> {
        let mut v = vec![0u8; CHANNEL_NUMBER_SIZE];
        v[..2].copy_from_slice(&self.0.to_be_bytes());
        m.add(ATTR_CHANNEL_NUMBER, &v);
        Ok(())
    }
}

impl Getter for ChannelNumber {
    fn get_from(&mut self, m: &Message) -> std::result::Result<(), stun::Error> {
        let v = m.get(ATTR_CHANNEL_NUMBER)?;
        check_size(ATTR_CHANNEL_NUMBER, v.len(), CHANNEL_NUMBER_SIZE)?;
        self.0 = u16::from_be_bytes([v[0], v[1]]);
        Ok(())
    }
}

impl ChannelNumber {
    /// True when the number lies in the range TURN reserves for channels.
    pub fn is_valid(&self) -> bool {
        self.0 >= MIN_CHANNEL_NUMBER && self.0 <= MAX_CHANNEL_NUMBER
    }

    pub fn check(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::ErrInvalidChannelNumber)
        }
    }
}
