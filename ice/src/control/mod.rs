use std::fmt;

use stun::attributes::*;
use stun::checks::*;
use stun::message::*;

/// Common helper for ICE-{CONTROLLED,CONTROLLING}: the 64-bit tie-breaker
/// used to resolve role conflicts.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct TieBreaker(pub u64);

pub(crate) const TIE_BREAKER_SIZE: usize = 8; // 64 bit

impl TieBreaker {
    pub fn add_to_as(&self, m: &mut Message, t: AttrType) -> Result<(), stun::Error> {
        let mut v = vec![0u8; TIE_BREAKER_SIZE];
        v.copy_from_slice(&self.0.to_be_bytes());
        m.add(t, &v);
        Ok(())
    }

    pub fn get_from_as(&mut self, m: &Message, t: AttrType) -> Result<(), stun::Error> {
        let v = m.get(t)?;
        check_size(t, v.len(), TIE_BREAKER_SIZE)?;
        self.0 = u64::from_be_bytes([v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7]]);
        Ok(())
    }
}

/// ICE-CONTROLLED attribute.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct AttrControlled(pub u64);

impl Setter for AttrControlled {
    fn add_to(&self, m: &mut Message) -> Result<(), stun::Error> {
        TieBreaker(self.0).add_to_as(m, ATTR_ICE_CONTROLLED)
    }
}

impl Getter for AttrControlled {
    fn get_from(&mut self, m: &Message) -> Result<(), stun::Error> {
        let mut t = TieBreaker::default();
        t.get_from_as(m, ATTR_ICE_CONTROLLED)?;
        self.0 = t.0;
        Ok(())
    }
}

/// ICE-CONTROLLING attribute.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct AttrControlling(pub u64);

impl Setter for AttrControlling {
    fn add_to(&self, m: &mut Message) -> Result<(), stun::Error> {
        TieBreaker(self.0).add_to_as(m, ATTR_ICE_CONTROLLING)
    }
}

impl Getter for AttrControlling {
    fn get_from(&mut self, m: &Message) -> Result<(), stun::Error> {
        let mut t = TieBreaker::default();
        t.get_from_as(m, ATTR_ICE_CONTROLLING)?;
        self.0 = t.0;
        Ok(())
    }
}

/// NOMINATION attribute from the renomination draft: a counter the
/// controlling side bumps each time it moves the selection.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct AttrNomination(pub u32);

const NOMINATION_SIZE: usize = 4;

impl Setter for AttrNomination {
    fn add_to(&self, m: &mut Message) -> Result<(), stun::Error> {
        let mut v = vec![0u8; NOMINATION_SIZE];
        v.copy_from_slice(&self.0.to_be_bytes());
        m.add(ATTR_NOMINATION, &v);
        Ok(())
    }
}

impl Getter for AttrNomination {
    fn get_from(&mut self, m: &Message) -> Result<(), stun::Error> {
        let v = m.get(ATTR_NOMINATION)?;
        check_size(ATTR_NOMINATION, v.len(), NOMINATION_SIZE)?;
        self.0 = u32::from_be_bytes([v[0], v[1], v[2], v[3]]);
        Ok(())
    }
}

/// The agent role, controlling or controlled.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Role {
    Controlling,
    Controlled,
}

impl Default for Role {
    fn default() -> Self {
        Role::Controlling
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Role::Controlling => "controlling",
            Role::Controlled => "controlled",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod control_test {
    use stun::agent::TransactionId;

    use super::*;

    #[test]
    fn test_tie_breaker_roundtrip() {
        let mut m = Message::new();
        m.transaction_id = TransactionId::new();
        m.write_header();

        AttrControlling(0x1122_3344_5566_7788)
            .add_to(&mut m)
            .unwrap();

        let mut got = AttrControlling::default();
        got.get_from(&m).unwrap();
        assert_eq!(got.0, 0x1122_3344_5566_7788);

        let mut controlled = AttrControlled::default();
        assert!(controlled.get_from(&m).is_err());
    }

    #[test]
    fn test_nomination_roundtrip() {
        let mut m = Message::new();
        m.transaction_id = TransactionId::new();
        m.write_header();

        AttrNomination(7).add_to(&mut m).unwrap();

        let mut got = AttrNomination::default();
        got.get_from(&m).unwrap();
        assert_eq!(got.0, 7);
    }
}
