use stun::attributes::ATTR_USE_CANDIDATE;
use stun::message::*;

/// USE-CANDIDATE attribute: present (empty) on a Binding request when the
/// controlling agent nominates the pair.
#[derive(Default)]
pub struct UseCandidateAttr;

impl Setter for UseCandidateAttr {
    fn add_to(&self, m: &mut Message) -> Result<(), stun::Error> {
        m.add(ATTR_USE_CANDIDATE, &[]);
        Ok(())
    }
}

impl UseCandidateAttr {
    pub fn new() -> Self {
        UseCandidateAttr {}
    }

    /// True if the USE-CANDIDATE attribute is set on `m`.
    pub fn is_set(m: &Message) -> bool {
        m.get(ATTR_USE_CANDIDATE).is_ok()
    }
}
