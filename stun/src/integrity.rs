use std::fmt;

use md5::{Digest, Md5};
use ring::hmac;

use crate::attributes::*;
use crate::checks::*;
use crate::error::*;
use crate::message::*;

pub(crate) const CREDENTIALS_SEP: &str = ":";

pub(crate) const MESSAGE_INTEGRITY_SIZE: usize = 20;

/// MESSAGE-INTEGRITY attribute (RFC 5389 section 15.4): HMAC-SHA1 over the
/// message up to and including the attribute preceding this one, keyed by
/// the short-term password or the long-term MD5 digest.
#[derive(Default, Clone)]
pub struct MessageIntegrity(pub Vec<u8>);

fn new_hmac(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mac = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key);
    hmac::sign(&mac, message).as_ref().to_vec()
}

impl fmt::Display for MessageIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KEY: 0x{:x?}", self.0)
    }
}

impl Setter for MessageIntegrity {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        // FINGERPRINT is always the last attribute; integrity precedes it.
        for a in &m.attributes.0 {
            if a.typ == ATTR_FINGERPRINT {
                return Err(Error::ErrFingerprintBeforeIntegrity);
            }
        }
        // The HMAC input is the message with the length field already
        // adjusted to include the integrity TLV itself.
        let length = m.length;
        m.length += (MESSAGE_INTEGRITY_SIZE + ATTRIBUTE_HEADER_SIZE) as u32;
        m.write_length();
        let v = new_hmac(&self.0, &m.raw);
        m.length = length;

        m.add(ATTR_MESSAGE_INTEGRITY, &v);

        Ok(())
    }
}

impl MessageIntegrity {
    /// Key for the long-term credential mechanism. Username, realm and
    /// password must be SASL-prepared.
    pub fn new_long_term_integrity(username: String, realm: String, password: String) -> Self {
        let s = [username, realm, password].join(CREDENTIALS_SEP);

        let mut h = Md5::new();
        h.update(s.as_bytes());

        MessageIntegrity(h.finalize().as_slice().to_vec())
    }

    /// Key for the short-term credential mechanism.
    pub fn new_short_term_integrity(password: String) -> Self {
        MessageIntegrity(password.as_bytes().to_vec())
    }

    /// Raw key bytes, for dialects that carry pre-decoded credentials.
    pub fn new_raw(key: Vec<u8>) -> Self {
        MessageIntegrity(key)
    }

    /// Verifies the MESSAGE-INTEGRITY attribute of `m`.
    pub fn check(&self, m: &mut Message) -> Result<()> {
        let v = m.get(ATTR_MESSAGE_INTEGRITY)?;

        // Adjust the header length to what it was when the HMAC was
        // computed: everything after the integrity attribute (normally the
        // fingerprint) is excluded.
        let length = m.length as usize;
        let mut after_integrity = false;
        let mut size_reduced = 0;

        for a in &m.attributes.0 {
            if after_integrity {
                size_reduced += nearest_padded_value_length(a.length as usize);
                size_reduced += ATTRIBUTE_HEADER_SIZE;
            }
            if a.typ == ATTR_MESSAGE_INTEGRITY {
                after_integrity = true;
            }
        }
        m.length -= size_reduced as u32;
        m.write_length();
        let start_of_hmac = MESSAGE_HEADER_SIZE + m.length as usize
            - (ATTRIBUTE_HEADER_SIZE + MESSAGE_INTEGRITY_SIZE);
        let b = &m.raw[..start_of_hmac];
        let expected = new_hmac(&self.0, b);
        m.length = length as u32;
        m.write_length();
        check_hmac(&v, &expected)
    }
}
