use crc::{Crc, CRC_32_ISO_HDLC};

use crate::attributes::ATTR_FINGERPRINT;
use crate::checks::*;
use crate::error::*;
use crate::message::*;

/// FINGERPRINT attribute (RFC 5389 section 15.5).
pub struct FingerprintAttr;

/// Shorthand for [`FingerprintAttr`].
pub const FINGERPRINT: FingerprintAttr = FingerprintAttr {};

pub const FINGERPRINT_XOR_VALUE: u32 = 0x5354554e;
pub const FINGERPRINT_SIZE: usize = 4; // 32 bit

/// CRC-32 of `b` XOR-ed by 0x5354554e. The XOR keeps the value distinct
/// when the application payload itself carries a CRC-32.
pub fn fingerprint_value(b: &[u8]) -> u32 {
    let checksum = Crc::<u32>::new(&CRC_32_ISO_HDLC).checksum(b);
    checksum ^ FINGERPRINT_XOR_VALUE
}

impl Setter for FingerprintAttr {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let l = m.length;
        // the header length covers the fingerprint TLV while hashing
        m.length += (FINGERPRINT_SIZE + ATTRIBUTE_HEADER_SIZE) as u32;
        m.write_length();
        let val = fingerprint_value(&m.raw);
        let b = val.to_be_bytes();
        m.length = l;
        m.add(ATTR_FINGERPRINT, &b);
        Ok(())
    }
}

impl FingerprintAttr {
    /// Reads the fingerprint value from `m` and checks it.
    pub fn check(&self, m: &Message) -> Result<()> {
        let b = m.get(ATTR_FINGERPRINT)?;
        check_size(ATTR_FINGERPRINT, b.len(), FINGERPRINT_SIZE)?;
        let val = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        let attr_start = m.raw.len() - (FINGERPRINT_SIZE + ATTRIBUTE_HEADER_SIZE);
        let expected = fingerprint_value(&m.raw[..attr_start]);
        check_fingerprint(val, expected)
    }
}
