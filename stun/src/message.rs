#[cfg(test)]
mod message_test;

use std::fmt;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;

use crate::agent::TransactionId;
use crate::attributes::*;
use crate::dialect::Dialect;
use crate::error::*;
use crate::fingerprint::FingerprintAttr;
use crate::integrity::MessageIntegrity;

/// Fixed value distinguishing STUN packets from other protocols multiplexed
/// on the same port. Network byte order, "STUN Message Structure" section 6.
pub const MAGIC_COOKIE: u32 = 0x2112A442;
pub const ATTRIBUTE_HEADER_SIZE: usize = 4;
pub const MESSAGE_HEADER_SIZE: usize = 20;

/// Length of the transaction id array in bytes. Dialects with 128-bit ids
/// treat the cookie field as the leading 4 bytes of the id and skip cookie
/// validation.
pub const TRANSACTION_ID_SIZE: usize = 12; // 96 bit

/// Upper bound for a message this codec will build or accept; everything is
/// stack/arena friendly below the usual ethernet MTU ceiling.
pub const MAX_MESSAGE_SIZE: usize = 1500;

/// Setter sets an attribute on a message being built.
pub trait Setter: Send + Sync {
    fn add_to(&self, m: &mut Message) -> Result<()>;
}

/// Getter parses an attribute out of a message.
pub trait Getter {
    fn get_from(&mut self, m: &Message) -> Result<()>;
}

/// Checker validates an aspect of a received message.
pub trait Checker {
    fn check(&self, m: &Message) -> Result<()>;
}

/// The fast validator: only the header shape is inspected, no attribute or
/// checksum work. Used to split incoming packets into "plausibly STUN" and
/// "application data"; a `true` here does not guarantee [`Message::decode`]
/// or [`Message::validate`] will succeed.
pub fn is_message(b: &[u8]) -> bool {
    if b.len() < MESSAGE_HEADER_SIZE {
        return false;
    }
    // the two topmost bits of the type are always zero
    if b[0] & 0xC0 != 0 {
        return false;
    }
    let length = u16::from_be_bytes([b[2], b[3]]) as usize;
    MESSAGE_HEADER_SIZE + length <= b.len()
}

/// A single STUN packet over an owned raw buffer. The raw bytes and the
/// parsed attribute list are kept in sync by the builder methods; parsed
/// attribute values are copies and stay valid when `raw` changes.
#[derive(Default, Debug, Clone)]
pub struct Message {
    pub typ: MessageType,
    pub length: u32, // len(raw) not including header
    pub transaction_id: TransactionId,
    pub attributes: Attributes,
    pub raw: Vec<u8>,
    /// OC2007 dialect: attribute values are written without 32-bit padding.
    pub unaligned: bool,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t_id = BASE64_STANDARD.encode(self.transaction_id.0);
        write!(
            f,
            "{} l={} attrs={} id={}",
            self.typ,
            self.length,
            self.attributes.0.len(),
            t_id
        )
    }
}

// Equality ignores `raw`.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.typ == other.typ
            && self.transaction_id == other.transaction_id
            && self.length == other.length
            && self.attributes == other.attributes
    }
}

const DEFAULT_RAW_CAPACITY: usize = 120;

impl Setter for Message {
    // Copies the transaction id into the message being built; aids in
    // crafting responses.
    fn add_to(&self, b: &mut Message) -> Result<()> {
        b.transaction_id = self.transaction_id;
        b.write_transaction_id();
        Ok(())
    }
}

impl Message {
    pub fn new() -> Self {
        Message {
            raw: {
                let mut raw = Vec::with_capacity(DEFAULT_RAW_CAPACITY);
                raw.extend_from_slice(&[0; MESSAGE_HEADER_SIZE]);
                raw
            },
            ..Default::default()
        }
    }

    /// Resets the message, attributes and underlying buffer.
    pub fn reset(&mut self) {
        self.raw.clear();
        self.length = 0;
        self.attributes.0.clear();
    }

    // grow ensures that the internal buffer has at least n bytes.
    fn grow(&mut self, n: usize, resize: bool) {
        if self.raw.len() >= n {
            if resize {
                self.raw.resize(n, 0);
            }
            return;
        }
        self.raw.resize(n, 0);
    }

    /// Appends a new attribute to the message. The value is copied into the
    /// internal buffer so `v` may be reused.
    pub fn add(&mut self, t: AttrType, v: &[u8]) {
        let alloc_size = ATTRIBUTE_HEADER_SIZE + v.len();
        let first = MESSAGE_HEADER_SIZE + self.length as usize;
        let mut last = first + alloc_size;
        self.grow(last, true);
        self.length += alloc_size as u32;

        let buf = &mut self.raw[first..last];
        buf[0..2].copy_from_slice(&t.value().to_be_bytes());
        buf[2..4].copy_from_slice(&(v.len() as u16).to_be_bytes());
        buf[ATTRIBUTE_HEADER_SIZE..].copy_from_slice(v);

        let attr = RawAttribute {
            typ: t,
            length: v.len() as u16,
            value: v.to_vec(),
        };

        if !self.unaligned && v.len() % PADDING != 0 {
            let bytes_to_add = nearest_padded_value_length(v.len()) - v.len();
            last += bytes_to_add;
            self.grow(last, true);
            // zero the padding so no stale buffer bytes leak onto the wire
            for b in &mut self.raw[last - bytes_to_add..last] {
                *b = 0;
            }
            self.length += bytes_to_add as u32;
        }
        self.attributes.0.push(attr);
        self.write_length();
    }

    /// Writes the length field to the raw header.
    pub fn write_length(&mut self) {
        self.grow(4, false);
        self.raw[2..4].copy_from_slice(&(self.length as u16).to_be_bytes());
    }

    /// Writes the full header to the underlying buffer.
    pub fn write_header(&mut self) {
        self.grow(MESSAGE_HEADER_SIZE, false);
        self.write_type();
        self.write_length();
        self.raw[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        self.raw[8..MESSAGE_HEADER_SIZE].copy_from_slice(&self.transaction_id.0);
    }

    pub fn write_transaction_id(&mut self) {
        self.raw[8..MESSAGE_HEADER_SIZE].copy_from_slice(&self.transaction_id.0);
    }

    pub fn write_type(&mut self) {
        self.grow(2, false);
        self.raw[..2].copy_from_slice(&self.typ.value().to_be_bytes());
    }

    pub fn set_type(&mut self, t: MessageType) {
        self.typ = t;
        self.write_type();
    }

    /// Decodes `raw` into the message fields. The magic cookie is parsed
    /// but not enforced here: that is dialect policy and belongs to
    /// [`Message::validate`].
    pub fn decode(&mut self) -> Result<()> {
        let buf = &self.raw;
        if buf.len() < MESSAGE_HEADER_SIZE {
            return Err(Error::ErrUnexpectedHeaderEof);
        }

        let t = u16::from_be_bytes([buf[0], buf[1]]);
        let size = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let full_size = MESSAGE_HEADER_SIZE + size;

        if buf.len() < full_size {
            return Err(Error::Other(format!(
                "buffer length {} is less than {} (expected message size)",
                buf.len(),
                full_size
            )));
        }

        self.typ.read_value(t);
        self.length = size as u32;
        self.transaction_id
            .0
            .copy_from_slice(&buf[8..MESSAGE_HEADER_SIZE]);

        self.attributes.0.clear();
        let mut offset = 0;
        let mut b = &buf[MESSAGE_HEADER_SIZE..full_size];

        while offset < size {
            if b.len() < ATTRIBUTE_HEADER_SIZE {
                return Err(Error::Other(format!(
                    "buffer length {} is less than {} (expected attribute header)",
                    b.len(),
                    ATTRIBUTE_HEADER_SIZE
                )));
            }

            let mut a = RawAttribute {
                typ: compat_attr_type(u16::from_be_bytes([b[0], b[1]])),
                length: u16::from_be_bytes([b[2], b[3]]),
                ..Default::default()
            };
            let a_l = a.length as usize;
            let a_buff_l = if self.unaligned {
                a_l
            } else {
                nearest_padded_value_length(a_l)
            };

            b = &b[ATTRIBUTE_HEADER_SIZE..];
            offset += ATTRIBUTE_HEADER_SIZE;
            if b.len() < a_buff_l {
                return Err(Error::Other(format!(
                    "buffer length {} is less than {} (expected value size for {})",
                    b.len(),
                    a_buff_l,
                    a.typ
                )));
            }
            a.value = b[..a_l].to_vec();
            offset += a_buff_l;
            b = &b[a_buff_l..];

            self.attributes.0.push(a);
        }

        Ok(())
    }

    /// Decodes a copy of `buf` and returns the number of bytes consumed.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.raw.clear();
        self.raw.extend_from_slice(buf);
        self.decode()?;
        Ok(buf.len())
    }

    /// Clones this message into `b`, re-decoding so further mutation of
    /// `self` is safe.
    pub fn clone_to(&self, b: &mut Message) -> Result<()> {
        b.raw.clear();
        b.raw.extend_from_slice(&self.raw);
        b.decode()
    }

    pub fn contains(&self, t: AttrType) -> bool {
        self.attributes.0.iter().any(|a| a.typ == t)
    }

    /// Returns the value of attribute `t`, or `ErrAttributeNotFound`.
    pub fn get(&self, t: AttrType) -> Result<Vec<u8>> {
        self.attributes
            .get(t)
            .map(|a| a.value.clone())
            .ok_or(Error::ErrAttributeNotFound)
    }

    /// Resets the message and applies setters in order, returning on the
    /// first error.
    pub fn build(&mut self, setters: &[Box<dyn Setter>]) -> Result<()> {
        self.reset();
        self.write_header();
        for s in setters {
            s.add_to(self)?;
        }
        Ok(())
    }

    /// Applies checkers in order, returning on the first error.
    pub fn check<C: Checker>(&self, checkers: &[C]) -> Result<()> {
        for c in checkers {
            c.check(self)?;
        }
        Ok(())
    }

    /// Applies getters in order, returning on the first error.
    pub fn parse<G: Getter>(&self, getters: &mut [G]) -> Result<()> {
        for g in getters {
            g.get_from(self)?;
        }
        Ok(())
    }

    /// The slow validator. Enforces, in order: exact agreement between the
    /// length field and the buffer, the magic cookie (unless the dialect
    /// runs 128-bit transaction ids), FINGERPRINT when present, and
    /// MESSAGE-INTEGRITY against `key`. A `None` key skips the integrity
    /// stage unless the dialect forces it.
    pub fn validate(&mut self, key: Option<&[u8]>, dialect: Dialect) -> Result<()> {
        if self.raw.len() != MESSAGE_HEADER_SIZE + self.length as usize {
            return Err(Error::ErrLengthMismatch);
        }

        if !dialect.rfc3489 {
            let cookie = u32::from_be_bytes([self.raw[4], self.raw[5], self.raw[6], self.raw[7]]);
            if cookie != MAGIC_COOKIE {
                return Err(Error::ErrInvalidMagicCookie);
            }
        }

        if self.contains(crate::attributes::ATTR_FINGERPRINT) {
            FingerprintAttr.check(self)?;
        }

        if dialect.ignore_credentials {
            return Ok(());
        }

        match key {
            Some(key) => {
                if !self.contains(crate::attributes::ATTR_MESSAGE_INTEGRITY) {
                    return Err(Error::ErrIntegrityMissing);
                }
                MessageIntegrity(key.to_vec()).check(self)
            }
            None => {
                if dialect.force_integrity {
                    Err(Error::ErrIntegrityMissing)
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// MessageClass is an 8-bit representation of the 2-bit STUN class.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct MessageClass(pub(crate) u8);

pub const CLASS_REQUEST: MessageClass = MessageClass(0x00); // 0b00
pub const CLASS_INDICATION: MessageClass = MessageClass(0x01); // 0b01
pub const CLASS_SUCCESS_RESPONSE: MessageClass = MessageClass(0x02); // 0b10
pub const CLASS_ERROR_RESPONSE: MessageClass = MessageClass(0x03); // 0b11

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CLASS_REQUEST => "request",
            CLASS_INDICATION => "indication",
            CLASS_SUCCESS_RESPONSE => "success response",
            CLASS_ERROR_RESPONSE => "error response",
            _ => "unknown message class",
        };

        write!(f, "{s}")
    }
}

/// Method is a u16 representation of the 12-bit STUN method.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct Method(pub(crate) u16);

pub const METHOD_BINDING: Method = Method(0x001);
pub const METHOD_ALLOCATE: Method = Method(0x003);
pub const METHOD_REFRESH: Method = Method(0x004);
pub const METHOD_SEND: Method = Method(0x006);
pub const METHOD_DATA: Method = Method(0x007);
pub const METHOD_CREATE_PERMISSION: Method = Method(0x008);
pub const METHOD_CHANNEL_BIND: Method = Method(0x009);

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unknown = format!("0x{:x}", self.0);

        let s = match *self {
            METHOD_BINDING => "Binding",
            METHOD_ALLOCATE => "Allocate",
            METHOD_REFRESH => "Refresh",
            METHOD_SEND => "Send",
            METHOD_DATA => "Data",
            METHOD_CREATE_PERMISSION => "CreatePermission",
            METHOD_CHANNEL_BIND => "ChannelBind",
            _ => unknown.as_str(),
        };

        write!(f, "{s}")
    }
}

/// MessageType is the STUN message type field.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy)]
pub struct MessageType {
    pub method: Method,
    pub class: MessageClass,
}

pub const BINDING_REQUEST: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_REQUEST,
};
pub const BINDING_SUCCESS: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_SUCCESS_RESPONSE,
};
pub const BINDING_ERROR: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_ERROR_RESPONSE,
};
pub const BINDING_INDICATION: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_INDICATION,
};

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.class)
    }
}

const METHOD_ABITS: u16 = 0xf; // 0b0000000000001111
const METHOD_BBITS: u16 = 0x70; // 0b0000000001110000
const METHOD_DBITS: u16 = 0xf80; // 0b0000111110000000

const METHOD_BSHIFT: u16 = 1;
const METHOD_DSHIFT: u16 = 2;

const FIRST_BIT: u16 = 0x1;
const SECOND_BIT: u16 = 0x2;

const C0BIT: u16 = FIRST_BIT;
const C1BIT: u16 = SECOND_BIT;

const CLASS_C0SHIFT: u16 = 4;
const CLASS_C1SHIFT: u16 = 7;

impl Setter for MessageType {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.set_type(*self);
        Ok(())
    }
}

impl MessageType {
    pub fn new(method: Method, class: MessageClass) -> Self {
        MessageType { method, class }
    }

    /// Returns the bit representation of the type.
    ///
    ///  0                 1
    ///  2  3  4 5 6 7 8 9 0 1 2 3 4 5
    /// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |M |M |M|M|M|C|M|M|M|C|M|M|M|M|
    /// |11|10|9|8|7|1|6|5|4|0|3|2|1|0|
    /// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
    pub fn value(&self) -> u16 {
        // Split M into A(M0-M3), B(M4-M6), D(M7-M11), then shift to leave
        // holes for C0 (bit 4) and C1 (bit 8).
        let method = self.method.0;
        let a = method & METHOD_ABITS;
        let b = method & METHOD_BBITS;
        let d = method & METHOD_DBITS;
        let method = a + (b << METHOD_BSHIFT) + (d << METHOD_DSHIFT);

        let c = self.class.0 as u16;
        let c0 = (c & C0BIT) << CLASS_C0SHIFT;
        let c1 = (c & C1BIT) << CLASS_C1SHIFT;

        method + c0 + c1
    }

    /// Decodes a u16 into this MessageType.
    pub fn read_value(&mut self, value: u16) {
        let c0 = (value >> CLASS_C0SHIFT) & C0BIT;
        let c1 = (value >> CLASS_C1SHIFT) & C1BIT;
        self.class = MessageClass((c0 + c1) as u8);

        let a = value & METHOD_ABITS;
        let b = (value >> METHOD_BSHIFT) & METHOD_BBITS;
        let d = (value >> METHOD_DSHIFT) & METHOD_DBITS;
        self.method = Method(a + b + d);
    }
}
