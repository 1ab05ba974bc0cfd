use crate::error::*;
use crate::proto::channum::*;

/// Size of the ChannelData header: channel number + length.
pub const CHANNEL_DATA_HEADER_SIZE: usize = 4;
/// ChannelData payloads are padded to a 4-byte boundary when carried over
/// stream transports.
pub const CHANNEL_DATA_PADDING: usize = 4;

/// ChannelData message (RFC 5766 section 11.4): the compact way of moving
/// datagrams through a relay once a channel is bound.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ChannelData {
    pub data: Vec<u8>,
    pub number: ChannelNumber,
    pub raw: Vec<u8>,
}

impl ChannelData {
    /// Quick classification: the two topmost bits 0b01 mark channel data
    /// (STUN messages start with 0b00).
    pub fn is_channel_data(buf: &[u8]) -> bool {
        if buf.len() < CHANNEL_DATA_HEADER_SIZE {
            return false;
        }
        let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if length + CHANNEL_DATA_HEADER_SIZE > buf.len() {
            return false;
        }
        ChannelNumber(u16::from_be_bytes([buf[0], buf[1]])).is_valid()
    }

    /// Encodes into `raw`, padding the payload for stream transports.
    pub fn encode(&mut self) {
        self.raw.clear();
        self.raw.extend_from_slice(&self.number.0.to_be_bytes());
        self.raw
            .extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        self.raw.extend_from_slice(&self.data);

        let padded = nearest_padded_length(self.data.len());
        for _ in self.data.len()..padded {
            self.raw.push(0);
        }
    }

    /// Decodes `raw` into number and payload. Trailing padding bytes are
    /// tolerated, a length field pointing past the buffer is not.
    pub fn decode(&mut self) -> Result<()> {
        if self.raw.len() < CHANNEL_DATA_HEADER_SIZE {
            return Err(Error::ErrBadChannelDataLength);
        }

        let number = ChannelNumber(u16::from_be_bytes([self.raw[0], self.raw[1]]));
        number.check()?;
        self.number = number;

        let length = u16::from_be_bytes([self.raw[2], self.raw[3]]) as usize;
        if CHANNEL_DATA_HEADER_SIZE + length > self.raw.len() {
            return Err(Error::ErrBadChannelDataLength);
        }

        self.data = self.raw[CHANNEL_DATA_HEADER_SIZE..CHANNEL_DATA_HEADER_SIZE + length].to_vec();

        Ok(())
    }
}

pub(crate) fn nearest_padded_length(l: usize) -> usize {
    let mut n = CHANNEL_DATA_PADDING * (l / CHANNEL_DATA_PADDING);
    if n < l {
        n += CHANNEL_DATA_PADDING;
    }
    n
}
