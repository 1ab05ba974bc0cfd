#[cfg(test)]
mod framing_test;

/// RFC 4571 length prefix: 16-bit big-endian frame length.
pub const FRAME_HEADER_SIZE: usize = 2;
/// A frame can carry at most what its 16-bit length field can express.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Prepends the RFC 4571 length prefix to `payload`.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_FRAME_SIZE);
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Incremental RFC 4571 frame reassembly over a byte stream.
///
/// The decoder keeps explicit positions so that a partially received frame
/// never blocks the socket: `buffer`/`buffer_offset` hold and track the
/// unparsed tail of the stream, `frame_size`/`frame_offset` track the
/// frame currently being assembled, and `consumed_size` counts the bytes
/// retired into completed frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    buffer_offset: usize,
    frame_size: Option<usize>,
    frame_offset: usize,
    consumed_size: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder::default()
    }

    /// Feeds `chunk` into the decoder and returns every frame completed by
    /// it, in stream order. Any partial trailing frame stays buffered.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = vec![];

        loop {
            let avail = self.buffer.len() - self.buffer_offset;

            let frame_size = match self.frame_size {
                Some(size) => size,
                None => {
                    // still reading the length prefix
                    if avail < FRAME_HEADER_SIZE {
                        break;
                    }
                    let b = &self.buffer[self.buffer_offset..];
                    let size = u16::from_be_bytes([b[0], b[1]]) as usize;
                    self.frame_size = Some(size);
                    self.frame_offset = 0;
                    self.buffer_offset += FRAME_HEADER_SIZE;
                    size
                }
            };

            let missing = frame_size - self.frame_offset;
            if missing > 0 {
                let avail = self.buffer.len() - self.buffer_offset;
                if avail == 0 {
                    break;
                }
                let take = std::cmp::min(avail, missing);
                self.frame_offset += take;
                self.buffer_offset += take;
            }

            if self.frame_offset == frame_size {
                let start = self.buffer_offset - frame_size;
                frames.push(self.buffer[start..self.buffer_offset].to_vec());
                self.consumed_size += FRAME_HEADER_SIZE + frame_size;
                self.frame_size = None;
                self.frame_offset = 0;

                // everything before buffer_offset is retired; compact so
                // the buffer does not grow without bound on long streams
                self.buffer.drain(..self.buffer_offset);
                self.buffer_offset = 0;
            } else {
                break;
            }
        }

        frames
    }

    /// Total header-plus-payload bytes retired into completed frames.
    pub fn consumed_size(&self) -> usize {
        self.consumed_size
    }

    /// Bytes buffered toward the frame currently being assembled.
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.buffer_offset + self.frame_offset
    }
}
