#[cfg(test)]
mod buffer_test;

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio::time::{timeout, Duration};

use crate::error::{Error, Result};

// Packets above this are rejected outright; the transports feeding the
// buffer never produce more than one MTU-sized datagram or 4571 frame.
const MAX_PACKET_SIZE: usize = 0xFFFF;

#[derive(Debug, Default)]
struct BufferInternal {
    packets: VecDeque<Vec<u8>>,
    size: usize,
    limit_count: usize,
    limit_size: usize,
    closed: bool,
}

/// Packet-preserving intermediate buffer: writers append whole packets,
/// readers take them out one at a time in arrival order. Used for the
/// user-visible receive queue of a component.
#[derive(Debug, Clone)]
pub struct Buffer {
    internal: Arc<Mutex<BufferInternal>>,
    notify: Arc<Notify>,
}

impl Buffer {
    /// A zero `limit_count`/`limit_size` disables that limit.
    pub fn new(limit_count: usize, limit_size: usize) -> Self {
        Buffer {
            internal: Arc::new(Mutex::new(BufferInternal {
                limit_count,
                limit_size,
                ..Default::default()
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Appends a copy of `packet`. Returns `ErrBufferFull` when a limit is
    /// hit so callers can drop instead of stalling the socket.
    pub async fn write(&self, packet: &[u8]) -> Result<usize> {
        if packet.len() > MAX_PACKET_SIZE {
            return Err(Error::ErrPacketTooBig);
        }

        {
            let mut b = self.internal.lock().await;
            if b.closed {
                return Err(Error::ErrBufferClosed);
            }
            if (b.limit_count > 0 && b.packets.len() >= b.limit_count)
                || (b.limit_size > 0 && b.size + packet.len() > b.limit_size)
            {
                return Err(Error::ErrBufferFull);
            }
            b.size += packet.len();
            b.packets.push_back(packet.to_vec());
        }

        self.notify.notify_waiters();
        Ok(packet.len())
    }

    /// Pops the next packet into `packet`, waiting until one is available,
    /// the buffer is closed, or `duration` elapses.
    pub async fn read(&self, packet: &mut [u8], duration: Option<Duration>) -> Result<usize> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register for wakeup before re-checking, so a write landing
            // between the check and the await is not lost.
            notified.as_mut().enable();
            {
                let mut b = self.internal.lock().await;
                if let Some(front) = b.packets.pop_front() {
                    b.size -= front.len();
                    if packet.len() < front.len() {
                        return Err(Error::ErrBufferShort);
                    }
                    packet[..front.len()].copy_from_slice(&front);
                    return Ok(front.len());
                }
                if b.closed {
                    return Err(Error::ErrBufferClosed);
                }
            }

            if let Some(d) = duration {
                if timeout(d, notified).await.is_err() {
                    return Err(Error::ErrTimeout);
                }
            } else {
                notified.await;
            }
        }
    }

    /// Pops the next packet without waiting. `Ok(None)` means empty.
    pub async fn try_read(&self, packet: &mut [u8]) -> Result<Option<usize>> {
        let mut b = self.internal.lock().await;
        if let Some(front) = b.packets.pop_front() {
            b.size -= front.len();
            if packet.len() < front.len() {
                return Err(Error::ErrBufferShort);
            }
            packet[..front.len()].copy_from_slice(&front);
            return Ok(Some(front.len()));
        }
        if b.closed {
            return Err(Error::ErrBufferClosed);
        }
        Ok(None)
    }

    /// Unblocks readers and rejects future writes. Buffered packets remain
    /// readable until depleted.
    pub async fn close(&self) {
        {
            let mut b = self.internal.lock().await;
            if b.closed {
                return;
            }
            b.closed = true;
        }
        self.notify.notify_waiters();
    }

    pub async fn is_closed(&self) -> bool {
        self.internal.lock().await.closed
    }

    /// Number of queued packets.
    pub async fn count(&self) -> usize {
        self.internal.lock().await.packets.len()
    }

    /// Total byte size of queued packets.
    pub async fn size(&self) -> usize {
        self.internal.lock().await.size
    }
}
