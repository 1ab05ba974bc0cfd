#[cfg(test)]
mod pseudo_tcp_test;

use std::collections::{BTreeMap, VecDeque};

use crate::error::{Error, Result};

/// Segment header layout:
/// conv u32 | seq u32 | ack u32 | flags u8 | reserved u8 | wnd u16 |
/// tsval u32 | tsecr u32.
pub const HEADER_SIZE: usize = 24;

/// Largest datagram handed to the pair by default. `notify_mtu` adjusts it
/// when path MTU information becomes available.
pub const DEFAULT_MTU: usize = 1400;

const FLAG_FIN: u8 = 0x01;
const FLAG_CTL: u8 = 0x02;
const FLAG_RST: u8 = 0x04;

const CTL_CONNECT: u8 = 0;
const CTL_ACCEPT: u8 = 1;

const DEFAULT_SND_BUF_SIZE: usize = 90 * 1024;
const DEFAULT_RCV_BUF_SIZE: usize = 60 * 1024;

const MIN_RTO: u32 = 250;
const DEF_RTO: u32 = 3000;
const MAX_RTO: u32 = 60_000;

/// Consecutive retransmission timeouts before the connection is declared
/// dead.
const MAX_RTX_ATTEMPTS: u32 = 12;

const FAST_RETRANSMIT_DUP_ACKS: u8 = 3;

#[inline]
fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

#[inline]
fn seq_lte(a: u32, b: u32) -> bool {
    a == b || seq_lt(a, b)
}

/// Connection state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoTcpState {
    /// Waiting for the remote side to open.
    Listen,
    /// We sent the connect control segment.
    SynSent,
    /// We answered a connect and await the ack.
    SynReceived,
    Established,
    /// The remote side sent FIN; we may still send.
    CloseWait,
    Closed,
}

/// What happened inside the engine; the driver turns these into user
/// callbacks.
#[derive(Debug, PartialEq)]
pub enum PseudoTcpEvent {
    /// The handshake completed.
    Opened,
    /// Bytes became available to `recv`.
    Readable,
    /// Send space opened up after a `WouldBlock`.
    Writable,
    /// The connection ended; an error means it did not end cleanly.
    Closed(Option<Error>),
}

/// A user-space reliable byte stream over an unreliable datagram pair.
///
/// The engine is a pure state machine: the caller feeds inbound datagrams
/// through [`PseudoTcp::notify_packet`], drives time through
/// [`PseudoTcp::notify_clock`] at the deadline advertised by
/// [`PseudoTcp::get_next_clock`], and ships outbound datagrams drained
/// from [`PseudoTcp::poll_transmit`]. All timestamps are caller-supplied
/// milliseconds from an arbitrary epoch.
pub struct PseudoTcp {
    state: PseudoTcpState,
    conv: u32,
    mtu: usize,

    // send side: snd_buf starts at snd_una once established
    snd_una: u32,
    snd_nxt: u32,
    snd_wnd: u32,
    snd_buf: VecDeque<u8>,
    snd_buf_cap: usize,
    pending_ctl: Option<u8>,

    // receive side
    rcv_nxt: u32,
    rcv_buf: VecDeque<u8>,
    rcv_buf_cap: usize,
    oos: BTreeMap<u32, Vec<u8>>,

    // congestion control
    cwnd: u32,
    ssthresh: u32,
    dup_acks: u8,

    // retransmission
    srtt: u32,
    rttvar: u32,
    rto: u32,
    rtx_deadline: Option<u32>,
    rtx_attempts: u32,

    ts_recent: u32,

    fin_pending: bool,
    fin_sent: bool,
    remote_fin: bool,
    writable_blocked: bool,

    out: VecDeque<Vec<u8>>,
    events: VecDeque<PseudoTcpEvent>,
}

impl PseudoTcp {
    pub fn new(conv: u32) -> Self {
        let mtu = DEFAULT_MTU;
        let mss = (mtu - HEADER_SIZE) as u32;
        PseudoTcp {
            state: PseudoTcpState::Listen,
            conv,
            mtu,

            snd_una: 0,
            snd_nxt: 0,
            snd_wnd: DEFAULT_RCV_BUF_SIZE as u32,
            snd_buf: VecDeque::new(),
            snd_buf_cap: DEFAULT_SND_BUF_SIZE,
            pending_ctl: None,

            rcv_nxt: 0,
            rcv_buf: VecDeque::new(),
            rcv_buf_cap: DEFAULT_RCV_BUF_SIZE,
            oos: BTreeMap::new(),

            cwnd: 2 * mss,
            ssthresh: i32::MAX as u32,
            dup_acks: 0,

            srtt: 0,
            rttvar: 0,
            rto: DEF_RTO,
            rtx_deadline: None,
            rtx_attempts: 0,

            ts_recent: 0,

            fin_pending: false,
            fin_sent: false,
            remote_fin: false,
            writable_blocked: false,

            out: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> PseudoTcpState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == PseudoTcpState::Closed
    }

    pub fn is_closed_remotely(&self) -> bool {
        self.remote_fin
    }

    fn mss(&self) -> usize {
        self.mtu - HEADER_SIZE
    }

    /// Adjusts the segment ceiling to a new path MTU.
    pub fn notify_mtu(&mut self, mtu: usize) {
        if mtu > HEADER_SIZE + 1 {
            self.mtu = mtu;
        }
    }

    /// Bytes ready for `recv`.
    pub fn available_bytes(&self) -> usize {
        self.rcv_buf.len()
    }

    /// Bytes `send` would accept without `WouldBlock`.
    pub fn available_send_space(&self) -> usize {
        self.snd_buf_cap - self.snd_buf.len()
    }

    /// Initiates the handshake. Only valid while listening.
    pub fn connect(&mut self, now: u32) -> Result<()> {
        if self.state != PseudoTcpState::Listen {
            return Err(Error::ErrNotConnected);
        }
        self.state = PseudoTcpState::SynSent;
        self.pending_ctl = Some(CTL_CONNECT);
        self.snd_una = 0;
        self.snd_nxt = 1; // the control segment occupies one sequence slot
        self.send_segment(now, 0, FLAG_CTL, &[CTL_CONNECT]);
        self.arm_rtx(now);
        Ok(())
    }

    /// Queues bytes for transmission. Returns how many were buffered, or
    /// `ErrWouldBlock` when the send buffer is full.
    pub fn send(&mut self, now: u32, data: &[u8]) -> Result<usize> {
        match self.state {
            PseudoTcpState::Closed => return Err(Error::ErrConnectionClosed),
            PseudoTcpState::Listen => return Err(Error::ErrNotConnected),
            _ => {}
        }
        if self.fin_pending || self.fin_sent {
            return Err(Error::ErrConnectionClosed);
        }

        let space = self.available_send_space();
        if space == 0 {
            self.writable_blocked = true;
            return Err(Error::ErrWouldBlock);
        }

        let n = std::cmp::min(space, data.len());
        self.snd_buf.extend(&data[..n]);
        self.attempt_send(now);
        Ok(n)
    }

    /// Moves received in-order bytes into `buf`. `ErrWouldBlock` while the
    /// stream is open but empty; `Ok(0)` once the remote closed cleanly.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.rcv_buf.is_empty() {
            if self.remote_fin {
                return Ok(0);
            }
            if self.state == PseudoTcpState::Closed {
                return Err(Error::ErrConnectionClosed);
            }
            return Err(Error::ErrWouldBlock);
        }

        let was_full = self.receive_window() == 0;
        let n = std::cmp::min(buf.len(), self.rcv_buf.len());
        for b in buf.iter_mut().take(n) {
            // pop_front cannot fail while len > 0
            *b = self.rcv_buf.pop_front().unwrap_or_default();
        }

        if was_full && self.receive_window() > 0 {
            // window update so the sender does not stay stalled
            self.push_ack(self.ts_recent);
        }

        Ok(n)
    }

    /// Closes the stream. `force` sends a reset and drops all state; a
    /// graceful close sends FIN after the buffered data drains.
    pub fn close(&mut self, now: u32, force: bool) {
        if self.state == PseudoTcpState::Closed {
            return;
        }
        if force {
            self.send_segment(now, self.snd_nxt, FLAG_RST, &[]);
            self.enter_closed(None);
            return;
        }
        self.fin_pending = true;
        self.attempt_send(now);
    }

    /// Feeds one inbound datagram into the engine.
    pub fn notify_packet(&mut self, now: u32, packet: &[u8]) -> Result<()> {
        if packet.len() < HEADER_SIZE {
            return Err(Error::Other("short pseudo-tcp segment".to_owned()));
        }
        let conv = u32::from_be_bytes([packet[0], packet[1], packet[2], packet[3]]);
        if conv != self.conv {
            return Ok(()); // not ours
        }
        let seq = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
        let ack = u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]);
        let flags = packet[12];
        let wnd = u16::from_be_bytes([packet[14], packet[15]]);
        let tsval = u32::from_be_bytes([packet[16], packet[17], packet[18], packet[19]]);
        let tsecr = u32::from_be_bytes([packet[20], packet[21], packet[22], packet[23]]);
        let payload = &packet[HEADER_SIZE..];

        if self.state == PseudoTcpState::Closed {
            return Ok(());
        }

        if flags & FLAG_RST != 0 {
            self.enter_closed(Some(Error::ErrConnectionReset));
            return Ok(());
        }

        self.snd_wnd = wnd as u32;
        self.ts_recent = tsval;

        // handshake control segments
        if flags & FLAG_CTL != 0 {
            let op = payload.first().copied().unwrap_or(CTL_CONNECT);
            match (self.state, op) {
                (PseudoTcpState::Listen, CTL_CONNECT) => {
                    self.rcv_nxt = seq.wrapping_add(1);
                    self.state = PseudoTcpState::SynReceived;
                    self.pending_ctl = Some(CTL_ACCEPT);
                    self.snd_una = 0;
                    self.snd_nxt = 1;
                    self.send_segment(now, 0, FLAG_CTL, &[CTL_ACCEPT]);
                    self.arm_rtx(now);
                }
                (PseudoTcpState::SynReceived, CTL_CONNECT) => {
                    // duplicate connect: answer again
                    self.send_segment(now, 0, FLAG_CTL, &[CTL_ACCEPT]);
                }
                (PseudoTcpState::SynSent, CTL_ACCEPT) => {
                    self.rcv_nxt = seq.wrapping_add(1);
                    self.handshake_acked(now, ack);
                }
                _ => {}
            }
            return Ok(());
        }

        // an ack completing our handshake
        if self.state == PseudoTcpState::SynReceived && seq_lt(self.snd_una, ack) {
            self.handshake_acked(now, ack);
        }

        match self.state {
            PseudoTcpState::Established | PseudoTcpState::CloseWait => {}
            _ => return Ok(()),
        }

        self.process_ack(now, ack, tsecr, payload.is_empty() && flags & FLAG_FIN == 0);

        if flags & FLAG_FIN != 0 {
            self.process_fin(now, seq);
            return Ok(());
        }

        if !payload.is_empty() {
            self.process_data(now, seq, payload);
        }

        // a pure window update may have reopened the send path
        self.attempt_send(now);

        Ok(())
    }

    /// The next instant the engine needs a clock tick, if any.
    pub fn get_next_clock(&self, _now: u32) -> Option<u32> {
        if self.state == PseudoTcpState::Closed {
            return None;
        }
        self.rtx_deadline
    }

    /// Drives retransmission once the advertised deadline passed.
    pub fn notify_clock(&mut self, now: u32) {
        let deadline = match self.rtx_deadline {
            Some(d) => d,
            None => return,
        };
        if (now.wrapping_sub(deadline) as i32) < 0 {
            return;
        }

        self.rtx_attempts += 1;
        if self.rtx_attempts > MAX_RTX_ATTEMPTS {
            self.enter_closed(Some(Error::ErrTransportFailed));
            return;
        }

        // exponential backoff and multiplicative decrease on loss
        self.rto = std::cmp::min(self.rto.saturating_mul(2), MAX_RTO);
        let mss = self.mss() as u32;
        let inflight = self.snd_nxt.wrapping_sub(self.snd_una);
        self.ssthresh = std::cmp::max(inflight / 2, 2 * mss);
        self.cwnd = mss;

        self.retransmit_front(now);
        self.rtx_deadline = Some(now.wrapping_add(self.rto));
    }

    /// Drains the next outbound datagram.
    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        self.out.pop_front()
    }

    /// Drains the next engine event.
    pub fn poll_event(&mut self) -> Option<PseudoTcpEvent> {
        self.events.pop_front()
    }

    fn handshake_acked(&mut self, now: u32, ack: u32) {
        if seq_lt(ack, 1) {
            return;
        }
        self.snd_una = 1;
        self.snd_nxt = 1;
        self.pending_ctl = None;
        self.rtx_deadline = None;
        self.rtx_attempts = 0;
        self.state = PseudoTcpState::Established;
        self.events.push_back(PseudoTcpEvent::Opened);
        self.attempt_send(now);
    }

    fn process_ack(&mut self, now: u32, ack: u32, tsecr: u32, pure_ack: bool) {
        let inflight = self.snd_nxt.wrapping_sub(self.snd_una);

        if seq_lt(self.snd_una, ack) && seq_lte(ack, self.snd_nxt) {
            let acked = ack.wrapping_sub(self.snd_una);
            // our FIN occupies one slot past the data
            let acked_data = std::cmp::min(acked as usize, self.snd_buf.len());
            self.snd_buf.drain(..acked_data);
            self.snd_una = ack;
            self.dup_acks = 0;
            self.rtx_attempts = 0;

            if tsecr != 0 {
                self.update_rtt(now.wrapping_sub(tsecr));
            }

            let mss = self.mss() as u32;
            if self.cwnd < self.ssthresh {
                self.cwnd = self.cwnd.saturating_add(mss);
            } else {
                self.cwnd = self
                    .cwnd
                    .saturating_add(std::cmp::max(1, mss * mss / self.cwnd));
            }

            self.rtx_deadline = if self.snd_una == self.snd_nxt {
                None
            } else {
                Some(now.wrapping_add(self.rto))
            };

            if self.writable_blocked && self.available_send_space() > 0 {
                self.writable_blocked = false;
                self.events.push_back(PseudoTcpEvent::Writable);
            }

            self.attempt_send(now);

            if self.fin_sent && self.snd_una == self.snd_nxt && self.remote_fin {
                self.enter_closed(None);
            }
        } else if ack == self.snd_una && inflight > 0 && pure_ack {
            self.dup_acks = self.dup_acks.saturating_add(1);
            if self.dup_acks == FAST_RETRANSMIT_DUP_ACKS {
                let mss = self.mss() as u32;
                self.ssthresh = std::cmp::max(inflight / 2, 2 * mss);
                self.cwnd = self.ssthresh + 3 * mss;
                self.retransmit_front(now);
            }
        }
    }

    fn process_data(&mut self, now: u32, seq: u32, payload: &[u8]) {
        if seq == self.rcv_nxt {
            if self.rcv_buf.len() + payload.len() > self.rcv_buf_cap {
                // no room: drop silently; the reader reopening the window
                // triggers the update that restarts the sender
                return;
            }
            self.rcv_buf.extend(payload);
            self.rcv_nxt = self.rcv_nxt.wrapping_add(payload.len() as u32);
            self.drain_out_of_order();
            self.events.push_back(PseudoTcpEvent::Readable);
        } else if seq_lt(self.rcv_nxt, seq) {
            self.oos.entry(seq).or_insert_with(|| payload.to_vec());
        }
        // old or out-of-order data produces a duplicate ack

        self.push_ack(now);
    }

    fn process_fin(&mut self, now: u32, seq: u32) {
        if seq != self.rcv_nxt {
            // FIN beyond a gap: hold it as out-of-order by acking only
            self.push_ack(now);
            return;
        }
        self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
        self.remote_fin = true;
        if self.state == PseudoTcpState::Established {
            self.state = PseudoTcpState::CloseWait;
        }
        self.events.push_back(PseudoTcpEvent::Readable);
        self.push_ack(now);

        if self.fin_sent && self.snd_una == self.snd_nxt {
            self.enter_closed(None);
        }
    }

    fn drain_out_of_order(&mut self) {
        loop {
            let Some((&seq, _)) = self.oos.iter().next() else {
                break;
            };
            if seq_lt(seq, self.rcv_nxt) {
                self.oos.remove(&seq);
                continue;
            }
            if seq != self.rcv_nxt {
                break;
            }
            let Some(payload) = self.oos.remove(&seq) else {
                break;
            };
            if self.rcv_buf.len() + payload.len() > self.rcv_buf_cap {
                // keep it for later; reinsert
                self.oos.insert(seq, payload);
                break;
            }
            self.rcv_nxt = self.rcv_nxt.wrapping_add(payload.len() as u32);
            self.rcv_buf.extend(payload);
        }
    }

    fn attempt_send(&mut self, now: u32) {
        if !matches!(
            self.state,
            PseudoTcpState::Established | PseudoTcpState::CloseWait
        ) {
            return;
        }

        loop {
            let inflight = self.snd_nxt.wrapping_sub(self.snd_una) as usize;
            let fin_inflight = usize::from(self.fin_sent);
            let sent_data = inflight - fin_inflight;
            let unsent = self.snd_buf.len() - sent_data;
            let window = std::cmp::min(self.cwnd, std::cmp::max(self.snd_wnd, 1)) as usize;
            let room = window.saturating_sub(inflight);

            if self.fin_sent {
                return;
            }

            let n = std::cmp::min(std::cmp::min(self.mss(), unsent), room);
            if n == 0 {
                if self.fin_pending && unsent == 0 {
                    let seq = self.snd_nxt;
                    self.snd_nxt = self.snd_nxt.wrapping_add(1);
                    self.fin_pending = false;
                    self.fin_sent = true;
                    self.send_segment(now, seq, FLAG_FIN, &[]);
                    self.arm_rtx(now);
                }
                return;
            }

            let payload: Vec<u8> = self
                .snd_buf
                .iter()
                .skip(sent_data)
                .take(n)
                .copied()
                .collect();
            let seq = self.snd_nxt;
            self.snd_nxt = self.snd_nxt.wrapping_add(n as u32);
            self.send_segment(now, seq, 0, &payload);
            self.arm_rtx(now);
        }
    }

    fn retransmit_front(&mut self, now: u32) {
        if let Some(op) = self.pending_ctl {
            self.send_segment(now, 0, FLAG_CTL, &[op]);
            return;
        }
        let inflight_data = self.snd_nxt.wrapping_sub(self.snd_una) as usize - usize::from(self.fin_sent);
        if inflight_data == 0 {
            if self.fin_sent {
                self.send_segment(now, self.snd_una, FLAG_FIN, &[]);
            }
            return;
        }
        let n = std::cmp::min(self.mss(), inflight_data);
        let payload: Vec<u8> = self.snd_buf.iter().take(n).copied().collect();
        let seq = self.snd_una;
        self.send_segment(now, seq, 0, &payload);
    }

    fn update_rtt(&mut self, rtt: u32) {
        if self.srtt == 0 {
            self.srtt = rtt;
            self.rttvar = rtt / 2;
        } else {
            let diff = self.srtt.abs_diff(rtt);
            self.rttvar = (3 * self.rttvar + diff) / 4;
            self.srtt = (7 * self.srtt + rtt) / 8;
        }
        self.rto = (self.srtt + 4 * self.rttvar).clamp(MIN_RTO, MAX_RTO);
    }

    fn receive_window(&self) -> u16 {
        let free = self.rcv_buf_cap - self.rcv_buf.len();
        std::cmp::min(free, u16::MAX as usize) as u16
    }

    fn arm_rtx(&mut self, now: u32) {
        if self.rtx_deadline.is_none() {
            self.rtx_deadline = Some(now.wrapping_add(self.rto));
        }
    }

    fn push_ack(&mut self, now: u32) {
        self.send_segment(now, self.snd_nxt, 0, &[]);
    }

    fn send_segment(&mut self, now: u32, seq: u32, flags: u8, payload: &[u8]) {
        let mut packet = Vec::with_capacity(HEADER_SIZE + payload.len());
        packet.extend_from_slice(&self.conv.to_be_bytes());
        packet.extend_from_slice(&seq.to_be_bytes());
        packet.extend_from_slice(&self.rcv_nxt.to_be_bytes());
        packet.push(flags);
        packet.push(0);
        packet.extend_from_slice(&self.receive_window().to_be_bytes());
        packet.extend_from_slice(&now.to_be_bytes());
        packet.extend_from_slice(&self.ts_recent.to_be_bytes());
        packet.extend_from_slice(payload);
        self.out.push_back(packet);
    }

    fn enter_closed(&mut self, err: Option<Error>) {
        self.state = PseudoTcpState::Closed;
        self.rtx_deadline = None;
        self.events.push_back(PseudoTcpEvent::Closed(err));
    }
}
