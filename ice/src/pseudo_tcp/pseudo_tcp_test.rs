use super::*;

/// Delivers every queued datagram of `from` into `to`, optionally mangling
/// the batch first. Returns how many datagrams moved.
fn deliver(now: u32, from: &mut PseudoTcp, to: &mut PseudoTcp, mangle: impl Fn(&mut Vec<Vec<u8>>)) -> usize {
    let mut batch = vec![];
    while let Some(p) = from.poll_transmit() {
        batch.push(p);
    }
    mangle(&mut batch);
    let n = batch.len();
    for p in batch {
        to.notify_packet(now, &p).unwrap();
    }
    n
}

/// Shuttles packets both ways until the link is quiet.
fn pump(now: u32, a: &mut PseudoTcp, b: &mut PseudoTcp) {
    loop {
        let moved = deliver(now, a, b, |_| {}) + deliver(now, b, a, |_| {});
        if moved == 0 {
            break;
        }
    }
}

fn connect_pair() -> (PseudoTcp, PseudoTcp) {
    let mut a = PseudoTcp::new(7);
    let mut b = PseudoTcp::new(7);
    a.connect(0).unwrap();
    pump(0, &mut a, &mut b);
    assert_eq!(a.state(), PseudoTcpState::Established);
    assert_eq!(b.state(), PseudoTcpState::Established);
    (a, b)
}

fn drain_events(t: &mut PseudoTcp) -> Vec<PseudoTcpEvent> {
    let mut events = vec![];
    while let Some(e) = t.poll_event() {
        events.push(e);
    }
    events
}

fn recv_all(t: &mut PseudoTcp) -> Vec<u8> {
    let mut out = vec![];
    let mut buf = [0u8; 4096];
    while let Ok(n) = t.recv(&mut buf) {
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

#[test]
fn test_handshake_opens_both_sides() {
    let (mut a, mut b) = connect_pair();
    assert!(drain_events(&mut a).contains(&PseudoTcpEvent::Opened));
    assert!(drain_events(&mut b).contains(&PseudoTcpEvent::Opened));
}

#[test]
fn test_simple_transfer() {
    let (mut a, mut b) = connect_pair();

    let n = a.send(10, b"HELLO").unwrap();
    assert_eq!(n, 5);
    pump(10, &mut a, &mut b);

    assert!(drain_events(&mut b).contains(&PseudoTcpEvent::Readable));
    assert_eq!(recv_all(&mut b), b"HELLO");
}

#[test]
fn test_large_transfer_survives_reordering() {
    let (mut a, mut b) = connect_pair();

    // several MSS worth of patterned data
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let mut sent = 0;
    while sent < data.len() {
        match a.send(20, &data[sent..]) {
            Ok(n) => sent += n,
            Err(Error::ErrWouldBlock) => break,
            Err(e) => panic!("{e}"),
        }
    }
    assert_eq!(sent, data.len());

    // deliver the first flight in reverse order
    deliver(20, &mut a, &mut b, |batch| batch.reverse());
    // let acks flow and the remainder drain normally
    for t in 21..40 {
        pump(t, &mut a, &mut b);
    }

    assert_eq!(recv_all(&mut b), data);
}

#[test]
fn test_retransmission_recovers_a_dropped_flight() {
    let (mut a, mut b) = connect_pair();

    a.send(100, b"lost then found").unwrap();
    // drop the whole first flight
    deliver(100, &mut a, &mut b, |batch| batch.clear());
    assert!(recv_all(&mut b).is_empty());

    // fire the retransmission timer
    let deadline = a.get_next_clock(100).expect("rtx timer should be armed");
    a.notify_clock(deadline);
    pump(deadline, &mut a, &mut b);

    assert_eq!(recv_all(&mut b), b"lost then found");
}

#[test]
fn test_send_buffer_exhaustion_blocks_then_signals_writable() {
    let (mut a, mut b) = connect_pair();

    let chunk = vec![0xA5u8; 8 * 1024];
    // fill the send buffer without letting anything drain
    loop {
        match a.send(50, &chunk) {
            Ok(_) => {}
            Err(Error::ErrWouldBlock) => break,
            Err(e) => panic!("{e}"),
        }
    }
    assert_eq!(a.available_send_space(), 0);

    // acks free space and must surface exactly one Writable
    for t in 51..80 {
        pump(t, &mut a, &mut b);
        recv_all(&mut b);
    }
    let events = drain_events(&mut a);
    assert_eq!(
        events
            .iter()
            .filter(|e| **e == PseudoTcpEvent::Writable)
            .count(),
        1
    );
    assert!(a.available_send_space() > 0);
}

#[test]
fn test_graceful_close_reaches_the_peer() {
    let (mut a, mut b) = connect_pair();

    a.send(200, b"bye").unwrap();
    a.close(200, false);
    pump(200, &mut a, &mut b);

    assert!(b.is_closed_remotely());
    let mut buf = [0u8; 16];
    let n = b.recv(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"bye");
    // after the data, a clean end-of-stream
    assert_eq!(b.recv(&mut buf).unwrap(), 0);
}

#[test]
fn test_forced_close_resets_the_peer() {
    let (mut a, mut b) = connect_pair();

    a.close(300, true);
    pump(300, &mut a, &mut b);

    assert!(b.is_closed());
    assert!(drain_events(&mut b)
        .iter()
        .any(|e| matches!(e, PseudoTcpEvent::Closed(Some(Error::ErrConnectionReset)))));
}

#[test]
fn test_recv_on_empty_stream_would_block() {
    let (_a, mut b) = connect_pair();
    let mut buf = [0u8; 4];
    assert_eq!(b.recv(&mut buf).unwrap_err(), Error::ErrWouldBlock);
}

#[test]
fn test_mismatched_conversation_id_is_ignored() {
    let mut a = PseudoTcp::new(1);
    let mut b = PseudoTcp::new(2);
    a.connect(0).unwrap();
    deliver(0, &mut a, &mut b, |_| {});
    assert_eq!(b.state(), PseudoTcpState::Listen);
}
