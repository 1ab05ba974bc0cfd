use super::*;

#[test]
fn test_schedule_doubles_until_rc() {
    let rto = Duration::from_millis(100);
    let mut timer = RetransmissionTimer::new(rto, 3, false, DEFAULT_RELIABLE_TIMEOUT);
    let t0 = Instant::now();

    timer.start(t0);
    assert_eq!(timer.deadline(), Some(t0 + rto));

    // second transmission: interval doubles
    let t1 = t0 + rto;
    assert_eq!(timer.on_timeout(t1), TimerAction::Retransmit);
    assert_eq!(timer.transmissions(), 2);
    assert_eq!(timer.deadline(), Some(t1 + rto * 2));

    // third (== Rc) transmission: the final wait is RTO * m
    let t2 = t1 + rto * 2;
    assert_eq!(timer.on_timeout(t2), TimerAction::Retransmit);
    assert_eq!(timer.transmissions(), 3);
    assert_eq!(timer.deadline(), Some(t2 + rto * DEFAULT_LAST_MULTIPLIER));

    // schedule exhausted
    let t3 = t2 + rto * DEFAULT_LAST_MULTIPLIER;
    assert_eq!(timer.on_timeout(t3), TimerAction::Fail);
    assert_eq!(timer.deadline(), None);
}

#[test]
fn test_single_transmission_uses_last_multiplier() {
    let rto = Duration::from_millis(50);
    let mut timer = RetransmissionTimer::new(rto, 1, false, DEFAULT_RELIABLE_TIMEOUT);
    let t0 = Instant::now();

    timer.start(t0);
    assert_eq!(timer.deadline(), Some(t0 + rto * DEFAULT_LAST_MULTIPLIER));
    assert_eq!(timer.on_timeout(t0 + rto), TimerAction::Fail);
}

#[test]
fn test_reliable_single_timeout() {
    let reliable_timeout = Duration::from_millis(7200);
    let mut timer =
        RetransmissionTimer::new(DEFAULT_INITIAL_RTO, 7, true, reliable_timeout);
    let t0 = Instant::now();

    timer.start(t0);
    assert_eq!(timer.deadline(), Some(t0 + reliable_timeout));
    assert!(!timer.has_fired(t0));
    assert!(timer.has_fired(t0 + reliable_timeout));
    assert_eq!(timer.on_timeout(t0 + reliable_timeout), TimerAction::Fail);
}

#[test]
fn test_stop_disarms() {
    let mut timer = RetransmissionTimer::default();
    timer.start(Instant::now());
    assert!(timer.deadline().is_some());
    timer.stop();
    assert_eq!(timer.deadline(), None);
}
