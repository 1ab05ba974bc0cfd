use std::time::{Duration, Instant};

use super::*;

#[test]
fn test_agent_remember_and_find() -> Result<()> {
    let mut a = Agent::new();
    let id = TransactionId::new();
    let deadline = Instant::now() + Duration::from_millis(200);

    a.remember_transaction(id, deadline)?;
    assert!(a.find_transaction(&id).is_some());

    assert_eq!(
        a.remember_transaction(id, deadline).unwrap_err(),
        Error::ErrTransactionExists
    );

    assert!(a.forget_transaction(id)?);
    assert!(a.find_transaction(&id).is_none());
    assert!(!a.forget_transaction(id)?);

    Ok(())
}

#[test]
fn test_agent_collect_expired() -> Result<()> {
    let mut a = Agent::new();
    let now = Instant::now();

    let fresh = TransactionId::new();
    let stale = TransactionId::new();
    a.remember_transaction(fresh, now + Duration::from_secs(5))?;
    a.remember_transaction(stale, now - Duration::from_millis(1))?;

    let expired = a.collect(now);
    assert_eq!(expired, vec![stale]);
    assert!(a.find_transaction(&fresh).is_some());
    assert!(a.find_transaction(&stale).is_none());

    Ok(())
}

#[test]
fn test_agent_close() -> Result<()> {
    let mut a = Agent::new();
    a.remember_transaction(TransactionId::new(), Instant::now())?;
    a.close()?;

    assert_eq!(a.close().unwrap_err(), Error::ErrAgentClosed);
    assert_eq!(
        a.remember_transaction(TransactionId::new(), Instant::now())
            .unwrap_err(),
        Error::ErrAgentClosed
    );

    Ok(())
}
