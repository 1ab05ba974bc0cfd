use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimerIdRefresh {
    #[default]
    Alloc,
    Perms,
}

/// Handler called on each timer expiry.
#[async_trait]
pub trait PeriodicTimerTimeoutHandler {
    async fn on_timeout(&mut self, id: TimerIdRefresh);
}

/// Periodic timer driving the allocation and permission refreshes.
#[derive(Default)]
pub struct PeriodicTimer {
    id: TimerIdRefresh,
    interval: Duration,
    close_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl PeriodicTimer {
    pub fn new(id: TimerIdRefresh, interval: Duration) -> Self {
        PeriodicTimer {
            id,
            interval,
            close_tx: Mutex::new(None),
        }
    }

    /// Starts the timer; a no-op returning false if already running.
    pub async fn start<T: 'static + PeriodicTimerTimeoutHandler + Send>(
        &self,
        timeout_handler: Arc<Mutex<T>>,
    ) -> bool {
        {
            let close_tx = self.close_tx.lock().await;
            if close_tx.is_some() {
                return false;
            }
        }

        let (close_tx, mut close_rx) = mpsc::channel(1);
        let interval = self.interval;
        let id = self.id;

        tokio::spawn(async move {
            loop {
                let timer = tokio::time::sleep(interval);
                tokio::pin!(timer);

                tokio::select! {
                    _ = timer.as_mut() => {
                        let mut handler = timeout_handler.lock().await;
                        handler.on_timeout(id).await;
                    }
                    _ = close_rx.recv() => break,
                }
            }
        });

        {
            let mut close = self.close_tx.lock().await;
            *close = Some(close_tx);
        }

        true
    }

    pub async fn stop(&self) {
        let mut close_tx = self.close_tx.lock().await;
        close_tx.take();
    }

    pub async fn is_running(&self) -> bool {
        let close_tx = self.close_tx.lock().await;
        close_tx.is_some()
    }
}

#[cfg(test)]
mod periodic_timer_test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counter {
        hits: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PeriodicTimerTimeoutHandler for Counter {
        async fn on_timeout(&mut self, _id: TimerIdRefresh) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_periodic_timer_fires_and_stops() {
        let hits = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(Mutex::new(Counter {
            hits: Arc::clone(&hits),
        }));

        let timer = PeriodicTimer::new(TimerIdRefresh::Alloc, Duration::from_millis(20));
        assert!(timer.start(Arc::clone(&handler)).await);
        assert!(!timer.start(handler).await, "double start must be refused");
        assert!(timer.is_running().await);

        tokio::time::sleep(Duration::from_millis(70)).await;
        timer.stop().await;
        assert!(!timer.is_running().await);

        let seen = hits.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected at least 2 expiries, got {seen}");
    }
}
