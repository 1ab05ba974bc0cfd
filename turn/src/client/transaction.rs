use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use stun::message::*;
use stun::timer::{RetransmissionTimer, TimerAction};
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep_until;
use util::Conn;

use crate::error::*;

/// Bag of result values of a completed transaction.
#[derive(Debug)]
pub struct TransactionResult {
    pub msg: Message,
    pub from: SocketAddr,
    pub retries: u32,
    pub err: Option<Error>,
}

impl Default for TransactionResult {
    fn default() -> Self {
        TransactionResult {
            msg: Message::default(),
            from: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 0),
            retries: 0,
            err: None,
        }
    }
}

/// Config params used by [`Transaction::new`].
pub struct TransactionConfig {
    pub key: String,
    pub raw: Vec<u8>,
    pub to: SocketAddr,
    pub timer: RetransmissionTimer,
    /// True to throw the result away (fire-and-forget refresh on close).
    pub ignore_result: bool,
}

/// One request/response exchange with the server, retransmitted on the
/// schedule until a response arrives or the schedule gives up.
pub struct Transaction {
    pub key: String,
    pub raw: Vec<u8>,
    pub to: SocketAddr,
    pub retries: u32,
    timer_ch_tx: Option<mpsc::Sender<()>>,
    result_ch_tx: Option<mpsc::Sender<TransactionResult>>,
    result_ch_rx: Option<mpsc::Receiver<TransactionResult>>,
    timer: RetransmissionTimer,
}

impl Transaction {
    pub fn new(config: TransactionConfig) -> Self {
        let (result_ch_tx, result_ch_rx) = if !config.ignore_result {
            let (tx, rx) = mpsc::channel(1);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        Transaction {
            key: config.key,
            raw: config.raw,
            to: config.to,
            retries: 0,
            timer_ch_tx: None,
            result_ch_tx,
            result_ch_rx,
            timer: config.timer,
        }
    }

    /// Starts the retransmission task for this transaction.
    pub async fn start_rtx_timer(
        &mut self,
        conn: Arc<dyn Conn + Send + Sync>,
        tr_map: Arc<Mutex<TransactionMap>>,
    ) {
        let (timer_ch_tx, mut timer_ch_rx) = mpsc::channel(1);
        self.timer_ch_tx = Some(timer_ch_tx);
        let key = self.key.clone();
        self.timer.start(Instant::now());
        let mut timer = self.timer.clone();

        tokio::spawn(async move {
            loop {
                let deadline = match timer.deadline() {
                    Some(d) => tokio::time::Instant::now()
                        + d.saturating_duration_since(Instant::now()),
                    None => break,
                };

                tokio::select! {
                    _ = sleep_until(deadline) => {
                        let done = match timer.on_timeout(Instant::now()) {
                            TimerAction::Retransmit => {
                                on_rtx_timeout(&conn, &tr_map, &key).await
                            }
                            TimerAction::Fail => {
                                fail_transaction(&tr_map, &key).await;
                                true
                            }
                        };
                        if done {
                            break;
                        }
                    }
                    _ = timer_ch_rx.recv() => break,
                }
            }
        });
    }

    /// Stops the retransmission task.
    pub fn stop_rtx_timer(&mut self) {
        self.timer_ch_tx.take();
    }

    pub async fn write_result(&self, res: TransactionResult) -> bool {
        if let Some(result_ch) = &self.result_ch_tx {
            result_ch.send(res).await.is_ok()
        } else {
            false
        }
    }

    pub fn get_result_channel(&mut self) -> Option<mpsc::Receiver<TransactionResult>> {
        self.result_ch_rx.take()
    }

    pub fn close(&mut self) {
        self.result_ch_tx.take();
    }
}

async fn on_rtx_timeout(
    conn: &Arc<dyn Conn + Send + Sync>,
    tr_map: &Arc<Mutex<TransactionMap>>,
    tr_key: &str,
) -> bool {
    let (tr_raw, tr_to) = {
        let mut tm = tr_map.lock().await;
        match tm.get(tr_key) {
            Some(tr) => {
                tr.retries += 1;
                (tr.raw.clone(), tr.to)
            }
            None => return true, // already gone
        }
    };

    log::trace!("retransmitting transaction {tr_key} to {tr_to}");
    if conn.send_to(&tr_raw, tr_to).await.is_err() {
        fail_transaction(tr_map, tr_key).await;
        return true;
    }

    false
}

async fn fail_transaction(tr_map: &Arc<Mutex<TransactionMap>>, tr_key: &str) {
    let tr = {
        let mut tm = tr_map.lock().await;
        tm.delete(tr_key)
    };
    if let Some(tr) = tr {
        if !tr
            .write_result(TransactionResult {
                err: Some(Error::ErrAllRetransmissionsFailed),
                retries: tr.retries,
                ..Default::default()
            })
            .await
        {
            log::debug!("no listener for transaction {tr_key}");
        }
    }
}

/// Transaction map shared between the client and its retransmit tasks.
#[derive(Default)]
pub struct TransactionMap {
    tr_map: HashMap<String, Transaction>,
}

impl TransactionMap {
    pub fn new() -> TransactionMap {
        TransactionMap::default()
    }

    pub fn insert(&mut self, key: String, tr: Transaction) -> bool {
        self.tr_map.insert(key, tr);
        true
    }

    pub fn find(&self, key: &str) -> Option<&Transaction> {
        self.tr_map.get(key)
    }

    pub fn get(&mut self, key: &str) -> Option<&mut Transaction> {
        self.tr_map.get_mut(key)
    }

    pub fn delete(&mut self, key: &str) -> Option<Transaction> {
        self.tr_map.remove(key)
    }

    pub fn close_and_delete_all(&mut self) {
        for tr in self.tr_map.values_mut() {
            tr.close();
        }
        self.tr_map.clear();
    }

    pub fn size(&self) -> usize {
        self.tr_map.len()
    }
}
