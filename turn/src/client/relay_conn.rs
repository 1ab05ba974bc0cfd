use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use stun::agent::TransactionId;
use stun::attributes::ATTR_NONCE;
use stun::error_code::*;
use stun::fingerprint::FINGERPRINT;
use stun::integrity::MessageIntegrity;
use stun::message::*;
use stun::textattrs::{Nonce, Realm, Username};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;
use util::Conn;

use super::binding::*;
use super::periodic_timer::*;
use super::permission::*;
use super::transaction::*;
use crate::error::*;
use crate::proto;

const PERM_REFRESH_INTERVAL: Duration = Duration::from_secs(120);
/// Allocations are refreshed at lifetime/2, never more rarely than this.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
const MAX_RETRY_ATTEMPTS: u16 = 3;
/// Channel bindings expire server-side after 10 minutes; refresh at half.
const BINDING_REFRESH_AFTER: Duration = Duration::from_secs(5 * 60);

pub(crate) struct InboundData {
    pub(crate) data: Vec<u8>,
    pub(crate) from: SocketAddr,
}

/// What a relayed conn needs from the client that owns the base socket.
#[async_trait]
pub trait RelayConnObserver {
    fn turn_server_addr(&self) -> SocketAddr;
    fn username(&self) -> Username;
    fn realm(&self) -> Realm;
    async fn write_to(&self, data: &[u8], to: SocketAddr) -> Result<usize>;
    async fn perform_transaction(
        &mut self,
        msg: &Message,
        to: SocketAddr,
        ignore_result: bool,
    ) -> Result<TransactionResult>;
}

/// Config params used by [`RelayConn::new`].
pub(crate) struct RelayConnConfig {
    pub(crate) relayed_addr: SocketAddr,
    pub(crate) integrity: MessageIntegrity,
    pub(crate) nonce: Nonce,
    pub(crate) lifetime: Duration,
    pub(crate) reliable: bool,
    pub(crate) binding_mgr: Arc<Mutex<BindingManager>>,
    pub(crate) read_ch_rx: Arc<Mutex<mpsc::Receiver<InboundData>>>,
}

pub struct RelayConnInternal<T: 'static + RelayConnObserver + Send + Sync> {
    obs: Arc<Mutex<T>>,
    relayed_addr: SocketAddr,
    perm_map: PermissionMap,
    binding_mgr: Arc<Mutex<BindingManager>>,
    integrity: MessageIntegrity,
    nonce: Nonce,
    lifetime: Duration,
}

/// The relayed transport address behind the [`Conn`] interface. Sends are
/// wrapped into Send indications (or channel data once a channel is
/// bound); receives surface the unwrapped payload with the peer address
/// the server reported.
pub struct RelayConn<T: 'static + RelayConnObserver + Send + Sync> {
    relayed_addr: SocketAddr,
    reliable: bool,
    read_ch_rx: Arc<Mutex<mpsc::Receiver<InboundData>>>,
    relay_conn: Arc<Mutex<RelayConnInternal<T>>>,
    refresh_alloc_timer: PeriodicTimer,
    refresh_perms_timer: PeriodicTimer,
}

impl<T: 'static + RelayConnObserver + Send + Sync> RelayConn<T> {
    pub(crate) async fn new(obs: Arc<Mutex<T>>, config: RelayConnConfig) -> Self {
        log::debug!("initial lifetime: {} seconds", config.lifetime.as_secs());

        let refresh_interval = std::cmp::max(config.lifetime / 2, MIN_REFRESH_INTERVAL);

        let c = RelayConn {
            refresh_alloc_timer: PeriodicTimer::new(TimerIdRefresh::Alloc, refresh_interval),
            refresh_perms_timer: PeriodicTimer::new(TimerIdRefresh::Perms, PERM_REFRESH_INTERVAL),
            relayed_addr: config.relayed_addr,
            reliable: config.reliable,
            read_ch_rx: Arc::clone(&config.read_ch_rx),
            relay_conn: Arc::new(Mutex::new(RelayConnInternal::new(obs, config))),
        };

        let rci1 = Arc::clone(&c.relay_conn);
        let rci2 = Arc::clone(&c.relay_conn);

        if c.refresh_alloc_timer.start(rci1).await {
            log::debug!("refresh_alloc_timer started");
        }
        if c.refresh_perms_timer.start(rci2).await {
            log::debug!("refresh_perms_timer started");
        }

        c
    }
}

#[async_trait]
impl<T: RelayConnObserver + Send + Sync> Conn for RelayConn<T> {
    async fn connect(&self, _addr: SocketAddr) -> util::error::Result<()> {
        Err(util::Error::Other("not applicable".to_owned()))
    }

    async fn recv(&self, buf: &mut [u8]) -> util::error::Result<usize> {
        let (n, _) = self.recv_from(buf).await?;
        Ok(n)
    }

    /// Reads the next unwrapped payload; `from` is the peer address the
    /// server synthesized from the Data indication or channel binding.
    async fn recv_from(&self, p: &mut [u8]) -> util::error::Result<(usize, SocketAddr)> {
        let mut read_ch_rx = self.read_ch_rx.lock().await;

        match read_ch_rx.recv().await {
            Some(ib_data) => {
                let n = ib_data.data.len();
                if p.len() < n {
                    return Err(util::Error::ErrBufferShort);
                }
                p[..n].copy_from_slice(&ib_data.data);
                Ok((n, ib_data.from))
            }
            None => Err(util::Error::Other(
                Error::ErrAlreadyClosed.to_string(),
            )),
        }
    }

    async fn send(&self, _buf: &[u8]) -> util::error::Result<usize> {
        Err(util::Error::Other("not applicable".to_owned()))
    }

    async fn send_to(&self, p: &[u8], addr: SocketAddr) -> util::error::Result<usize> {
        let mut relay_conn = self.relay_conn.lock().await;
        match relay_conn.send_to(p, addr).await {
            Ok(n) => Ok(n),
            Err(err) => Err(util::Error::Other(err.to_string())),
        }
    }

    /// The allocated relayed transport address.
    fn local_addr(&self) -> util::error::Result<SocketAddr> {
        Ok(self.relayed_addr)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn is_reliable(&self) -> bool {
        self.reliable
    }

    /// Deletes the allocation (Refresh with lifetime 0) and stops the
    /// refresh timers.
    async fn close(&self) -> util::error::Result<()> {
        self.refresh_alloc_timer.stop().await;
        self.refresh_perms_timer.stop().await;

        let mut relay_conn = self.relay_conn.lock().await;
        relay_conn
            .close()
            .await
            .map_err(|err| util::Error::Other(format!("{err}")))
    }

    fn as_any(&self) -> &(dyn std::any::Any + Send + Sync) {
        self
    }
}

impl<T: RelayConnObserver + Send + Sync> RelayConnInternal<T> {
    fn new(obs: Arc<Mutex<T>>, config: RelayConnConfig) -> Self {
        RelayConnInternal {
            obs,
            relayed_addr: config.relayed_addr,
            perm_map: PermissionMap::new(),
            binding_mgr: config.binding_mgr,
            integrity: config.integrity,
            nonce: config.nonce,
            lifetime: config.lifetime,
        }
    }

    async fn send_to(&mut self, p: &[u8], addr: SocketAddr) -> Result<usize> {
        // a permission for the destination IP must exist first
        let perm = if let Some(perm) = self.perm_map.find(&addr) {
            Arc::clone(perm)
        } else {
            let perm = Arc::new(Permission::default());
            self.perm_map.insert(&addr, Arc::clone(&perm));
            perm
        };

        let mut result = Ok(());
        for _ in 0..MAX_RETRY_ATTEMPTS {
            result = self.create_perm(&perm, addr).await;
            if let Err(err) = &result {
                if Error::ErrTryAgain != *err {
                    break;
                }
            }
        }
        result?;

        let number = {
            let (bind_st, bind_at, bind_number, bind_addr) = {
                let mut binding_mgr = self.binding_mgr.lock().await;
                let b = if let Some(b) = binding_mgr.find_by_addr(&addr) {
                    *b
                } else {
                    *binding_mgr
                        .create(addr)
                        .ok_or_else(|| Error::Other("binding create failed".to_owned()))?
                };
                (b.state(), b.refreshed_at(), b.number, b.addr)
            };

            if bind_st == BindingState::Idle
                || bind_st == BindingState::Request
                || bind_st == BindingState::Failed
            {
                if bind_st == BindingState::Idle {
                    self.start_binding(bind_addr, bind_number, false).await;
                }

                // until the channel is usable, data rides a Send indication
                let peer_addr = socket_addr2peer_address(&addr);
                let mut msg = Message::new();
                msg.build(&[
                    Box::new(TransactionId::new()),
                    Box::new(MessageType::new(METHOD_SEND, CLASS_INDICATION)),
                    Box::new(proto::data::Data(p.to_vec())),
                    Box::new(peer_addr),
                    Box::new(FINGERPRINT),
                ])?;

                let obs = self.obs.lock().await;
                let turn_server_addr = obs.turn_server_addr();
                return obs.write_to(&msg.raw, turn_server_addr).await;
            }

            if bind_st == BindingState::Ready
                && Instant::now()
                    .checked_duration_since(bind_at)
                    .unwrap_or_else(|| Duration::from_secs(0))
                    > BINDING_REFRESH_AFTER
            {
                self.start_binding(bind_addr, bind_number, true).await;
            }

            bind_number
        };

        self.send_channel_data(p, number).await
    }

    async fn start_binding(&self, bind_addr: SocketAddr, bind_number: u16, refresh: bool) {
        let binding_mgr = Arc::clone(&self.binding_mgr);
        let rc_obs = Arc::clone(&self.obs);
        let nonce = self.nonce.clone();
        let integrity = self.integrity.clone();
        {
            let mut bm = binding_mgr.lock().await;
            if let Some(b) = bm.get_by_addr(&bind_addr) {
                b.set_state(if refresh {
                    BindingState::Refresh
                } else {
                    BindingState::Request
                });
            }
        }
        tokio::spawn(async move {
            let result =
                RelayConnInternal::bind(rc_obs, bind_addr, bind_number, nonce, integrity).await;

            let mut bm = binding_mgr.lock().await;
            if let Err(err) = result {
                if Error::ErrUnexpectedResponse != err {
                    bm.delete_by_addr(&bind_addr);
                } else if let Some(b) = bm.get_by_addr(&bind_addr) {
                    b.set_state(BindingState::Failed);
                }
                log::warn!("bind() failed: {err}");
            } else if let Some(b) = bm.get_by_addr(&bind_addr) {
                b.set_refreshed_at(Instant::now());
                b.set_state(BindingState::Ready);
            }
        });
    }

    /// Blocks per destination until the permission is requested, so packet
    /// order within a permission is preserved.
    async fn create_perm(&mut self, perm: &Arc<Permission>, addr: SocketAddr) -> Result<()> {
        if perm.state() == PermState::Idle {
            if let Err(err) = self.create_permissions(&[addr]).await {
                self.perm_map.delete(&addr);
                return Err(err);
            }
            perm.set_state(PermState::Permitted);
        }
        Ok(())
    }

    async fn send_channel_data(&self, data: &[u8], ch_num: u16) -> Result<usize> {
        let mut ch_data = proto::chandata::ChannelData {
            data: data.to_vec(),
            number: proto::channum::ChannelNumber(ch_num),
            ..Default::default()
        };
        ch_data.encode();

        let obs = self.obs.lock().await;
        let turn_server_addr = obs.turn_server_addr();
        obs.write_to(&ch_data.raw, turn_server_addr).await
    }

    async fn create_permissions(&mut self, addrs: &[SocketAddr]) -> Result<()> {
        let res = {
            let msg = {
                let obs = self.obs.lock().await;
                let mut setters: Vec<Box<dyn Setter>> = vec![
                    Box::new(TransactionId::new()),
                    Box::new(MessageType::new(METHOD_CREATE_PERMISSION, CLASS_REQUEST)),
                ];

                for addr in addrs {
                    setters.push(Box::new(socket_addr2peer_address(addr)));
                }

                setters.push(Box::new(obs.username()));
                setters.push(Box::new(obs.realm()));
                setters.push(Box::new(self.nonce.clone()));
                setters.push(Box::new(self.integrity.clone()));
                setters.push(Box::new(FINGERPRINT));

                let mut msg = Message::new();
                msg.build(&setters)?;
                msg
            };

            let mut obs = self.obs.lock().await;
            let turn_server_addr = obs.turn_server_addr();
            let tr_res = obs
                .perform_transaction(&msg, turn_server_addr, false)
                .await?;

            tr_res.msg
        };

        if res.typ.class == CLASS_ERROR_RESPONSE {
            let mut code = ErrorCodeAttribute::default();
            if code.get_from(&res).is_err() {
                return Err(Error::Other(format!("{}", res.typ)));
            } else if code.code == CODE_STALE_NONCE {
                self.set_nonce_from_msg(&res);
                return Err(Error::ErrTryAgain);
            } else {
                return Err(Error::Other(format!("{} (error {})", res.typ, code)));
            }
        }

        Ok(())
    }

    pub fn set_nonce_from_msg(&mut self, msg: &Message) {
        match Nonce::get_from_as(msg, ATTR_NONCE) {
            Ok(nonce) => {
                self.nonce = nonce;
                log::debug!("stale nonce: got a new one");
            }
            Err(_) => log::warn!("stale nonce response carried no nonce"),
        }
    }

    /// Deletes the allocation. Waits for the server's answer or for the
    /// retransmission schedule to give up, so the base socket is not torn
    /// down under an in-flight delete.
    pub async fn close(&mut self) -> Result<()> {
        match self
            .refresh_allocation(Duration::from_secs(0), false /* dont_wait */)
            .await
        {
            Err(Error::ErrAllRetransmissionsFailed) => Ok(()),
            other => other,
        }
    }

    async fn refresh_allocation(&mut self, lifetime: Duration, dont_wait: bool) -> Result<()> {
        let res = {
            let mut obs = self.obs.lock().await;

            let mut msg = Message::new();
            msg.build(&[
                Box::new(TransactionId::new()),
                Box::new(MessageType::new(METHOD_REFRESH, CLASS_REQUEST)),
                Box::new(proto::lifetime::Lifetime(lifetime)),
                Box::new(obs.username()),
                Box::new(obs.realm()),
                Box::new(self.nonce.clone()),
                Box::new(self.integrity.clone()),
                Box::new(FINGERPRINT),
            ])?;

            log::debug!("send refresh request (dont_wait={dont_wait})");
            let turn_server_addr = obs.turn_server_addr();
            let tr_res = obs
                .perform_transaction(&msg, turn_server_addr, dont_wait)
                .await?;

            if dont_wait {
                log::debug!("refresh request sent");
                return Ok(());
            }

            tr_res.msg
        };

        if res.typ.class == CLASS_ERROR_RESPONSE {
            let mut code = ErrorCodeAttribute::default();
            if code.get_from(&res).is_err() {
                return Err(Error::Other(format!("{}", res.typ)));
            } else if code.code == CODE_STALE_NONCE {
                self.set_nonce_from_msg(&res);
                return Err(Error::ErrTryAgain);
            } else {
                return Ok(());
            }
        }

        if lifetime.is_zero() {
            // deletion: the response body carries nothing we need
            return Ok(());
        }

        let mut updated_lifetime = proto::lifetime::Lifetime::default();
        updated_lifetime.get_from(&res)?;

        self.lifetime = updated_lifetime.0;
        log::debug!("updated lifetime: {} seconds", self.lifetime.as_secs());
        Ok(())
    }

    async fn refresh_permissions(&mut self) -> Result<()> {
        let addrs = self.perm_map.addrs();
        if addrs.is_empty() {
            log::debug!("no permission to refresh");
            return Ok(());
        }

        if let Err(err) = self.create_permissions(&addrs).await {
            if Error::ErrTryAgain != err {
                log::error!("fail to refresh permissions: {err}");
            }
            return Err(err);
        }

        log::debug!("refresh permissions successful");
        Ok(())
    }

    async fn bind(
        rc_obs: Arc<Mutex<T>>,
        bind_addr: SocketAddr,
        bind_number: u16,
        nonce: Nonce,
        integrity: MessageIntegrity,
    ) -> Result<()> {
        let (msg, turn_server_addr) = {
            let obs = rc_obs.lock().await;

            let setters: Vec<Box<dyn Setter>> = vec![
                Box::new(TransactionId::new()),
                Box::new(MessageType::new(METHOD_CHANNEL_BIND, CLASS_REQUEST)),
                Box::new(socket_addr2peer_address(&bind_addr)),
                Box::new(proto::channum::ChannelNumber(bind_number)),
                Box::new(obs.username()),
                Box::new(obs.realm()),
                Box::new(nonce),
                Box::new(integrity),
                Box::new(FINGERPRINT),
            ];

            let mut msg = Message::new();
            msg.build(&setters)?;

            (msg, obs.turn_server_addr())
        };

        let tr_res = {
            let mut obs = rc_obs.lock().await;
            obs.perform_transaction(&msg, turn_server_addr, false)
                .await?
        };

        let res = tr_res.msg;

        if res.typ != MessageType::new(METHOD_CHANNEL_BIND, CLASS_SUCCESS_RESPONSE) {
            return Err(Error::ErrUnexpectedResponse);
        }

        log::debug!("channel binding successful: {bind_addr} {bind_number}");
        Ok(())
    }
}

#[async_trait]
impl<T: RelayConnObserver + Send + Sync> PeriodicTimerTimeoutHandler for RelayConnInternal<T> {
    async fn on_timeout(&mut self, id: TimerIdRefresh) {
        log::debug!("refresh timer {id:?} expired");
        match id {
            TimerIdRefresh::Alloc => {
                let lifetime = self.lifetime;
                // when a stale nonce comes back, the second retry succeeds
                let mut result = Ok(());
                for _ in 0..MAX_RETRY_ATTEMPTS {
                    result = self.refresh_allocation(lifetime, false).await;
                    if let Err(err) = &result {
                        if Error::ErrTryAgain != *err {
                            break;
                        }
                    }
                }
                if result.is_err() {
                    log::warn!("refresh allocation failed");
                }
            }
            TimerIdRefresh::Perms => {
                let mut result = Ok(());
                for _ in 0..MAX_RETRY_ATTEMPTS {
                    result = self.refresh_permissions().await;
                    if let Err(err) = &result {
                        if Error::ErrTryAgain != *err {
                            break;
                        }
                    }
                }
                if result.is_err() {
                    log::warn!("refresh permissions failed");
                }
            }
        }
    }
}

fn socket_addr2peer_address(addr: &SocketAddr) -> proto::peeraddr::PeerAddress {
    proto::peeraddr::PeerAddress {
        ip: addr.ip(),
        port: addr.port(),
    }
}
