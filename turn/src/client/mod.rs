#[cfg(test)]
mod client_test;

pub mod binding;
pub mod periodic_timer;
pub mod permission;
pub mod relay_conn;
pub mod transaction;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use binding::*;
use relay_conn::*;
use stun::agent::TransactionId;
use stun::attributes::*;
use stun::error_code::*;
use stun::fingerprint::FINGERPRINT;
use stun::integrity::MessageIntegrity;
use stun::message::*;
use stun::textattrs::*;
use stun::timer::RetransmissionTimer;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use transaction::*;
use util::conn::Conn;

use crate::error::*;
use crate::proto::chandata::ChannelData;
use crate::proto::data::Data;
use crate::proto::evenport::EvenPort;
use crate::proto::lifetime::Lifetime;
use crate::proto::peeraddr::PeerAddress;
use crate::proto::relayaddr::RelayedAddress;
use crate::proto::reqtrans::RequestedTransport;
use crate::proto::PROTO_UDP;

const MAX_DATA_BUFFER_SIZE: usize = u16::MAX as usize;
const MAX_READ_QUEUE_SIZE: usize = 1024;

/// Wire variants spoken by TURN servers of the different ICE dialects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProtocolVariant {
    /// Plain RFC 5766.
    #[default]
    Rfc5766,
    /// Google's relay dialect.
    Google,
    /// MSN / OC2007 relays; credentials arrive base64-coded and are used
    /// in their decoded form.
    Msn,
    Oc2007,
}

/// Config used by [`Client::new`].
pub struct ClientConfig {
    pub turn_serv_addr: SocketAddr,
    pub username: String,
    pub password: String,
    pub realm: String,
    pub software: String,
    /// Decoded credential bytes for the MS dialects; when set they key the
    /// message integrity instead of the textual password.
    pub decoded_username: Option<Vec<u8>>,
    pub decoded_password: Option<Vec<u8>>,
    pub variant: ProtocolVariant,
    /// Ask the server for an even relay port.
    pub even_port: bool,
    pub rto: Duration,
    pub max_retransmissions: u32,
    pub conn: Arc<dyn Conn + Send + Sync>,
}

struct ClientInternal {
    conn: Arc<dyn Conn + Send + Sync>,
    turn_serv_addr: SocketAddr,
    username: Username,
    password: String,
    realm: Realm,
    integrity: MessageIntegrity,
    software: Software,
    variant: ProtocolVariant,
    even_port: bool,
    decoded_password: Option<Vec<u8>>,
    reliable: bool,
    tr_map: Arc<Mutex<TransactionMap>>,
    binding_mgr: Arc<Mutex<BindingManager>>,
    rto: Duration,
    max_retransmissions: u32,
    read_ch_tx: Arc<Mutex<Option<mpsc::Sender<InboundData>>>>,
    close_notify: CancellationToken,
}

#[async_trait]
impl RelayConnObserver for ClientInternal {
    fn turn_server_addr(&self) -> SocketAddr {
        self.turn_serv_addr
    }

    fn username(&self) -> Username {
        self.username.clone()
    }

    fn realm(&self) -> Realm {
        self.realm.clone()
    }

    async fn write_to(&self, data: &[u8], to: SocketAddr) -> Result<usize> {
        let n = self.conn.send_to(data, to).await?;
        Ok(n)
    }

    /// Performs a STUN transaction against the server, retransmitting per
    /// the schedule of this client's transport.
    async fn perform_transaction(
        &mut self,
        msg: &Message,
        to: SocketAddr,
        ignore_result: bool,
    ) -> Result<TransactionResult> {
        let tr_key = BASE64_STANDARD.encode(msg.transaction_id.0);

        let timer = RetransmissionTimer::new(
            self.rto,
            self.max_retransmissions,
            self.reliable,
            stun::timer::DEFAULT_RELIABLE_TIMEOUT,
        );
        let mut tr = Transaction::new(TransactionConfig {
            key: tr_key.clone(),
            raw: msg.raw.clone(),
            to,
            timer,
            ignore_result,
        });
        let result_ch_rx = tr.get_result_channel();

        log::trace!("start {} transaction {} to {}", msg.typ, tr_key, tr.to);
        {
            let mut tm = self.tr_map.lock().await;
            tm.insert(tr_key.clone(), tr);
        }

        self.conn.send_to(&msg.raw, to).await?;

        let conn2 = Arc::clone(&self.conn);
        let tr_map2 = Arc::clone(&self.tr_map);
        {
            let mut tm = self.tr_map.lock().await;
            if let Some(tr) = tm.get(&tr_key) {
                tr.start_rtx_timer(conn2, tr_map2).await;
            }
        }

        if ignore_result {
            return Ok(TransactionResult::default());
        }

        if let Some(mut result_ch_rx) = result_ch_rx {
            match result_ch_rx.recv().await {
                Some(tr) => match tr.err {
                    Some(err) => Err(err),
                    None => Ok(tr),
                },
                None => Err(Error::ErrTransactionClosed),
            }
        } else {
            Err(Error::ErrWaitForResultOnNonResultTransaction)
        }
    }
}

impl ClientInternal {
    fn new(config: ClientConfig) -> Self {
        let integrity = match &config.decoded_password {
            Some(raw) => MessageIntegrity::new_raw(raw.clone()),
            None => MessageIntegrity::new_short_term_integrity(String::new()),
        };
        let reliable = config.conn.is_reliable();

        ClientInternal {
            conn: Arc::clone(&config.conn),
            turn_serv_addr: config.turn_serv_addr,
            username: Username::new(ATTR_USERNAME, config.username),
            password: config.password,
            realm: Realm::new(ATTR_REALM, config.realm),
            software: Software::new(ATTR_SOFTWARE, config.software),
            variant: config.variant,
            even_port: config.even_port,
            decoded_password: config.decoded_password,
            reliable,
            tr_map: Arc::new(Mutex::new(TransactionMap::new())),
            binding_mgr: Arc::new(Mutex::new(BindingManager::new())),
            rto: if config.rto != Duration::from_secs(0) {
                config.rto
            } else {
                stun::timer::DEFAULT_INITIAL_RTO
            },
            max_retransmissions: if config.max_retransmissions != 0 {
                config.max_retransmissions
            } else {
                stun::timer::DEFAULT_MAX_RETRANSMISSIONS
            },
            integrity,
            read_ch_tx: Arc::new(Mutex::new(None)),
            close_notify: CancellationToken::new(),
        }
    }

    /// Starts the read loop on the base socket. All inbound traffic is
    /// demultiplexed here: transactional STUN, Data indications, channel
    /// data; anything else is dropped as out-of-allocation noise.
    async fn listen(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let tr_map = Arc::clone(&self.tr_map);
        let read_ch_tx = Arc::clone(&self.read_ch_tx);
        let binding_mgr = Arc::clone(&self.binding_mgr);
        let close_notify = self.close_notify.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATA_BUFFER_SIZE];
            let wait_cancel = close_notify.cancelled();
            tokio::pin!(wait_cancel);

            loop {
                let (n, from) = tokio::select! {
                    biased;

                    _ = &mut wait_cancel => {
                        log::debug!("exiting read loop");
                        break;
                    },
                    result = conn.recv_from(&mut buf) => match result {
                        Ok((n, from)) => (n, from),
                        Err(err) => {
                            log::debug!("exiting read loop: {err}");
                            break;
                        }
                    }
                };

                if let Err(err) = ClientInternal::handle_inbound(
                    &read_ch_tx,
                    &buf[..n],
                    from,
                    &tr_map,
                    &binding_mgr,
                )
                .await
                {
                    log::debug!("exiting read loop: {err}");
                    break;
                }
            }
        });

        Ok(())
    }

    /// Demultiplexes one inbound packet. A `false` from the inner helpers
    /// means application data the allocation owner should see.
    async fn handle_inbound(
        read_ch_tx: &Arc<Mutex<Option<mpsc::Sender<InboundData>>>>,
        data: &[u8],
        from: SocketAddr,
        tr_map: &Arc<Mutex<TransactionMap>>,
        binding_mgr: &Arc<Mutex<BindingManager>>,
    ) -> Result<()> {
        if is_message(data) {
            ClientInternal::handle_stun_message(tr_map, read_ch_tx, data, from).await
        } else if ChannelData::is_channel_data(data) {
            ClientInternal::handle_channel_data(binding_mgr, read_ch_tx, data).await
        } else {
            log::trace!("non-STUN/TURN packet, unhandled");
            Ok(())
        }
    }

    async fn handle_stun_message(
        tr_map: &Arc<Mutex<TransactionMap>>,
        read_ch_tx: &Arc<Mutex<Option<mpsc::Sender<InboundData>>>>,
        data: &[u8],
        mut from: SocketAddr,
    ) -> Result<()> {
        let mut msg = Message::new();
        msg.raw = data.to_vec();
        msg.decode()?;

        if msg.typ.class == CLASS_REQUEST {
            return Err(Error::ErrUnexpectedStunrequestMessage);
        }

        if msg.typ.class == CLASS_INDICATION {
            if msg.typ.method == METHOD_DATA {
                let mut peer_addr = PeerAddress::default();
                peer_addr.get_from(&msg)?;
                from = SocketAddr::new(peer_addr.ip, peer_addr.port);

                let mut data = Data::default();
                data.get_from(&msg)?;

                log::trace!("data indication received from {from}");

                let _ = ClientInternal::handle_inbound_relay_conn(read_ch_tx, &data.0, from).await;
            }

            return Ok(());
        }

        // success or error response: correlate by transaction id
        let tr_key = BASE64_STANDARD.encode(msg.transaction_id.0);

        let mut tm = tr_map.lock().await;
        if tm.find(&tr_key).is_none() {
            // silently discard
            log::debug!("no transaction for {msg}");
            return Ok(());
        }

        if let Some(mut tr) = tm.delete(&tr_key) {
            tr.stop_rtx_timer();

            if !tr
                .write_result(TransactionResult {
                    msg,
                    from,
                    retries: tr.retries,
                    ..Default::default()
                })
                .await
            {
                log::debug!("no listener for response");
            }
        }

        Ok(())
    }

    async fn handle_channel_data(
        binding_mgr: &Arc<Mutex<BindingManager>>,
        read_ch_tx: &Arc<Mutex<Option<mpsc::Sender<InboundData>>>>,
        data: &[u8],
    ) -> Result<()> {
        let mut ch_data = ChannelData {
            raw: data.to_vec(),
            ..Default::default()
        };
        ch_data.decode()?;

        let addr = {
            let bm = binding_mgr.lock().await;
            bm.find_by_number(ch_data.number.0).map(|b| b.addr)
        }
        .ok_or(Error::ErrChannelBindNotFound)?;

        log::trace!(
            "channel data received from {} (ch={})",
            addr,
            ch_data.number.0
        );

        let _ = ClientInternal::handle_inbound_relay_conn(read_ch_tx, &ch_data.data, addr).await;

        Ok(())
    }

    /// Hands unwrapped payload to the relayed conn with its synthesized
    /// `from` address.
    async fn handle_inbound_relay_conn(
        read_ch_tx: &Arc<Mutex<Option<mpsc::Sender<InboundData>>>>,
        data: &[u8],
        from: SocketAddr,
    ) -> Result<()> {
        let read_ch_tx_opt = read_ch_tx.lock().await;
        if let Some(tx) = &*read_ch_tx_opt {
            if tx
                .try_send(InboundData {
                    data: data.to_vec(),
                    from,
                })
                .is_err()
            {
                log::warn!("receive buffer full");
            }
            Ok(())
        } else {
            Err(Error::ErrAlreadyClosed)
        }
    }

    async fn close(&mut self) {
        self.close_notify.cancel();
        {
            let mut read_ch_tx = self.read_ch_tx.lock().await;
            read_ch_tx.take();
        }
        {
            let mut tm = self.tr_map.lock().await;
            tm.close_and_delete_all();
        }
    }

    /// Sends a Binding request to `to`, returning the reflexive address.
    async fn send_binding_request_to(&mut self, to: SocketAddr) -> Result<SocketAddr> {
        let msg = {
            let attrs: Vec<Box<dyn Setter>> = if !self.software.text.is_empty() {
                vec![
                    Box::new(TransactionId::new()),
                    Box::new(BINDING_REQUEST),
                    Box::new(self.software.clone()),
                ]
            } else {
                vec![Box::new(TransactionId::new()), Box::new(BINDING_REQUEST)]
            };

            let mut msg = Message::new();
            msg.build(&attrs)?;
            msg
        };

        let tr_res = self.perform_transaction(&msg, to, false).await?;

        let mut refl_addr = stun::xoraddr::XorMappedAddress::default();
        refl_addr.get_from(&tr_res.msg)?;

        Ok(SocketAddr::new(refl_addr.ip, refl_addr.port))
    }

    fn allocate_request_attrs(&self) -> Vec<Box<dyn Setter>> {
        let mut attrs: Vec<Box<dyn Setter>> = vec![
            Box::new(TransactionId::new()),
            Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_REQUEST)),
            Box::new(RequestedTransport {
                protocol: PROTO_UDP,
            }),
        ];
        if self.even_port {
            attrs.push(Box::new(EvenPort {
                reserve_port: false,
            }));
        }
        attrs
    }

    /// Performs the Allocate handshake: an anonymous request first, then a
    /// credentialled retry once the server challenges with realm + nonce
    /// (401/438), following an ALTERNATE-SERVER redirect (300) once.
    async fn allocate(&mut self) -> Result<RelayConnConfig> {
        {
            let read_ch_tx = self.read_ch_tx.lock().await;
            if read_ch_tx.is_some() {
                return Err(Error::ErrOneAllocateOnly);
            }
        }

        let mut attrs = self.allocate_request_attrs();
        attrs.push(Box::new(FINGERPRINT));
        let mut msg = Message::new();
        msg.build(&attrs)?;

        let tr_res = self
            .perform_transaction(&msg, self.turn_serv_addr, false)
            .await?;
        let mut res = tr_res.msg;

        if res.typ.class == CLASS_ERROR_RESPONSE {
            let mut code = ErrorCodeAttribute::default();
            if code.get_from(&res).is_ok() && code.code == CODE_TRY_ALTERNATE {
                let mut alternate = stun::addr::MappedAddress::default();
                alternate.get_from_as(&res, ATTR_ALTERNATE_SERVER)?;
                self.turn_serv_addr = SocketAddr::new(alternate.ip, alternate.port);

                let mut attrs = self.allocate_request_attrs();
                attrs.push(Box::new(FINGERPRINT));
                msg.build(&attrs)?;
                let tr_res = self
                    .perform_transaction(&msg, self.turn_serv_addr, false)
                    .await?;
                res = tr_res.msg;
            }
        }

        // anonymous allocate failed; authenticate with the challenge
        let nonce = Nonce::get_from_as(&res, ATTR_NONCE)?;
        self.realm = Realm::get_from_as(&res, ATTR_REALM)?;

        self.integrity = match &self.decoded_password {
            Some(raw) => MessageIntegrity::new_raw(raw.clone()),
            None => MessageIntegrity::new_long_term_integrity(
                self.username.text.clone(),
                self.realm.text.clone(),
                self.password.clone(),
            ),
        };

        let mut attrs = self.allocate_request_attrs();
        attrs.push(Box::new(self.username.clone()));
        attrs.push(Box::new(self.realm.clone()));
        attrs.push(Box::new(nonce.clone()));
        attrs.push(Box::new(self.integrity.clone()));
        attrs.push(Box::new(FINGERPRINT));
        msg.build(&attrs)?;

        let tr_res = self
            .perform_transaction(&msg, self.turn_serv_addr, false)
            .await?;
        let res = tr_res.msg;

        if res.typ.class == CLASS_ERROR_RESPONSE {
            let mut code = ErrorCodeAttribute::default();
            if code.get_from(&res).is_err() {
                return Err(Error::Other(format!("{}", res.typ)));
            } else {
                return Err(Error::Other(format!("{} (error {})", res.typ, code)));
            }
        }

        // relayed address and lifetime from the success response
        let mut relayed = RelayedAddress::default();
        relayed.get_from(&res)?;
        let relayed_addr = SocketAddr::new(relayed.ip, relayed.port);

        let mut lifetime = Lifetime::default();
        lifetime.get_from(&res)?;

        let (read_ch_tx, read_ch_rx) = mpsc::channel(MAX_READ_QUEUE_SIZE);
        {
            let mut read_ch_tx_opt = self.read_ch_tx.lock().await;
            *read_ch_tx_opt = Some(read_ch_tx);
        }

        Ok(RelayConnConfig {
            relayed_addr,
            integrity: self.integrity.clone(),
            nonce,
            lifetime: lifetime.0,
            reliable: self.reliable,
            binding_mgr: Arc::clone(&self.binding_mgr),
            read_ch_rx: Arc::new(Mutex::new(read_ch_rx)),
        })
    }
}

/// TURN client: one allocation per client, shared by the relayed conn it
/// hands out.
#[derive(Clone)]
pub struct Client {
    client_internal: Arc<Mutex<ClientInternal>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Client {
            client_internal: Arc::new(Mutex::new(ClientInternal::new(config))),
        }
    }

    /// Starts listening on the base socket.
    pub async fn listen(&self) -> Result<()> {
        let ci = self.client_internal.lock().await;
        ci.listen().await
    }

    /// Allocates a relayed transport address and returns it as a conn.
    pub async fn allocate(&self) -> Result<Arc<dyn Conn + Send + Sync>> {
        let config = {
            let mut ci = self.client_internal.lock().await;
            ci.allocate().await?
        };

        Ok(Arc::new(
            RelayConn::new(Arc::clone(&self.client_internal), config).await,
        ))
    }

    pub async fn close(&self) -> Result<()> {
        let mut ci = self.client_internal.lock().await;
        ci.close().await;
        Ok(())
    }

    /// Sends a Binding request to the given server address (server
    /// reflexive discovery over the same socket).
    pub async fn send_binding_request_to(&self, to: SocketAddr) -> Result<SocketAddr> {
        let mut ci = self.client_internal.lock().await;
        ci.send_binding_request_to(to).await
    }

    /// The address of the TURN server this client allocates against.
    pub async fn turn_server_addr(&self) -> SocketAddr {
        let ci = self.client_internal.lock().await;
        ci.turn_server_addr()
    }
}
