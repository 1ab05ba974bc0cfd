use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::sync::Mutex as SyncMutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};

use super::candidate_host::CandidateHostConfig;
use super::candidate_peer_reflexive::CandidatePeerReflexiveConfig;
use super::candidate_relay::CandidateRelayConfig;
use super::candidate_server_reflexive::CandidateServerReflexiveConfig;
use super::*;
use crate::compatibility::Compatibility;
use crate::error::Error;
use crate::network_type::determine_network_type;
use crate::rand::generate_cand_id;

fn unspecified_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 0)
}

/// Shared construction parameters for all candidate types.
pub struct CandidateBaseConfig {
    pub candidate_id: String,
    pub network: String,
    pub address: SocketAddr,
    pub stream_id: u32,
    pub component: u16,
    pub priority: u32,
    pub foundation: String,
    pub compatibility: Compatibility,
    pub conn: Option<Arc<dyn util::Conn + Send + Sync>>,
}

impl Default for CandidateBaseConfig {
    fn default() -> Self {
        CandidateBaseConfig {
            candidate_id: String::new(),
            network: "udp".to_owned(),
            address: unspecified_addr(),
            stream_id: 0,
            component: 0,
            priority: 0,
            foundation: String::new(),
            compatibility: Compatibility::default(),
            conn: None,
        }
    }
}

pub struct CandidateBase {
    pub(crate) id: String,
    pub(crate) stream_id: u32,
    pub(crate) network_type: AtomicU8,
    pub(crate) candidate_type: CandidateType,
    pub(crate) tcp_type: TcpType,

    pub(crate) component: AtomicU16,
    pub(crate) addr: SyncMutex<SocketAddr>,
    pub(crate) base_addr: SyncMutex<SocketAddr>,
    pub(crate) server_addr: Option<SocketAddr>,
    pub(crate) related_address: Option<CandidateRelatedAddress>,

    pub(crate) foundation: SyncMutex<String>,
    pub(crate) priority: u32,

    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,

    pub(crate) last_sent: AtomicU64,
    pub(crate) last_received: AtomicU64,

    pub(crate) conn: SyncMutex<Option<Arc<dyn util::Conn + Send + Sync>>>,
    pub(crate) relay_client: Option<turn::client::Client>,
    pub(crate) closed_ch: Arc<Mutex<Option<broadcast::Sender<()>>>>,
}

impl Default for CandidateBase {
    fn default() -> Self {
        Self {
            id: String::new(),
            stream_id: 0,
            network_type: AtomicU8::new(0),
            candidate_type: CandidateType::default(),
            tcp_type: TcpType::default(),

            component: AtomicU16::new(0),
            addr: SyncMutex::new(unspecified_addr()),
            base_addr: SyncMutex::new(unspecified_addr()),
            server_addr: None,
            related_address: None,

            foundation: SyncMutex::new(String::new()),
            priority: 0,

            username: None,
            password: None,

            last_sent: AtomicU64::new(0),
            last_received: AtomicU64::new(0),

            conn: SyncMutex::new(None),
            relay_client: None,
            closed_ch: Arc::new(Mutex::new(None)),
        }
    }
}

impl fmt::Display for CandidateBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(related_address) = self.related_address() {
            write!(
                f,
                "{} {} {}{}",
                self.network_type(),
                self.candidate_type(),
                self.addr(),
                related_address,
            )
        } else {
            write!(
                f,
                "{} {} {}",
                self.network_type(),
                self.candidate_type(),
                self.addr(),
            )
        }
    }
}

#[async_trait]
impl Candidate for CandidateBase {
    fn foundation(&self) -> String {
        self.foundation
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default()
    }

    fn set_foundation(&self, foundation: &str) {
        if let Ok(mut f) = self.foundation.lock() {
            *f = foundation.to_owned();
        }
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    fn stream_id(&self) -> u32 {
        self.stream_id
    }

    fn component(&self) -> u16 {
        self.component.load(Ordering::SeqCst)
    }

    fn set_component(&self, component: u16) {
        self.component.store(component, Ordering::SeqCst);
    }

    fn last_received(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.last_received.load(Ordering::SeqCst))
    }

    fn last_sent(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.last_sent.load(Ordering::SeqCst))
    }

    fn network_type(&self) -> NetworkType {
        NetworkType::from(self.network_type.load(Ordering::SeqCst))
    }

    fn candidate_type(&self) -> CandidateType {
        self.candidate_type
    }

    fn tcp_type(&self) -> TcpType {
        self.tcp_type
    }

    fn addr(&self) -> SocketAddr {
        self.addr.lock().map(|a| *a).unwrap_or_else(|_| unspecified_addr())
    }

    fn base_addr(&self) -> SocketAddr {
        self.base_addr
            .lock()
            .map(|a| *a)
            .unwrap_or_else(|_| unspecified_addr())
    }

    fn server_addr(&self) -> Option<SocketAddr> {
        self.server_addr
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn candidate_username(&self) -> Option<String> {
        self.username.clone()
    }

    fn candidate_password(&self) -> Option<String> {
        self.password.clone()
    }

    fn related_address(&self) -> Option<CandidateRelatedAddress> {
        self.related_address.as_ref().cloned()
    }

    fn marshal(&self) -> String {
        let mut val = format!(
            "{} {} {} {} {} {} typ {}",
            self.foundation(),
            self.component(),
            self.network_type().network_short(),
            self.priority(),
            self.addr().ip(),
            self.addr().port(),
            self.candidate_type()
        );

        if self.tcp_type != TcpType::Unspecified {
            val += format!(" tcptype {}", self.tcp_type()).as_str();
        }

        if let Some(related_address) = self.related_address() {
            val += format!(
                " raddr {} rport {}",
                related_address.address, related_address.port,
            )
            .as_str();
        }

        val
    }

    /// Stops the receive loop and releases the socket.
    async fn close(&self) -> Result<()> {
        {
            let mut closed_ch = self.closed_ch.lock().await;
            if closed_ch.is_none() {
                return Err(Error::ErrClosed);
            }
            closed_ch.take();
        }

        // the relayed conn deletes its allocation on close and waits for
        // the answer, so it must go before the client stops reading
        let conn = self.get_conn();
        if let Some(conn) = conn {
            let _ = conn.close().await;
        }

        if let Some(relay_client) = &self.relay_client {
            let _ = relay_client.close().await;
        }

        Ok(())
    }

    fn seen(&self, outbound: bool) {
        let d = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0));

        if outbound {
            self.last_sent.store(d.as_nanos() as u64, Ordering::SeqCst);
        } else {
            self.last_received
                .store(d.as_nanos() as u64, Ordering::SeqCst);
        }
    }

    async fn write_to(&self, raw: &[u8], dst: &(dyn Candidate + Send + Sync)) -> Result<usize> {
        let n = if let Some(conn) = self.get_conn() {
            let addr = dst.addr();
            conn.send_to(raw, addr).await.map_err(Error::from)?
        } else {
            0
        };
        self.seen(true);
        Ok(n)
    }

    /// No two local candidates of a component may compare equal under this.
    fn equal(&self, other: &dyn Candidate) -> bool {
        self.network_type() == other.network_type()
            && self.candidate_type() == other.candidate_type()
            && self.addr() == other.addr()
            && self.base_addr() == other.base_addr()
            && self.tcp_type() == other.tcp_type()
    }

    fn get_conn(&self) -> Option<Arc<dyn util::Conn + Send + Sync>> {
        self.conn.lock().map(|c| c.clone()).unwrap_or(None)
    }

    fn set_conn(&self, conn: Arc<dyn util::Conn + Send + Sync>) {
        if let Ok(mut c) = self.conn.lock() {
            *c = Some(conn);
        }
    }

    fn get_closed_ch(&self) -> Arc<Mutex<Option<broadcast::Sender<()>>>> {
        self.closed_ch.clone()
    }
}

impl CandidateBase {
    pub(crate) fn new_common(
        config: CandidateBaseConfig,
        candidate_type: CandidateType,
        tcp_type: TcpType,
        base_addr: SocketAddr,
        server_addr: Option<SocketAddr>,
        related_address: Option<CandidateRelatedAddress>,
    ) -> Result<Self> {
        let network_type = determine_network_type(&config.network, &config.address.ip())?;

        let id = if config.candidate_id.is_empty() {
            generate_cand_id()
        } else {
            config.candidate_id
        };

        let priority = if config.priority == 0 {
            config.compatibility.candidate_priority(
                candidate_type,
                tcp_type,
                network_type.is_tcp(),
                config.component,
            )
        } else {
            config.priority
        };

        Ok(CandidateBase {
            id,
            stream_id: config.stream_id,
            network_type: AtomicU8::new(network_type as u8),
            candidate_type,
            tcp_type,
            component: AtomicU16::new(config.component),
            addr: SyncMutex::new(config.address),
            base_addr: SyncMutex::new(base_addr),
            server_addr,
            related_address,
            foundation: SyncMutex::new(config.foundation),
            priority,
            username: None,
            password: None,
            last_sent: AtomicU64::new(0),
            last_received: AtomicU64::new(0),
            conn: SyncMutex::new(config.conn),
            relay_client: None,
            closed_ch: Arc::new(Mutex::new(None)),
        })
    }

    pub(crate) fn set_candidate_credentials(&mut self, username: String, password: String) {
        self.username = Some(username);
        self.password = Some(password);
    }

    pub(crate) fn set_relay_client(&mut self, client: turn::client::Client) {
        self.relay_client = Some(client);
    }
}

/// Creates a candidate from its candidate-line form. The foundation comes
/// along verbatim; agents re-assign it when adopting a remote candidate.
pub fn unmarshal_candidate(raw: &str) -> Result<CandidateBase> {
    let split: Vec<&str> = raw.split_whitespace().collect();
    if split.len() < 8 {
        return Err(Error::ErrAttributeTooShortIceCandidate);
    }

    let foundation = split[0].to_owned();
    let component: u16 = split[1].parse()?;
    let network = split[2].to_owned();
    let priority: u32 = split[3].parse()?;
    let address: IpAddr = split[4].parse()?;
    let port: u16 = split[5].parse()?;
    let typ = split[7];

    let addr = SocketAddr::new(address, port);

    let mut rel_addr: Option<SocketAddr> = None;
    let mut tcp_type = TcpType::Unspecified;

    let mut extra = &split[8..];
    while !extra.is_empty() {
        match extra[0] {
            "raddr" => {
                if extra.len() < 4 || extra[2] != "rport" {
                    return Err(Error::ErrParseRelatedAddr);
                }
                let rip: IpAddr = extra[1].parse()?;
                let rport: u16 = extra[3].parse()?;
                rel_addr = Some(SocketAddr::new(rip, rport));
                extra = &extra[4..];
            }
            "tcptype" => {
                if extra.len() < 2 {
                    return Err(Error::ErrParseType);
                }
                tcp_type = TcpType::from(extra[1]);
                extra = &extra[2..];
            }
            _ => {
                extra = &extra[1..];
            }
        }
    }

    let base_config = CandidateBaseConfig {
        network,
        address: addr,
        component,
        priority,
        foundation,
        ..CandidateBaseConfig::default()
    };

    match typ {
        "host" => CandidateHostConfig {
            base_config,
            tcp_type,
        }
        .new_candidate_host(),
        "srflx" => CandidateServerReflexiveConfig {
            base_config,
            base_addr: rel_addr.unwrap_or(addr),
        }
        .new_candidate_server_reflexive(),
        "prflx" => CandidatePeerReflexiveConfig {
            base_config,
            base_addr: rel_addr.unwrap_or(addr),
        }
        .new_candidate_peer_reflexive(),
        "relay" => CandidateRelayConfig {
            base_config,
            rel_addr,
            server_addr: None,
            relay_client: None,
        }
        .new_candidate_relay(),
        _ => Err(Error::ErrUnknownCandidateType),
    }
}
