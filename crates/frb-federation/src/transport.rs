//! Asynchronous packet delivery between brokers.
//!
//! `send` only hands a packet to the network; replies come back through the
//! receiving side's dispatch loop. Two implementations:
//! - [`LoopbackNetwork`]: in-process, one unbounded channel per member.
//! - [`HttpTransport`]: JSON POST to the peer daemon.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::message::Packet;

pub const PACKETS_PATH: &str = "/v1/federation/packets";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no route to provider '{0}'")]
    UnknownPeer(String),
    #[error("provider '{0}' is not reachable")]
    Unreachable(String),
    #[error("http delivery to '{peer}' failed: {source}")]
    Http {
        peer: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("provider '{peer}' refused packet with status {status}")]
    Refused { peer: String, status: u16 },
}

#[async_trait]
pub trait PacketTransport: Send + Sync {
    async fn send(&self, packet: Packet) -> Result<(), TransportError>;
}

// ---------------------------------------------------------------------------
// Loopback
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LoopbackInner {
    members: HashMap<String, mpsc::UnboundedSender<Packet>>,
    partitioned: HashSet<String>,
}

/// A shared in-process network. Clone freely.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<RwLock<LoopbackInner>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `provider`. Returns its outbound transport and its inbox.
    pub fn join(&self, provider: &str) -> (LoopbackTransport, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().members.insert(provider.to_string(), tx);
        (
            LoopbackTransport {
                network: self.clone(),
            },
            rx,
        )
    }

    /// Silently drop every packet to or from `provider` until [`heal`](Self::heal).
    pub fn partition(&self, provider: &str) {
        self.inner.write().partitioned.insert(provider.to_string());
    }

    pub fn heal(&self, provider: &str) {
        self.inner.write().partitioned.remove(provider);
    }
}

#[derive(Clone)]
pub struct LoopbackTransport {
    network: LoopbackNetwork,
}

#[async_trait]
impl PacketTransport for LoopbackTransport {
    async fn send(&self, packet: Packet) -> Result<(), TransportError> {
        let inner = self.network.inner.read();
        let to = packet.to().to_string();
        if inner.partitioned.contains(&to) || inner.partitioned.contains(packet.from()) {
            debug!(%to, from = %packet.from(), "loopback partition: packet dropped");
            return Ok(());
        }
        let tx = inner
            .members
            .get(&to)
            .ok_or_else(|| TransportError::UnknownPeer(to.clone()))?;
        tx.send(packet)
            .map_err(|_| TransportError::Unreachable(to.clone()))
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Posts packets to `<peer base url>/v1/federation/packets`.
pub struct HttpTransport {
    client: reqwest::Client,
    peers: BTreeMap<String, String>,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(
        peers: BTreeMap<String, String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            peers,
            token,
        })
    }

    fn url_for(&self, peer: &str) -> Result<String, TransportError> {
        let base = self
            .peers
            .get(peer)
            .ok_or_else(|| TransportError::UnknownPeer(peer.to_string()))?;
        Ok(format!("{}{}", base.trim_end_matches('/'), PACKETS_PATH))
    }
}

#[async_trait]
impl PacketTransport for HttpTransport {
    async fn send(&self, packet: Packet) -> Result<(), TransportError> {
        let peer = packet.to().to_string();
        let url = self.url_for(&peer)?;

        let mut req = self.client.post(&url).json(&packet);
        if let Some(t) = &self.token {
            req = req.bearer_auth(t);
        }
        let resp = req.send().await.map_err(|source| TransportError::Http {
            peer: peer.clone(),
            source,
        })?;

        let status = resp.status();
        if !status.is_success() {
            warn!(%peer, status = status.as_u16(), "peer refused federation packet");
            return Err(TransportError::Refused {
                peer,
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Outcome, PacketFields, RemoteResponse, RequestId};

    fn packet(from: &str, to: &str) -> Packet {
        Packet::Response(RemoteResponse {
            id: RequestId::new(),
            from: from.into(),
            to: to.into(),
            outcome: Outcome::Ok {
                fields: PacketFields::new(),
            },
        })
    }

    #[tokio::test]
    async fn loopback_delivers_to_the_named_member() {
        let net = LoopbackNetwork::new();
        let (a, _a_rx) = net.join("a");
        let (_b, mut b_rx) = net.join("b");
        a.send(packet("a", "b")).await.unwrap();
        assert_eq!(b_rx.recv().await.unwrap().from(), "a");
    }

    #[tokio::test]
    async fn unknown_member_is_an_error_and_partition_is_silent() {
        let net = LoopbackNetwork::new();
        let (a, _a_rx) = net.join("a");
        let (_b, mut b_rx) = net.join("b");
        assert!(matches!(
            a.send(packet("a", "zz")).await,
            Err(TransportError::UnknownPeer(_))
        ));

        net.partition("b");
        a.send(packet("a", "b")).await.unwrap();
        assert!(b_rx.try_recv().is_err());

        net.heal("b");
        a.send(packet("a", "b")).await.unwrap();
        assert!(b_rx.try_recv().is_ok());
    }

    #[test]
    fn http_urls_are_built_from_the_peer_table() {
        let mut peers = BTreeMap::new();
        peers.insert("b".to_string(), "http://10.0.0.2:8899/".to_string());
        let t = HttpTransport::new(peers, None, Duration::from_secs(1)).unwrap();
        assert_eq!(
            t.url_for("b").unwrap(),
            "http://10.0.0.2:8899/v1/federation/packets"
        );
        assert!(t.url_for("c").is_err());
    }
}
