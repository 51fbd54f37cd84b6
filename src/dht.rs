//! Injected DHT interface.
//!
//! The relay treats peer discovery as an opaque source: any
//! Kademlia-mainline-compatible implementation can back it, and the
//! node never assumes the implementation is reentrant. The trait
//! mirrors the operations the lifecycle drives: bind, announce and
//! look up every subscribed digest, stream discovered peers, destroy
//! on shutdown.

use std::net::SocketAddr;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::server::Command;

/// A peer observed on the DHT for an announced info-hash digest.
#[derive(Debug, Clone)]
pub struct DhtPeer {
    pub host: String,
    pub port: u16,
    /// Raw digest bytes as carried on the wire.
    pub info_hash: Vec<u8>,
    /// Address of the node that reported the peer.
    pub from: Option<SocketAddr>,
}

#[async_trait]
pub trait Dht: Send + Sync {
    async fn listen(&self, port: u16, host: &str) -> Result<()>;
    /// Announce our participation under a digest.
    async fn announce(&self, digest: &str) -> Result<()>;
    /// Ask the network for peers under a digest.
    async fn lookup(&self, digest: &str) -> Result<()>;
    /// Take-once stream of discovered peers. The relay is the single
    /// consumer; a second call may return `None`.
    async fn peers(&self) -> Option<mpsc::UnboundedReceiver<DhtPeer>>;
    async fn destroy(&self);
}

/// Forward discovered peers into the actor, hex-encoding the raw
/// info-hash bytes into the digest keys the dialer works with.
pub(crate) fn spawn_peer_pump(
    mut peers: mpsc::UnboundedReceiver<DhtPeer>,
    commands: mpsc::Sender<Command>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(peer) = peers.recv().await {
            let digest = hex::encode(&peer.info_hash);
            debug!(host = %peer.host, port = peer.port, digest = %digest, "dht peer");
            let found = Command::PeerFound { host: peer.host, port: peer.port, digest };
            if commands.send(found).await.is_err() {
                break;
            }
        }
    })
}
