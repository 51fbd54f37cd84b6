//! Connection registry: the single shared mutable structure of a relay
//! node, owned by the server actor.
//!
//! Two primary indexes cover the live sockets: `clients` by client id
//! and `servers` by peer node id. Two derived tables key the same
//! connections by swarm: `relays` maps each subscribed digest to the
//! peer ids participating in it (an adjacency list over `servers`),
//! and `offers` holds the per-info-hash sets of clients awaiting a
//! partner.

use std::collections::{HashMap, HashSet};

use tokio::time::Instant;

use crate::messages::FrameSender;

/// One accepted `/signal` session.
#[derive(Debug)]
pub struct ClientConn {
    /// Client-supplied id, unique across live clients.
    pub id: String,
    /// Subscribed info-hash this client belongs to.
    pub hash: String,
    /// Desired number of peerings, clamped to 1..=6.
    pub want: usize,
    /// Connection serial; guards against stale teardown notifications.
    pub seq: u64,
    pub active: bool,
    /// Pending peerings awaiting offer/answer completion.
    pub ids: HashSet<String>,
    /// Completed peerings. Disjoint from `ids`, never larger than `want`.
    pub web: HashSet<String>,
    /// Last outbound-signal timestamp; cleared when the exchange
    /// settles, used to close sessions stalled mid-exchange.
    pub stamp: Option<Instant>,
    pub tx: FrameSender,
}

/// One mesh link to a sibling relay, dialed or accepted.
#[derive(Debug)]
pub struct RelayConn {
    /// Remote node id (SHA-1 hex of its address).
    pub id: String,
    pub seq: u64,
    /// True when the remote dialed us.
    pub server: bool,
    /// Liveness bit, refreshed by `pong`.
    pub active: bool,
    /// True once the `session` handshake completed and the remote's
    /// HTTP side is up; only sessioned peers are hand-off candidates.
    pub session: bool,
    /// Digest this link was opened for; the `session` frame must echo it.
    pub opened_for: String,
    /// Digests this peer participates in with us.
    pub relays: Vec<String>,
    // Identity fields reported by the remote in its session frame.
    pub address: String,
    pub web: String,
    pub host: String,
    pub port: u16,
    pub domain: Option<String>,
    pub tx: FrameSender,
}

impl RelayConn {
    pub fn new(id: String, seq: u64, server: bool, opened_for: String, tx: FrameSender) -> Self {
        Self {
            id,
            seq,
            server,
            active: true,
            session: false,
            opened_for,
            relays: Vec::new(),
            address: String::new(),
            web: String::new(),
            host: String::new(),
            port: 0,
            domain: None,
            tx,
        }
    }
}

#[derive(Debug)]
pub struct PeerRegistry {
    clients: HashMap<String, ClientConn>,
    servers: HashMap<String, RelayConn>,
    /// digest → peer ids, adjacency over `servers`.
    relays: HashMap<String, Vec<String>>,
    /// info-hash → waiting client ids.
    offers: HashMap<String, HashSet<String>>,
}

impl PeerRegistry {
    /// `subscribed` pairs each info-hash with its digest; both tables
    /// get an entry per swarm up front.
    pub fn new(subscribed: &[(String, String)]) -> Self {
        Self {
            clients: HashMap::new(),
            servers: HashMap::new(),
            relays: subscribed.iter().map(|(_, d)| (d.clone(), Vec::new())).collect(),
            offers: subscribed.iter().map(|(h, _)| (h.clone(), HashSet::new())).collect(),
        }
    }

    // ------------------------------------------------------------------
    // Clients
    // ------------------------------------------------------------------

    /// Fails when the id is already taken by a live client; the caller
    /// must reject the new socket.
    pub fn add_client(&mut self, conn: ClientConn) -> Result<(), &'static str> {
        if self.clients.contains_key(&conn.id) {
            return Err("id is not available");
        }
        self.clients.insert(conn.id.clone(), conn);
        Ok(())
    }

    pub fn remove_client(&mut self, id: &str) -> Option<ClientConn> {
        self.clients.remove(id)
    }

    pub fn get_client(&self, id: &str) -> Option<&ClientConn> {
        self.clients.get(id)
    }

    pub fn get_client_mut(&mut self, id: &str) -> Option<&mut ClientConn> {
        self.clients.get_mut(id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Relay peers
    // ------------------------------------------------------------------

    pub fn add_server(&mut self, conn: RelayConn) -> Result<(), &'static str> {
        if self.servers.contains_key(&conn.id) {
            return Err("id is not available");
        }
        self.servers.insert(conn.id.clone(), conn);
        Ok(())
    }

    /// Removes the peer from `servers` and from every digest adjacency
    /// it was attached to.
    pub fn remove_server(&mut self, id: &str) -> Option<RelayConn> {
        let conn = self.servers.remove(id)?;
        for members in self.relays.values_mut() {
            members.retain(|member| member != id);
        }
        Some(conn)
    }

    pub fn get_server(&self, id: &str) -> Option<&RelayConn> {
        self.servers.get(id)
    }

    pub fn get_server_mut(&mut self, id: &str) -> Option<&mut RelayConn> {
        self.servers.get_mut(id)
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn server_ids(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Mesh membership (digest adjacency)
    // ------------------------------------------------------------------

    /// Idempotent: a peer already attached to the digest is not
    /// appended twice.
    pub fn attach_relay(&mut self, digest: &str, peer_id: &str) {
        let members = self.relays.entry(digest.to_owned()).or_default();
        if !members.iter().any(|member| member == peer_id) {
            members.push(peer_id.to_owned());
        }
    }

    pub fn detach_relay(&mut self, digest: &str, peer_id: &str) {
        if let Some(members) = self.relays.get_mut(digest) {
            members.retain(|member| member != peer_id);
        }
    }

    pub fn member_count(&self, digest: &str) -> usize {
        self.relays.get(digest).map_or(0, Vec::len)
    }

    pub fn relays_for(&self, digest: &str) -> Vec<&RelayConn> {
        self.relays
            .get(digest)
            .into_iter()
            .flatten()
            .filter_map(|id| self.servers.get(id))
            .collect()
    }

    pub fn membership(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.relays.iter()
    }

    // ------------------------------------------------------------------
    // Offer queues
    // ------------------------------------------------------------------

    pub fn waiting_for(&mut self, hash: &str) -> &mut HashSet<String> {
        self.offers.entry(hash.to_owned()).or_default()
    }

    pub fn waiting(&self, hash: &str) -> Option<&HashSet<String>> {
        self.offers.get(hash)
    }

    pub fn offers(&self) -> impl Iterator<Item = (&String, &HashSet<String>)> {
        self.offers.iter()
    }
}
