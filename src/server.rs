//! Relay server actor.
//!
//! One actor per node owns every piece of mutable swarm state (the
//! connection registry, the redial backoff table, the node identity
//! and limits) and processes commands sequentially. Socket pumps, the
//! DHT adapter, the sweep timer, and the lifecycle supervisor all talk
//! to it through the command channel, which makes the connection and
//! mesh state machines single-threaded no matter how many sockets are
//! live.
//!
//! The actor never blocks: outbound frames go through per-connection
//! unbounded channels and dials are spawned as independent tasks that
//! report back via commands.

use std::collections::{HashMap, HashSet};

use rand::seq::IteratorRandom;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::backoff::BackoffTable;
use crate::config::{Limits, RelayConfig};
use crate::identity::{info_hash_digest, sha1_hex, NodeIdentity};
use crate::messages::{
    ClientBound, ClientMessage, FrameSender, Outbound, PeerBound, PeerMessage,
};
use crate::node::RelayEvent;
use crate::registry::{ClientConn, PeerRegistry, RelayConn};


// ============================================================================
// Constants
// ============================================================================

/// Period of the health sweep over relay peers and client sessions.
pub(crate) const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// A client whose last outbound signal is older than this is presumed
/// stalled mid-exchange and closed by the sweep.
const CLIENT_STALL_TIMEOUT: Duration = Duration::from_millis(60_000);

const WANT_DEFAULT: usize = 3;
const WANT_MIN: usize = 1;
const WANT_MAX: usize = 6;


// ============================================================================
// Commands sent into the actor
// ============================================================================

pub(crate) enum Command {
    /// A `/signal` socket passed its query parsing and wants in.
    SignalOpen {
        hash: String,
        id: String,
        want: Option<String>,
        tx: FrameSender,
        reply: oneshot::Sender<Result<u64, &'static str>>,
    },
    SignalFrame { id: String, seq: u64, text: String },
    SignalClosed { id: String, seq: u64 },

    /// A `/relay` socket was accepted from a sibling node.
    RelayAccept {
        hash: String,
        id: String,
        tx: FrameSender,
        reply: oneshot::Sender<Result<u64, &'static str>>,
    },
    RelayFrame { id: String, seq: u64, text: String },
    RelayClosed { id: String, seq: u64, error: bool },

    /// An outbound dial finished its WebSocket handshake.
    DialOpened { id: String, seq: u64 },
    DialFailed { id: String, seq: u64 },

    /// DHT adapter observed a peer for a digest.
    PeerFound { host: String, port: u16, digest: String },

    /// Periodic health sweep tick.
    Sweep,
    /// The HTTP listener went down: hand clients off, mark the mesh.
    HttpClosed,
    /// The HTTP listener came back up after a scheduled restart.
    HttpReopened,

    Snapshot { reply: oneshot::Sender<Snapshot> },
}

/// Requests the actor raises towards the lifecycle supervisor.
pub(crate) enum LifecycleRequest {
    /// Client cap crossed: run the graceful HTTP close flow.
    CloseHttp,
}

/// Observable counters for operators and tests.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Live `/signal` sessions.
    pub clients: usize,
    /// Live mesh links, dialed and accepted.
    pub peers: usize,
    /// digest → attached mesh members.
    pub mesh: HashMap<String, usize>,
    /// digest → members with an established session.
    pub sessions: HashMap<String, usize>,
    /// info-hash → clients awaiting a partner.
    pub waiting: HashMap<String, usize>,
}


// ============================================================================
// Actor
// ============================================================================

pub(crate) struct ServerActor {
    identity: NodeIdentity,
    limits: Limits,
    dev: bool,
    /// info-hash → digest for every subscribed swarm.
    subscribed: HashMap<String, String>,
    /// The digest side of `subscribed`, for mesh-key checks.
    digests: HashSet<String>,
    registry: PeerRegistry,
    backoff: BackoffTable,
    next_seq: u64,
    /// Handle dial tasks report back through.
    commands: mpsc::Sender<Command>,
    lifecycle: mpsc::UnboundedSender<LifecycleRequest>,
    events: mpsc::UnboundedSender<RelayEvent>,
}

fn send_frame<T: Serialize>(tx: &FrameSender, frame: &T) {
    if let Ok(text) = serde_json::to_string(frame) {
        let _ = tx.send(Outbound::Frame(text));
    }
}

/// Clamp the client-supplied peering count. Anything that does not
/// parse to a finite number inside 1..=6 falls back to the default;
/// in-range fractions are floored.
fn parse_want(raw: Option<&str>) -> usize {
    let Some(raw) = raw else { return WANT_DEFAULT };
    match raw.parse::<f64>() {
        Ok(n) if n.is_finite() && n >= WANT_MIN as f64 && n <= WANT_MAX as f64 => n.floor() as usize,
        _ => WANT_DEFAULT,
    }
}

impl ServerActor {
    pub(crate) fn new(
        config: &RelayConfig,
        identity: NodeIdentity,
        commands: mpsc::Sender<Command>,
        lifecycle: mpsc::UnboundedSender<LifecycleRequest>,
        events: mpsc::UnboundedSender<RelayEvent>,
    ) -> Self {
        let pairs: Vec<(String, String)> = config
            .hashes
            .iter()
            .map(|hash| (hash.clone(), info_hash_digest(hash)))
            .collect();

        Self {
            identity,
            limits: config.limit,
            dev: config.dev,
            digests: pairs.iter().map(|(_, d)| d.clone()).collect(),
            registry: PeerRegistry::new(&pairs),
            subscribed: pairs.into_iter().collect(),
            backoff: BackoffTable::new(),
            next_seq: 0,
            commands,
            lifecycle,
            events,
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::SignalOpen { hash, id, want, tx, reply } => {
                    let _ = reply.send(self.on_signal_open(hash, id, want, tx));
                }
                Command::SignalFrame { id, seq, text } => self.on_signal_frame(&id, seq, text),
                Command::SignalClosed { id, seq } => self.on_signal_closed(&id, seq),
                Command::RelayAccept { hash, id, tx, reply } => {
                    let _ = reply.send(self.on_relay_accept(hash, id, tx));
                }
                Command::RelayFrame { id, seq, text } => self.on_relay_frame(&id, seq, &text),
                Command::RelayClosed { id, seq, error } => self.on_relay_closed(&id, seq, error),
                Command::DialOpened { id, seq } => self.on_dial_opened(&id, seq),
                Command::DialFailed { id, seq } => self.on_dial_failed(&id, seq),
                Command::PeerFound { host, port, digest } => self.on_peer_found(&host, port, digest),
                Command::Sweep => self.on_sweep(),
                Command::HttpClosed => self.on_http_closed(),
                Command::HttpReopened => self.on_http_reopened(),
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.snapshot());
                }
            }
        }
        debug!("server actor shutting down");
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    // ------------------------------------------------------------------
    // Client state machine (/signal)
    // ------------------------------------------------------------------

    fn on_signal_open(
        &mut self,
        hash: String,
        id: String,
        want: Option<String>,
        tx: FrameSender,
    ) -> Result<u64, &'static str> {
        if !self.subscribed.contains_key(&hash) {
            return Err("hash is not supported");
        }
        if self.registry.get_client(&id).is_some() {
            return Err("id is not available");
        }

        let want = parse_want(want.as_deref());
        let seq = self.next_seq();
        self.registry.add_client(ClientConn {
            id: id.clone(),
            hash: hash.clone(),
            want,
            seq,
            active: true,
            ids: HashSet::new(),
            web: HashSet::new(),
            stamp: None,
            tx,
        })?;
        info!(client = %id, hash = %hash, want, "client joined");

        self.match_and_initiate(&id);

        let cap = self.limits.client_connections;
        if cap > 0 && self.registry.client_count() > cap {
            warn!(clients = self.registry.client_count(), cap, "client cap crossed, closing http");
            let _ = self.lifecycle.send(LifecycleRequest::CloseHttp);
        }

        Ok(seq)
    }

    fn on_signal_frame(&mut self, id: &str, seq: u64, text: String) {
        let Some(client) = self.registry.get_client(id) else { return };
        if client.seq != seq {
            return;
        }
        if self.dev {
            trace!(client = %id, frame = %text, "signal frame");
        }

        match serde_json::from_str::<ClientMessage>(&text) {
            Err(err) => {
                warn!(client = %id, error = %err, "unparseable client frame");
                self.close_client(id);
            }
            Ok(ClientMessage::Proc { req, res }) => self.on_proc(id, &req, &res),
            Ok(ClientMessage::Request { res, .. }) => self.forward(id, &res, text),
            Ok(ClientMessage::Response { req, .. }) => self.forward(id, &req, text),
            Ok(ClientMessage::Unknown) => {}
        }
    }

    /// Both named clients confirm the peering: each moves the other
    /// side's id from pending to completed. Only the two parties may
    /// settle their own exchange; a frame naming other clients is
    /// dropped. Clients that reached their desired peering count are
    /// done and get closed; the rest go back to the broker. Duplicate
    /// frames are no-ops.
    fn on_proc(&mut self, sender: &str, req: &str, res: &str) {
        if sender != req && sender != res {
            return;
        }
        for (own, other) in [(req, res), (res, req)] {
            let moved = match self.registry.get_client_mut(own) {
                Some(client) if client.ids.contains(other) && !client.web.contains(other) => {
                    client.ids.remove(other);
                    client.web.insert(other.to_owned());
                    client.stamp = None;
                    true
                }
                _ => false,
            };
            if !moved {
                continue;
            }

            let full = self
                .registry
                .get_client(own)
                .map_or(false, |client| client.web.len() >= client.want);
            if full {
                debug!(client = %own, "peerings complete, closing");
                self.close_client(own);
            } else {
                self.match_and_initiate(own);
            }
        }
    }

    /// Forward a `request`/`response` payload verbatim. Only allowed
    /// while the exchange is pending on the sender's side and the
    /// target is live.
    fn forward(&mut self, sender: &str, target: &str, raw: String) {
        let allowed = self
            .registry
            .get_client(sender)
            .map_or(false, |client| client.ids.contains(target));
        let live = self
            .registry
            .get_client(target)
            .map_or(false, |client| client.active);
        if !allowed || !live {
            return;
        }

        if let Some(target_conn) = self.registry.get_client_mut(target) {
            target_conn.stamp = Some(Instant::now());
            let _ = target_conn.tx.send(Outbound::Frame(raw));
        }
        if let Some(sender_conn) = self.registry.get_client_mut(sender) {
            sender_conn.stamp = None;
        }
    }

    /// Broker: pick a waiting partner for `id`, or queue it.
    fn match_and_initiate(&mut self, id: &str) {
        let Some(client) = self.registry.get_client(id) else { return };
        let hash = client.hash.clone();

        // Eligible partners are waiting, are not us, and have no
        // pending or completed exchange with us in either direction.
        let pick = self.registry.waiting(&hash).and_then(|queue| {
            queue
                .iter()
                .find(|cand| {
                    cand.as_str() != id
                        && !client.ids.contains(*cand)
                        && !client.web.contains(*cand)
                        && self
                            .registry
                            .get_client(cand.as_str())
                            .map_or(false, |partner| {
                                !partner.ids.contains(id) && !partner.web.contains(id)
                            })
                })
                .cloned()
        });

        match pick {
            Some(partner) => {
                self.registry.waiting_for(&hash).remove(&partner);
                self.initiate(id, &partner);
            }
            None => {
                self.registry.waiting_for(&hash).insert(id.to_owned());
            }
        }
    }

    /// Record the pending peering on both sides and tell `a` to open
    /// an offer towards `b`.
    fn initiate(&mut self, a: &str, b: &str) {
        if let Some(partner) = self.registry.get_client_mut(b) {
            partner.ids.insert(a.to_owned());
        }
        if let Some(initiator) = self.registry.get_client_mut(a) {
            initiator.ids.insert(b.to_owned());
            initiator.stamp = Some(Instant::now());
            debug!(req = %a, res = %b, "initiating exchange");
            send_frame(
                &initiator.tx,
                &ClientBound::Init { req: a.to_owned(), res: b.to_owned() },
            );
        }
    }

    fn on_signal_closed(&mut self, id: &str, seq: u64) {
        let matches = self.registry.get_client(id).map_or(false, |c| c.seq == seq);
        if !matches {
            return;
        }
        if let Some(mut client) = self.registry.remove_client(id) {
            client.active = false;
            debug!(client = %id, "client disconnected");
            self.teardown_client(client);
        }
    }

    /// Server-initiated close: queue a close frame, then tear down.
    fn close_client(&mut self, id: &str) {
        if let Some(mut client) = self.registry.remove_client(id) {
            client.active = false;
            let _ = client.tx.send(Outbound::Close);
            self.teardown_client(client);
        }
    }

    /// Interrupt pending partners and put them back in the pool,
    /// keyed by their own hash.
    fn teardown_client(&mut self, client: ClientConn) {
        self.registry.waiting_for(&client.hash).remove(&client.id);

        for partner_id in &client.ids {
            let requeue = match self.registry.get_client_mut(partner_id) {
                Some(partner) => {
                    partner.ids.remove(&client.id);
                    send_frame(&partner.tx, &ClientBound::Interrupt { id: client.id.clone() });
                    (partner.active && partner.web.len() < partner.want)
                        .then(|| partner.hash.clone())
                }
                None => None,
            };
            if let Some(hash) = requeue {
                self.registry.waiting_for(&hash).insert(partner_id.clone());
            }
        }
    }

    // ------------------------------------------------------------------
    // Relay dial policy
    // ------------------------------------------------------------------

    fn on_peer_found(&mut self, host: &str, port: u16, digest: String) {
        if !self.digests.contains(&digest) {
            return;
        }
        let addr = format!("{}:{}", host, port);
        let pid = sha1_hex(addr.as_bytes());
        if addr == self.identity.address || pid == self.identity.id {
            return;
        }
        if !self.backoff.should_try(&pid) {
            return;
        }

        // An open link to this peer already exists: widen it to this
        // digest instead of dialing a second socket.
        if self.registry.get_server(&pid).is_some() {
            let missing = self
                .registry
                .get_server(&pid)
                .map_or(false, |conn| !conn.relays.contains(&digest));
            if missing {
                if let Some(conn) = self.registry.get_server_mut(&pid) {
                    conn.relays.push(digest.clone());
                    send_frame(&conn.tx, &PeerBound::Add { relay: digest.clone(), reply: true });
                }
                self.registry.attach_relay(&digest, &pid);
            }
            return;
        }

        let cap = self.limits.server_connections;
        if cap > 0 && self.registry.member_count(&digest) >= cap {
            return;
        }

        // Register before the dial resolves so racing notifications
        // for the same peer cannot open a second socket.
        let (tx, dial_rx) = mpsc::unbounded_channel();
        let seq = self.next_seq();
        let mut conn = RelayConn::new(pid.clone(), seq, false, digest.clone(), tx);
        conn.address = addr.clone();
        if self.registry.add_server(conn).is_err() {
            return;
        }

        let url = format!("ws://{}/relay?hash={}&id={}", addr, digest, self.identity.id);
        debug!(peer = %pid, url = %url, "dialing relay peer");
        crate::transport::spawn_dial(url, pid, seq, dial_rx, self.commands.clone());
    }

    fn on_dial_opened(&mut self, id: &str, seq: u64) {
        let digest = self
            .registry
            .get_server(id)
            .filter(|conn| conn.seq == seq)
            .map(|conn| conn.opened_for.clone());
        if let Some(digest) = digest {
            self.backoff.clear(id);
            let frame = self.session_frame(&digest);
            if let Some(conn) = self.registry.get_server(id) {
                info!(peer = %id, digest = %digest, "relay peer opened");
                send_frame(&conn.tx, &frame);
            }
        }
    }

    fn on_dial_failed(&mut self, id: &str, seq: u64) {
        let matches = self
            .registry
            .get_server(id)
            .map_or(false, |conn| conn.seq == seq && !conn.server);
        if !matches {
            return;
        }
        self.backoff.record_failure(id);
        if let Some(conn) = self.registry.remove_server(id) {
            warn!(peer = %id, addr = %conn.address, "relay dial failed");
            let _ = self.events.send(RelayEvent::DialFailed { address: conn.address });
        }
    }

    // ------------------------------------------------------------------
    // Relay-peer state machine (/relay)
    // ------------------------------------------------------------------

    fn on_relay_accept(
        &mut self,
        hash: String,
        id: String,
        tx: FrameSender,
    ) -> Result<u64, &'static str> {
        if !self.digests.contains(&hash) {
            return Err("hash is not supported");
        }
        if id == self.identity.id || self.registry.get_server(&id).is_some() {
            return Err("id is not available");
        }
        let cap = self.limits.server_connections;
        if cap > 0 && self.registry.member_count(&hash) >= cap {
            return Err("relay is at capacity");
        }

        let seq = self.next_seq();
        let conn = RelayConn::new(id.clone(), seq, true, hash.clone(), tx);
        send_frame(&conn.tx, &self.session_frame(&hash));
        self.registry.add_server(conn)?;
        debug!(peer = %id, digest = %hash, "relay peer accepted");
        Ok(seq)
    }

    fn session_frame(&self, digest: &str) -> PeerBound {
        PeerBound::Session {
            id: self.identity.id.clone(),
            address: self.identity.address.clone(),
            web: self.identity.web.clone(),
            host: self.identity.host.clone(),
            port: self.identity.port,
            domain: self.identity.domain.clone(),
            relay: digest.to_owned(),
        }
    }

    fn on_relay_frame(&mut self, id: &str, seq: u64, text: &str) {
        let Some(conn) = self.registry.get_server(id) else { return };
        if conn.seq != seq {
            return;
        }
        if self.dev {
            trace!(peer = %id, frame = %text, "relay frame");
        }

        match serde_json::from_str::<PeerMessage>(text) {
            Err(err) => {
                warn!(peer = %id, error = %err, "unparseable relay frame");
                self.close_server(id);
            }
            Ok(PeerMessage::Session { id: session_id, relay, address, web, host, port, domain }) => {
                self.on_session(id, session_id, relay, address, web, host, port, domain);
            }
            Ok(PeerMessage::Add { relay }) => self.on_add(id, &relay),
            Ok(PeerMessage::Sub { relay }) => self.on_sub(id, &relay),
            Ok(PeerMessage::Ping) => {
                if let Some(conn) = self.registry.get_server(id) {
                    send_frame(&conn.tx, &PeerBound::Pong);
                }
            }
            Ok(PeerMessage::Pong) => {
                if let Some(conn) = self.registry.get_server_mut(id) {
                    conn.active = true;
                }
            }
            Ok(PeerMessage::On) => self.set_session(id, true),
            Ok(PeerMessage::Off) => self.set_session(id, false),
            Ok(PeerMessage::Unknown) => {}
        }
    }

    /// Handshake. A peer claiming an id that is one of our digests, or
    /// an id its own address does not hash to, or a digest this link
    /// was not opened for, is closed on the spot. Retransmits are
    /// idempotent.
    #[allow(clippy::too_many_arguments)]
    fn on_session(
        &mut self,
        peer: &str,
        session_id: String,
        relay: String,
        address: String,
        web: String,
        host: String,
        port: u16,
        domain: Option<String>,
    ) {
        let Some(expected) = self.registry.get_server(peer).map(|c| c.opened_for.clone()) else {
            return;
        };
        let spoofed = self.digests.contains(&session_id)
            || relay != expected
            || sha1_hex(address.as_bytes()) != session_id;
        if spoofed {
            warn!(peer = %peer, claimed = %session_id, "session rejected");
            self.close_server(peer);
            return;
        }

        if let Some(conn) = self.registry.get_server_mut(peer) {
            if !conn.relays.contains(&relay) {
                conn.relays.push(relay.clone());
            }
            conn.address = address;
            conn.web = web;
            conn.host = host;
            conn.port = port;
            conn.domain = domain;
            conn.session = true;
            info!(
                peer = %peer,
                digest = %relay,
                web = %conn.web,
                host = %conn.host,
                port = conn.port,
                domain = ?conn.domain,
                "session established"
            );
        }
        self.registry.attach_relay(&relay, peer);
        let _ = self.events.send(RelayEvent::PeerConnected { id: peer.to_owned() });
    }

    fn on_add(&mut self, peer: &str, digest: &str) {
        if !self.digests.contains(digest) {
            return;
        }
        match self.registry.get_server_mut(peer) {
            Some(conn) => {
                if !conn.relays.iter().any(|d| d == digest) {
                    conn.relays.push(digest.to_owned());
                }
            }
            None => return,
        }
        self.registry.attach_relay(digest, peer);
    }

    fn on_sub(&mut self, peer: &str, digest: &str) {
        self.registry.detach_relay(digest, peer);
        let empty = match self.registry.get_server_mut(peer) {
            Some(conn) => {
                conn.relays.retain(|d| d != digest);
                conn.relays.is_empty()
            }
            None => return,
        };
        if empty {
            debug!(peer = %peer, "no shared digests left, closing");
            self.close_server(peer);
        }
    }

    fn set_session(&mut self, peer: &str, up: bool) {
        if let Some(conn) = self.registry.get_server_mut(peer) {
            conn.session = up;
        }
    }

    fn on_relay_closed(&mut self, id: &str, seq: u64, error: bool) {
        let matches = self.registry.get_server(id).map_or(false, |conn| conn.seq == seq);
        if !matches {
            return;
        }
        if let Some(conn) = self.registry.remove_server(id) {
            if error && !conn.server {
                self.backoff.record_failure(id);
            }
            debug!(peer = %id, error, "relay peer closed");
            let _ = self.events.send(RelayEvent::PeerDisconnected { id: id.to_owned() });
        }
    }

    fn close_server(&mut self, id: &str) {
        if let Some(conn) = self.registry.remove_server(id) {
            let _ = conn.tx.send(Outbound::Close);
            let _ = self.events.send(RelayEvent::PeerDisconnected { id: id.to_owned() });
        }
    }

    // ------------------------------------------------------------------
    // Health sweep
    // ------------------------------------------------------------------

    fn on_sweep(&mut self) {
        for id in self.registry.server_ids() {
            let responsive = self.registry.get_server(&id).map_or(false, |conn| conn.active);
            if !responsive {
                debug!(peer = %id, "unresponsive, terminating");
                self.close_server(&id);
            } else if let Some(conn) = self.registry.get_server_mut(&id) {
                conn.active = false;
                send_frame(&conn.tx, &PeerBound::Ping);
            }
        }

        for id in self.registry.client_ids() {
            let stalled = self
                .registry
                .get_client(&id)
                .and_then(|client| client.stamp)
                .map_or(false, |stamp| stamp.elapsed() >= CLIENT_STALL_TIMEOUT);
            if stalled {
                debug!(client = %id, "stalled mid-exchange, closing");
                self.close_client(&id);
            }
        }
    }

    // ------------------------------------------------------------------
    // HTTP close hand-off
    // ------------------------------------------------------------------

    fn on_http_closed(&mut self) {
        info!(clients = self.registry.client_count(), "http closed, handing off clients");

        for id in self.registry.client_ids() {
            let target = self
                .registry
                .get_client(&id)
                .map(|client| self.random_relay(&client.hash));
            if let Some(relay) = target {
                if let Some(client) = self.registry.get_client(&id) {
                    send_frame(&client.tx, &ClientBound::Relay { relay });
                }
                self.close_client(&id);
            }
        }

        for id in self.registry.server_ids() {
            if let Some(conn) = self.registry.get_server(&id) {
                send_frame(&conn.tx, &PeerBound::Off);
            }
        }

        // Force quick rediscovery once the listener returns.
        self.backoff.clear_all();
    }

    fn on_http_reopened(&mut self) {
        info!("http reopened, marking mesh up");
        for id in self.registry.server_ids() {
            if let Some(conn) = self.registry.get_server(&id) {
                send_frame(&conn.tx, &PeerBound::On);
            }
        }
    }

    /// Public address of a random sessioned mesh member for the swarm,
    /// or `None` when the mesh has nothing to offer.
    fn random_relay(&self, hash: &str) -> Option<String> {
        let digest = self.subscribed.get(hash)?;
        let mut rng = rand::thread_rng();
        self.registry
            .relays_for(digest)
            .into_iter()
            .filter(|conn| conn.session && !conn.web.is_empty())
            .choose(&mut rng)
            .map(|conn| conn.web.clone())
    }

    fn snapshot(&self) -> Snapshot {
        let mut mesh = HashMap::new();
        let mut sessions = HashMap::new();
        for (digest, members) in self.registry.membership() {
            mesh.insert(digest.clone(), members.len());
            let live = members
                .iter()
                .filter(|id| self.registry.get_server(id.as_str()).map_or(false, |c| c.session))
                .count();
            sessions.insert(digest.clone(), live);
        }

        Snapshot {
            clients: self.registry.client_count(),
            peers: self.registry.server_count(),
            mesh,
            sessions,
            waiting: self
                .registry
                .offers()
                .map(|(hash, queue)| (hash.clone(), queue.len()))
                .collect(),
        }
    }
}
