//! Wire frames for the two WebSocket endpoints.
//!
//! Every frame is a UTF-8 JSON object keyed by `action`. Unknown
//! actions decode to the `Unknown` variant and are ignored by the
//! handlers; payloads that fail to decode at all close the socket.
//!
//! `request`/`response` payloads carry opaque WebRTC blobs alongside
//! the routing fields, so the server forwards the original raw text
//! rather than re-encoding a typed value.

use serde::{Deserialize, Serialize};

/// Frame queued for a connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    Frame(String),
    /// Send a close frame and tear the connection down.
    Close,
}

pub type FrameSender = tokio::sync::mpsc::UnboundedSender<Outbound>;
pub type FrameReceiver = tokio::sync::mpsc::UnboundedReceiver<Outbound>;

/// Ingress frames on a `/signal` session.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Both sides of a brokered exchange confirm the peering worked.
    Proc { req: String, res: String },
    /// WebRTC offer payload, forwarded to the `res` client.
    Request { req: String, res: String },
    /// WebRTC answer payload, forwarded back to the `req` client.
    Response { req: String, res: String },
    #[serde(other)]
    Unknown,
}

/// Ingress frames on a `/relay` mesh link.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum PeerMessage {
    /// Handshake carrying the remote node's identity.
    Session {
        id: String,
        relay: String,
        address: String,
        web: String,
        host: String,
        port: u16,
        domain: Option<String>,
    },
    /// The remote joins one more shared digest over this link.
    Add { relay: String },
    /// Inverse of `Add`; an empty shared set closes the link.
    Sub { relay: String },
    Ping,
    Pong,
    /// Remote HTTP listener came back up.
    On,
    /// Remote HTTP listener went down.
    Off,
    #[serde(other)]
    Unknown,
}

/// Egress frames the relay sends to clients.
#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientBound {
    /// Start an offer towards `res`.
    Init { req: String, res: String },
    /// A pending partner disconnected mid-exchange.
    Interrupt { id: String },
    /// Hand-off before this relay closes; `relay` is another relay's
    /// public address, or null when the mesh has none to offer.
    Relay { relay: Option<String> },
    Error { error: String },
}

/// Egress frames the relay sends to mesh peers.
#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum PeerBound {
    Session {
        id: String,
        address: String,
        web: String,
        host: String,
        port: u16,
        domain: Option<String>,
        relay: String,
    },
    Add { relay: String, reply: bool },
    Ping,
    Pong,
    On,
    Off,
}
