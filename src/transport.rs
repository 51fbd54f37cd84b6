//! HTTP and WebSocket plumbing.
//!
//! One listener serves three things on the same port: the plain-text
//! front page, the `/signal` client endpoint, and the `/relay` mesh
//! endpoint. Outbound mesh links are dialed with tungstenite. Either
//! way the socket ends up owned by a pump task that drains the
//! connection's outbound queue and feeds inbound text frames to the
//! actor, reporting the close exactly once.

use std::collections::HashMap;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as DialMessage;
use tracing::debug;

use crate::messages::{ClientBound, FrameReceiver, Outbound};
use crate::server::Command;

const INDEX_BODY: &str = "thanks for testing bittorrent-relay";
const BAD_ROUTE: &str = "invalid method or path";

/// Shared state for the axum handlers: the way into the actor.
#[derive(Clone)]
pub(crate) struct Gateway {
    pub commands: mpsc::Sender<Command>,
}

pub(crate) fn router(gateway: Gateway) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/signal", get(signal_ws))
        .route("/relay", get(relay_ws))
        .fallback(fallback)
        // A wrong method on a known route answers the same 400 as an
        // unknown path.
        .method_not_allowed_fallback(fallback)
        .with_state(gateway)
}

async fn index() -> impl IntoResponse {
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], INDEX_BODY)
}

/// Plain HTTP with any other method or path is a 400; a WebSocket
/// upgrade on an unknown route gets told off in-band and closed.
async fn fallback(req: Request) -> Response {
    let (mut parts, _body) = req.into_parts();
    match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade.on_upgrade(|mut socket| async move {
            let frame = serde_json::to_string(&ClientBound::Error {
                error: "route is not supported".to_owned(),
            });
            if let Ok(frame) = frame {
                let _ = socket.send(WsMessage::Text(frame.into())).await;
            }
            let _ = socket.send(WsMessage::Close(None)).await;
        }),
        Err(_) => (StatusCode::BAD_REQUEST, Json(BAD_ROUTE)).into_response(),
    }
}

async fn signal_ws(
    State(gateway): State<Gateway>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| client_session(gateway, params, socket))
}

async fn relay_ws(
    State(gateway): State<Gateway>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| relay_session(gateway, params, socket))
}

/// Answer a protocol violation and close, per the accept rules.
async fn refuse(mut socket: WebSocket, error: &str) {
    let frame = serde_json::to_string(&ClientBound::Error { error: error.to_owned() });
    if let Ok(frame) = frame {
        let _ = socket.send(WsMessage::Text(frame.into())).await;
    }
    let _ = socket.send(WsMessage::Close(None)).await;
}

async fn client_session(gateway: Gateway, params: HashMap<String, String>, socket: WebSocket) {
    let (hash, id) = match (params.get("hash"), params.get("id")) {
        (Some(hash), Some(id)) => (hash.clone(), id.clone()),
        _ => return refuse(socket, "hash and id are required").await,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = oneshot::channel();
    let open = Command::SignalOpen {
        hash,
        id: id.clone(),
        want: params.get("want").cloned(),
        tx,
        reply: reply_tx,
    };
    if gateway.commands.send(open).await.is_err() {
        return;
    }

    match reply_rx.await {
        Ok(Ok(seq)) => pump_accepted(socket, rx, gateway.commands, Endpoint::Signal, id, seq).await,
        Ok(Err(reason)) => refuse(socket, reason).await,
        Err(_) => {}
    }
}

async fn relay_session(gateway: Gateway, params: HashMap<String, String>, socket: WebSocket) {
    let (hash, id) = match (params.get("hash"), params.get("id")) {
        (Some(hash), Some(id)) => (hash.clone(), id.clone()),
        _ => return refuse(socket, "hash and id are required").await,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = oneshot::channel();
    let open = Command::RelayAccept { hash, id: id.clone(), tx, reply: reply_tx };
    if gateway.commands.send(open).await.is_err() {
        return;
    }

    match reply_rx.await {
        Ok(Ok(seq)) => pump_accepted(socket, rx, gateway.commands, Endpoint::Relay, id, seq).await,
        Ok(Err(reason)) => refuse(socket, reason).await,
        Err(_) => {}
    }
}

#[derive(Clone, Copy)]
enum Endpoint {
    Signal,
    Relay,
}

/// Own an accepted socket until either side is done with it.
async fn pump_accepted(
    mut socket: WebSocket,
    mut rx: FrameReceiver,
    commands: mpsc::Sender<Command>,
    endpoint: Endpoint,
    id: String,
    seq: u64,
) {
    let mut error = false;
    loop {
        tokio::select! {
            queued = rx.recv() => match queued {
                Some(Outbound::Frame(text)) => {
                    if socket.send(WsMessage::Text(text.into())).await.is_err() {
                        error = true;
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = socket.send(WsMessage::Close(None)).await;
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    let text = text.as_str().to_owned();
                    let frame = match endpoint {
                        Endpoint::Signal => Command::SignalFrame { id: id.clone(), seq, text },
                        Endpoint::Relay => Command::RelayFrame { id: id.clone(), seq, text },
                    };
                    if commands.send(frame).await.is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => {
                    error = true;
                    break;
                }
            },
        }
    }

    let closed = match endpoint {
        Endpoint::Signal => Command::SignalClosed { id, seq },
        Endpoint::Relay => Command::RelayClosed { id, seq, error },
    };
    let _ = commands.send(closed).await;
}

/// Dial a sibling relay and run the mesh link. The connection is
/// already registered under `(id, seq)`; success and failure both
/// report back so the actor can finish or unwind the registration.
pub(crate) fn spawn_dial(
    url: String,
    id: String,
    seq: u64,
    mut rx: FrameReceiver,
    commands: mpsc::Sender<Command>,
) {
    tokio::spawn(async move {
        let mut socket = match connect_async(url.as_str()).await {
            Ok((socket, _response)) => socket,
            Err(err) => {
                debug!(url = %url, error = %err, "dial failed");
                let _ = commands.send(Command::DialFailed { id, seq }).await;
                return;
            }
        };
        if commands.send(Command::DialOpened { id: id.clone(), seq }).await.is_err() {
            return;
        }

        let mut error = false;
        loop {
            tokio::select! {
                queued = rx.recv() => match queued {
                    Some(Outbound::Frame(text)) => {
                        if socket.send(DialMessage::Text(text)).await.is_err() {
                            error = true;
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = socket.send(DialMessage::Close(None)).await;
                        break;
                    }
                },
                incoming = socket.next() => match incoming {
                    Some(Ok(DialMessage::Text(text))) => {
                        let frame = Command::RelayFrame { id: id.clone(), seq, text };
                        if commands.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(DialMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => {
                        error = true;
                        break;
                    }
                },
            }
        }

        let _ = commands.send(Command::RelayClosed { id, seq, error }).await;
    });
}
