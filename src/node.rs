//! Public relay node facade.
//!
//! [`Relay`] wires the pieces together: it spawns the server actor,
//! then a lifecycle supervisor that owns the HTTP listener, the health
//! sweep timer, and the DHT subscription. The supervisor is the only
//! place that opens or closes the listener, so the graceful-close
//! hand-off and the scheduled restart cannot race each other.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration};
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::dht::{spawn_peer_pump, Dht};
use crate::identity::{info_hash_digest, NodeIdentity};
use crate::server::{Command, LifecycleRequest, ServerActor, Snapshot, SWEEP_INTERVAL};
use crate::transport::{router, Gateway};

/// How long after an unexpected HTTP close the listener is reopened.
const RESTART_DELAY: Duration = Duration::from_millis(300_000);

/// Observations surfaced to the embedding application.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    Listening { addr: SocketAddr },
    /// The HTTP listener went down and clients were handed off.
    Closed,
    Error { message: String },
    /// A mesh session handshake completed.
    PeerConnected { id: String },
    PeerDisconnected { id: String },
    DialFailed { address: String },
}

enum ControlMsg {
    Start { reply: oneshot::Sender<Result<SocketAddr, String>> },
    Stop { reply: oneshot::Sender<()> },
}

/// Supervisor-internal signals.
enum Internal {
    /// The serve task ended on its own, meaning the listener failed.
    ServeEnded { message: String },
    RestartDue,
}

/// A WebRTC signaling relay node.
///
/// Construction validates the configuration, spawns the actor and the
/// supervisor, and (unless `init` is disabled) starts listening
/// right away.
pub struct Relay {
    identity: NodeIdentity,
    commands: mpsc::Sender<Command>,
    control: mpsc::UnboundedSender<ControlMsg>,
    events: Mutex<Option<mpsc::UnboundedReceiver<RelayEvent>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    actor_handle: JoinHandle<()>,
    supervisor_handle: JoinHandle<()>,
}

impl Relay {
    pub async fn new(config: RelayConfig) -> Result<Self> {
        Self::create(config, None).await
    }

    /// Run with an injected DHT. The node owns it from here on and
    /// destroys it on `stop()`.
    pub async fn with_dht(config: RelayConfig, dht: Arc<dyn Dht>) -> Result<Self> {
        Self::create(config, Some(dht)).await
    }

    async fn create(config: RelayConfig, dht: Option<Arc<dyn Dht>>) -> Result<Self> {
        config
            .validate()
            .map_err(|reason| anyhow!(reason))
            .context("invalid relay configuration")?;

        let identity = NodeIdentity::new(&config.host, config.port, config.domain.as_deref());

        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (life_tx, life_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let actor = ServerActor::new(&config, identity.clone(), cmd_tx.clone(), life_tx, event_tx.clone());
        let actor_handle = tokio::spawn(actor.run(cmd_rx));

        let init = config.init;
        let supervisor = Supervisor {
            config,
            commands: cmd_tx.clone(),
            events: event_tx,
            internal: internal_tx,
            dht,
            serve: None,
            sweeper: None,
            dht_pump: None,
            dht_started: false,
            running: false,
            started: false,
            addr: None,
        };
        let supervisor_handle = tokio::spawn(supervisor.run(control_rx, life_rx, internal_rx));

        let relay = Self {
            identity,
            commands: cmd_tx,
            control: control_tx,
            events: Mutex::new(Some(event_rx)),
            local_addr: Mutex::new(None),
            actor_handle,
            supervisor_handle,
        };
        if init {
            relay.start().await?;
        }
        Ok(relay)
    }

    /// Bind the listener (and the DHT when configured) if not already up.
    pub async fn start(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control
            .send(ControlMsg::Start { reply: reply_tx })
            .map_err(|_| anyhow!("relay supervisor is gone"))?;
        let addr = reply_rx
            .await
            .context("relay supervisor dropped the start request")?
            .map_err(|message| anyhow!(message))
            .context("failed to start listener")?;
        *self.local_addr.lock().await = Some(addr);
        Ok(())
    }

    /// Graceful shutdown. Live clients are handed off to the mesh
    /// before their sockets close; an owned DHT is destroyed.
    pub async fn stop(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.control.send(ControlMsg::Stop { reply: reply_tx }).is_ok() {
            let _ = reply_rx.await;
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Take-once stream of node observations.
    pub async fn events(&self) -> Result<mpsc::UnboundedReceiver<RelayEvent>> {
        let mut guard = self.events.lock().await;
        guard.take().context("event receiver already taken")
    }

    /// Counters describing the live swarm state.
    pub async fn snapshot(&self) -> Snapshot {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Snapshot { reply: reply_tx })
            .await
            .is_err()
        {
            return Snapshot::default();
        }
        reply_rx.await.unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        !self.actor_handle.is_finished()
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.actor_handle.abort();
        self.supervisor_handle.abort();
    }
}


// ============================================================================
// Lifecycle supervisor
// ============================================================================

struct Supervisor {
    config: RelayConfig,
    commands: mpsc::Sender<Command>,
    events: mpsc::UnboundedSender<RelayEvent>,
    internal: mpsc::UnboundedSender<Internal>,
    dht: Option<Arc<dyn Dht>>,
    serve: Option<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
    dht_pump: Option<JoinHandle<()>>,
    dht_started: bool,
    /// HTTP listener currently bound.
    running: bool,
    /// `start()` seen and no `stop()` since; gates the restart timer.
    started: bool,
    addr: Option<SocketAddr>,
}

impl Supervisor {
    async fn run(
        mut self,
        mut control: mpsc::UnboundedReceiver<ControlMsg>,
        mut lifecycle: mpsc::UnboundedReceiver<LifecycleRequest>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                msg = control.recv() => match msg {
                    Some(ControlMsg::Start { reply }) => {
                        let _ = reply.send(self.start().await);
                    }
                    Some(ControlMsg::Stop { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                    }
                    None => break,
                },
                Some(request) = lifecycle.recv() => match request {
                    LifecycleRequest::CloseHttp => {
                        if self.running {
                            self.close_http(true).await;
                        }
                    }
                },
                Some(signal) = internal.recv() => match signal {
                    Internal::ServeEnded { message } => {
                        warn!(error = %message, "listener failed");
                        let _ = self.events.send(RelayEvent::Error { message });
                        if self.running {
                            self.close_http(true).await;
                        }
                    }
                    Internal::RestartDue => {
                        if self.started && !self.running {
                            match self.open_http().await {
                                Ok(_) => {
                                    let _ = self.commands.send(Command::HttpReopened).await;
                                }
                                Err(message) => {
                                    let _ = self.events.send(RelayEvent::Error { message });
                                    self.schedule_restart();
                                }
                            }
                        }
                    }
                },
            }
        }
    }

    async fn start(&mut self) -> Result<SocketAddr, String> {
        let addr = self.open_http().await?;

        if self.sweeper.is_none() {
            let commands = self.commands.clone();
            self.sweeper = Some(tokio::spawn(async move {
                let mut ticker = interval(SWEEP_INTERVAL);
                ticker.tick().await; // skip the immediate tick
                loop {
                    ticker.tick().await;
                    if commands.send(Command::Sweep).await.is_err() {
                        break;
                    }
                }
            }));
        }

        if self.config.relay {
            self.start_dht().await;
        }

        self.started = true;
        Ok(addr)
    }

    async fn open_http(&mut self) -> Result<SocketAddr, String> {
        if self.running {
            return self.addr.ok_or_else(|| "listener state lost".to_owned());
        }

        let bind = format!("{}:{}", self.config.server, self.config.port);
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|err| format!("bind {}: {}", bind, err))?;
        let addr = listener.local_addr().map_err(|err| err.to_string())?;

        let app = router(Gateway { commands: self.commands.clone() });
        let internal = self.internal.clone();
        self.serve = Some(tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                let _ = internal.send(Internal::ServeEnded { message: err.to_string() });
            }
        }));
        self.running = true;
        self.addr = Some(addr);
        info!(addr = %addr, "listening");
        let _ = self.events.send(RelayEvent::Listening { addr });
        Ok(addr)
    }

    /// Stop accepting, run the hand-off flow, optionally arm the
    /// restart timer. Mesh links stay up; only the listener dies.
    async fn close_http(&mut self, restart: bool) {
        if let Some(handle) = self.serve.take() {
            handle.abort();
        }
        self.running = false;
        let _ = self.commands.send(Command::HttpClosed).await;
        let _ = self.events.send(RelayEvent::Closed);
        if restart {
            self.schedule_restart();
        }
    }

    fn schedule_restart(&self) {
        let internal = self.internal.clone();
        tokio::spawn(async move {
            sleep(RESTART_DELAY).await;
            let _ = internal.send(Internal::RestartDue);
        });
    }

    async fn start_dht(&mut self) {
        let Some(dht) = self.dht.clone() else { return };
        if self.dht_started {
            return;
        }

        if let Err(err) = dht.listen(self.config.port, &self.config.host).await {
            warn!(error = %err, "dht listen failed");
            let _ = self.events.send(RelayEvent::Error { message: err.to_string() });
            return;
        }
        for hash in &self.config.hashes {
            let digest = info_hash_digest(hash);
            if let Err(err) = dht.announce(&digest).await {
                warn!(digest = %digest, error = %err, "dht announce failed");
            }
            if let Err(err) = dht.lookup(&digest).await {
                warn!(digest = %digest, error = %err, "dht lookup failed");
            }
        }
        if let Some(peers) = dht.peers().await {
            self.dht_pump = Some(spawn_peer_pump(peers, self.commands.clone()));
        }
        self.dht_started = true;
    }

    async fn shutdown(&mut self) {
        self.started = false;
        if self.running {
            self.close_http(false).await;
        }
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
        if let Some(handle) = self.dht_pump.take() {
            handle.abort();
        }
        if let Some(dht) = self.dht.take() {
            dht.destroy().await;
        }
        self.dht_started = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_configuration_is_rejected() {
        let config = RelayConfig::new("", vec!["h".to_owned()]);
        assert!(Relay::new(config).await.is_err());

        let config = RelayConfig::new("127.0.0.1", vec![]);
        assert!(Relay::new(config).await.is_err());
    }

    #[tokio::test]
    async fn deferred_init_does_not_bind() {
        let mut config = RelayConfig::new("127.0.0.1", vec!["h".to_owned()]);
        config.init = false;
        config.port = 1; // would fail to bind if attempted
        let relay = Relay::new(config).await.expect("construction failed");
        assert!(relay.local_addr().await.is_none());
        assert!(relay.is_running());
    }
}
