//! Relay node configuration.

/// Hard numeric caps on connection counts. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default)]
pub struct Limits {
    /// Per-info-hash cap on relay peers in the mesh.
    pub server_connections: usize,
    /// Soft cap on client sessions; crossing it triggers the graceful
    /// HTTP close flow with hand-off.
    pub client_connections: usize,
}

/// Options recognized by [`Relay`](crate::Relay).
///
/// `host` and `hashes` carry no defaults and are validated at node
/// creation; everything else falls back to the values produced by
/// [`RelayConfig::new`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Public bind host; half of the identity address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Listen interface for the socket.
    pub server: String,
    /// Public hostname substituted for `host` in the hand-off address.
    pub domain: Option<String>,
    /// Info-hashes to subscribe. Opaque strings, no format validation
    /// beyond non-empty.
    pub hashes: Vec<String>,
    pub limit: Limits,
    /// Auto-start on construction.
    pub init: bool,
    /// Also run the DHT listener and announce every subscribed digest.
    pub relay: bool,
    /// Per-frame trace logging.
    pub dev: bool,
}

pub const DEFAULT_PORT: u16 = 10509;

impl RelayConfig {
    pub fn new(host: &str, hashes: Vec<String>) -> Self {
        Self {
            host: host.to_owned(),
            port: DEFAULT_PORT,
            server: "0.0.0.0".to_owned(),
            domain: None,
            hashes,
            limit: Limits::default(),
            init: true,
            relay: false,
            dev: false,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), &'static str> {
        if self.host.is_empty() {
            return Err("host is required");
        }
        if self.hashes.is_empty() {
            return Err("at least one info-hash is required");
        }
        if self.hashes.iter().any(|h| h.is_empty()) {
            return Err("info-hashes must be non-empty");
        }
        Ok(())
    }
}
