//! # Node Identity and Mesh Digests
//!
//! Every relay node derives its identity from its public `host:port`
//! address: the node id is the lowercase-hex SHA-1 of that string.
//! Info-hashes are likewise keyed into the mesh by their SHA-1 hex
//! digest, so node ids and swarm keys share one digest space.
//!
//! [`NodeIdentity`] is computed once at construction and immutable for
//! the process lifetime.

use sha1::{Digest, Sha1};

/// Lowercase-hex SHA-1 of arbitrary bytes.
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Digest of an info-hash string, as used for mesh membership keys and
/// DHT announces.
pub fn info_hash_digest(info_hash: &str) -> String {
    sha1_hex(info_hash.as_bytes())
}

/// A relay node's identity, derived from its configured address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    /// `host:port`, the canonical address the id is derived from.
    pub address: String,
    /// Public address handed to clients during hand-off:
    /// `(domain or host):port`.
    pub web: String,
    /// Lowercase-hex SHA-1 of `address`.
    pub id: String,
    pub host: String,
    pub port: u16,
    pub domain: Option<String>,
}

impl NodeIdentity {
    pub fn new(host: &str, port: u16, domain: Option<&str>) -> Self {
        let address = format!("{}:{}", host, port);
        let web = format!("{}:{}", domain.unwrap_or(host), port);
        let id = sha1_hex(address.as_bytes());

        Self {
            address,
            web,
            id,
            host: host.to_owned(),
            port,
            domain: domain.map(str::to_owned),
        }
    }
}
