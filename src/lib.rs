mod backoff;
mod config;
mod dht;
mod identity;
mod messages;
mod node;
mod registry;
mod server;
mod transport;

pub use config::{Limits, RelayConfig};
pub use dht::{Dht, DhtPeer};
pub use identity::{info_hash_digest, sha1_hex, NodeIdentity};
pub use node::{Relay, RelayEvent};
pub use server::Snapshot;
