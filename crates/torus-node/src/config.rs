//! Configuration for a Torus node.

use std::sync::Arc;
use std::time::Duration;

use torus_net::TransportSecurity;
use torus_types::{HashFn, KeyRange};

use crate::error::NodeError;

/// Invoked with the node's new owned arc whenever it changes.
///
/// Fires under no lock, but from protocol tasks — it must not block,
/// or stabilization stalls.
pub type RangeCallback = Arc<dyn Fn(KeyRange) + Send + Sync>;

/// Configuration for [`Node::new`](crate::Node::new).
///
/// Only `name` and the addresses are required; everything else has
/// working defaults.
#[derive(Clone)]
pub struct NodeConfig {
    /// Node name; the node's ring position is `hash(name) mod 2^m`.
    /// Must be unique within the ring.
    pub name: String,

    /// Local listen address, `host:port`. Port 0 picks a free port.
    pub bind_addr: String,

    /// The address peers dial to reach this node. Must match what
    /// `bind_addr` actually serves.
    pub adv_addr: String,

    /// Arc-change notification to the host.
    pub on_range_change: Option<RangeCallback>,

    /// Key-to-identifier hash shared by all nodes of the ring.
    /// Defaults to SHA-256 truncated to 8 big-endian bytes.
    pub hash_fn: Option<HashFn>,

    /// Identifier width m in bits, 1..=64. All hashes are reduced
    /// mod 2^m. Fixed for the lifetime of the ring.
    pub hash_bits: u32,

    /// Successor-list length r; the ring survives r - 1 simultaneous
    /// failures on any arc.
    pub successor_count: usize,

    /// How often the background stabilization task ticks.
    pub stabilize_interval: Duration,

    /// How often `join` retries against the seed.
    pub join_retry_interval: Duration,

    /// TLS material for the QUIC endpoint. Defaults to an ephemeral
    /// self-signed identity; multi-host deployments provide shared
    /// certificates via [`TransportSecurity::from_parts`].
    pub security: Option<TransportSecurity>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            bind_addr: "127.0.0.1:0".to_string(),
            adv_addr: String::new(),
            on_range_change: None,
            hash_fn: None,
            hash_bits: 64,
            successor_count: 3,
            stabilize_interval: Duration::from_secs(3),
            join_retry_interval: Duration::from_secs(1),
            security: None,
        }
    }
}

impl NodeConfig {
    pub(crate) fn validate(&self) -> Result<(), NodeError> {
        if self.name.is_empty() {
            return Err(NodeError::Config("name must not be empty".into()));
        }
        if self.adv_addr.is_empty() {
            return Err(NodeError::Config("adv_addr must not be empty".into()));
        }
        if self.hash_bits == 0 || self.hash_bits > 64 {
            return Err(NodeError::Config(format!(
                "hash_bits must be in 1..=64, got {}",
                self.hash_bits
            )));
        }
        if self.successor_count == 0 {
            return Err(NodeError::Config("successor_count must be at least 1".into()));
        }
        Ok(())
    }
}
