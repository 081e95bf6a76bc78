//! Shared test utilities: the in-process simulated transport and the
//! ring-invariant assertions.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use torus_net::{NetError, PeerRpc, RingState, ServerHandle, Transport};
use torus_types::{KeyRange, Peer};

use crate::config::NodeConfig;
use crate::node::Node;

/// Fast intervals so scenarios converge in milliseconds.
pub const TEST_STABILIZE: Duration = Duration::from_millis(50);
pub const TEST_JOIN_RETRY: Duration = Duration::from_millis(25);

/// Opt-in log output: `RUST_LOG=torus_node=debug cargo test -- --nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

// ---------------------------------------------------------------------------
// Simulated transport
// ---------------------------------------------------------------------------

/// An in-process network: a shared map from advertised address to the
/// registered RPC handler.
///
/// Every call resolves the handler at call time, so a stopped node
/// (deregistered on shutdown) fails exactly like a dead peer — no
/// sockets, no timing dependence on the OS.
#[derive(Clone, Default)]
pub struct SimNet {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn PeerRpc>>>>,
}

impl SimNet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The transport for a node advertising `addr` on this network.
    pub fn transport(&self, addr: &str) -> Arc<SimTransport> {
        Arc::new(SimTransport {
            net: self.clone(),
            addr: addr.to_string(),
        })
    }

    fn handler(&self, addr: &str) -> Result<Arc<dyn PeerRpc>, NetError> {
        self.handlers
            .read()
            .unwrap()
            .get(addr)
            .cloned()
            .ok_or_else(|| NetError::Connect(format!("no listener at {addr}")))
    }
}

pub struct SimTransport {
    net: SimNet,
    addr: String,
}

#[async_trait::async_trait]
impl Transport for SimTransport {
    async fn serve(&self, handler: Arc<dyn PeerRpc>) -> Result<Box<dyn ServerHandle>, NetError> {
        self.net
            .handlers
            .write()
            .unwrap()
            .insert(self.addr.clone(), handler);
        Ok(Box::new(SimServerHandle {
            net: self.net.clone(),
            addr: self.addr.clone(),
        }))
    }

    async fn connect(&self, addr: &str) -> Result<Arc<dyn PeerRpc>, NetError> {
        Ok(Arc::new(SimClient {
            net: self.net.clone(),
            addr: addr.to_string(),
        }))
    }
}

struct SimServerHandle {
    net: SimNet,
    addr: String,
}

impl ServerHandle for SimServerHandle {
    fn local_addr(&self) -> String {
        self.addr.clone()
    }

    fn shutdown(&self) {
        self.net.handlers.write().unwrap().remove(&self.addr);
    }
}

/// Client for one simulated address; resolves the callee per call.
struct SimClient {
    net: SimNet,
    addr: String,
}

#[async_trait::async_trait]
impl PeerRpc for SimClient {
    async fn find_successor(&self, id: u64) -> Result<Peer, NetError> {
        self.net.handler(&self.addr)?.find_successor(id).await
    }

    async fn get_ring(&self) -> Result<RingState, NetError> {
        self.net.handler(&self.addr)?.get_ring().await
    }

    async fn notify(&self, peer: Peer) -> Result<(), NetError> {
        self.net.handler(&self.addr)?.notify(peer).await
    }
}

// ---------------------------------------------------------------------------
// Node builders
// ---------------------------------------------------------------------------

/// A config with fast intervals, advertising the node's name as its
/// address on the simulated network.
pub fn test_config(name: &str) -> NodeConfig {
    NodeConfig {
        name: name.to_string(),
        adv_addr: name.to_string(),
        stabilize_interval: TEST_STABILIZE,
        join_retry_interval: TEST_JOIN_RETRY,
        ..NodeConfig::default()
    }
}

/// Build and start a node on the simulated network.
pub async fn start_node(net: &SimNet, name: &str) -> Node {
    let node = Node::with_transport(test_config(name), net.transport(name)).unwrap();
    node.start().await.unwrap();
    node
}

// ---------------------------------------------------------------------------
// Convergence assertions
// ---------------------------------------------------------------------------

/// Poll `condition` until it holds or `deadline` passes.
pub async fn wait_for<F: Fn() -> bool>(what: &str, deadline: Duration, condition: F) {
    let start = tokio::time::Instant::now();
    loop {
        if condition() {
            return;
        }
        if start.elapsed() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Ring closure, link symmetry, and arc coverage in one check: sorted
/// by id, every node's immediate successor, predecessor, and owned arc
/// must match its ring neighbors exactly.
pub fn ring_converged(nodes: &[&Node]) -> bool {
    if nodes.is_empty() {
        return false;
    }
    let mut sorted: Vec<&Node> = nodes.to_vec();
    sorted.sort_by_key(|n| n.id());
    let n = sorted.len();

    sorted.iter().enumerate().all(|(i, node)| {
        let next = sorted[(i + 1) % n];
        let prev = sorted[(i + n - 1) % n];
        node.successors().first().map(|s| s.id) == Some(next.id())
            && node.predecessor().map(|p| p.id) == Some(prev.id())
            && node.range() == KeyRange::new(prev.id(), node.id())
    })
}

/// Panic with a readable dump when the ring has not converged.
pub fn assert_ring(nodes: &[&Node]) {
    if ring_converged(nodes) {
        return;
    }
    let dump: Vec<String> = nodes
        .iter()
        .map(|n| {
            format!(
                "{}: successor={:?} predecessor={:?} range={}",
                n.name(),
                n.successors().first().map(|s| s.name.clone()),
                n.predecessor().map(|p| p.name),
                n.range(),
            )
        })
        .collect();
    panic!("ring has not converged:\n{}", dump.join("\n"));
}
