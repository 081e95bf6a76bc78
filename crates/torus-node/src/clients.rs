//! Per-address client cache with a loopback short-circuit.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use tokio::sync::Mutex;

use torus_net::{NetError, PeerRpc, Transport};

/// Memoizes one client per peer address.
///
/// Calls to the node's own advertised address dispatch straight into
/// the local RPC handler — no wire round-trip, and a singleton ring
/// stays correct before anything else is reachable. The handler is
/// held weakly so the cache cannot keep a stopped node alive.
///
/// Entries are never evicted; a dead peer's client surfaces the error
/// on use.
pub(crate) struct ClientCache {
    transport: Arc<dyn Transport>,
    local_addr: String,
    loopback: OnceLock<Weak<dyn PeerRpc>>,
    /// Held across the connect so concurrent callers cannot race each
    /// other into duplicate clients for one address.
    clients: Mutex<HashMap<String, Arc<dyn PeerRpc>>>,
}

impl ClientCache {
    pub fn new(transport: Arc<dyn Transport>, local_addr: String) -> Self {
        Self {
            transport,
            local_addr,
            loopback: OnceLock::new(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Install the local handler for the loopback short-circuit.
    /// Called once, when the node starts serving.
    pub fn install_loopback(&self, handler: Weak<dyn PeerRpc>) {
        let _ = self.loopback.set(handler);
    }

    /// The client for `addr`, connecting on first use.
    pub async fn get(&self, addr: &str) -> Result<Arc<dyn PeerRpc>, NetError> {
        if addr == self.local_addr {
            return self
                .loopback
                .get()
                .and_then(Weak::upgrade)
                .ok_or(NetError::Closed);
        }

        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(addr) {
            return Ok(client.clone());
        }

        let client = self.transport.connect(addr).await?;
        clients.insert(addr.to_string(), client.clone());
        Ok(client)
    }
}
