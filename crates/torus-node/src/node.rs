//! [`Node`] — the host-facing handle and the RPC handler behind it.

use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use torus_net::{NetError, PeerRpc, QuicTransport, RingState, ServerHandle, Transport};
use torus_ring::RingView;
use torus_types::{HashFn, KeyRange, Peer, between, default_hash, truncate_id};

use crate::clients::ClientCache;
use crate::config::{NodeConfig, RangeCallback};
use crate::error::NodeError;

/// A handle to one Torus node.
///
/// Cheap to clone; all clones drive the same node. Construction does
/// not touch the network — `start` binds the listener, and `create` or
/// `join` puts the node in a ring.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

/// Lifecycle state: fresh → started → formed → stopped.
#[derive(Default)]
struct Lifecycle {
    started: bool,
    formed: bool,
    server: Option<Box<dyn ServerHandle>>,
    stabilizer: Option<tokio::task::JoinHandle<()>>,
}

pub(crate) struct NodeInner {
    pub(crate) local: Peer,
    hash_fn: HashFn,
    hash_bits: u32,
    pub(crate) stabilize_interval: Duration,
    join_retry_interval: Duration,
    /// The only shared mutable state. Held for short snapshot or
    /// commit spans only — never across an RPC, because the loopback
    /// dispatcher re-enters the handler on this same node.
    view: std::sync::RwLock<RingView>,
    pub(crate) clients: ClientCache,
    transport: Arc<dyn Transport>,
    on_range_change: Option<RangeCallback>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl Node {
    /// Create a node served over QUIC, per `config`. No sockets are
    /// opened until [`start`](Node::start).
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;

        let bind_addr = config
            .bind_addr
            .parse()
            .map_err(|_| NodeError::Config(format!("bind_addr {:?} does not parse", config.bind_addr)))?;
        let security = match &config.security {
            Some(security) => security.clone(),
            None => torus_net::TransportSecurity::self_signed()?,
        };
        let transport = Arc::new(QuicTransport::new(bind_addr, security));

        Self::build(config, transport)
    }

    /// Create a node on a custom transport. This is the seam the
    /// deterministic in-process transport plugs into in tests.
    pub fn with_transport(
        config: NodeConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        Self::build(config, transport)
    }

    fn build(config: NodeConfig, transport: Arc<dyn Transport>) -> Result<Self, NodeError> {
        let hash_fn: HashFn = config.hash_fn.unwrap_or_else(|| Arc::new(default_hash));
        let id = truncate_id(hash_fn(config.name.as_bytes()), config.hash_bits);
        let local = Peer::new(config.name, id, config.adv_addr);

        info!(node = %local, "node created");

        let view = RingView::new(local.clone(), config.hash_bits, config.successor_count);
        let clients = ClientCache::new(transport.clone(), local.address.clone());

        Ok(Self {
            inner: Arc::new(NodeInner {
                local,
                hash_fn,
                hash_bits: config.hash_bits,
                stabilize_interval: config.stabilize_interval,
                join_retry_interval: config.join_retry_interval,
                view: std::sync::RwLock::new(view),
                clients,
                transport,
                on_range_change: config.on_range_change,
                lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
            }),
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// The node's name.
    pub fn name(&self) -> &str {
        &self.inner.local.name
    }

    /// The node's position on the identifier circle.
    pub fn id(&self) -> u64 {
        self.inner.local.id
    }

    /// The address peers dial to reach this node.
    pub fn address(&self) -> &str {
        &self.inner.local.address
    }

    /// Snapshot of the current successor list.
    pub fn successors(&self) -> Vec<Peer> {
        self.inner.view_read().successors().to_vec()
    }

    /// The current predecessor, if known.
    pub fn predecessor(&self) -> Option<Peer> {
        self.inner.view_read().predecessor().cloned()
    }

    /// The arc of keys this node currently owns.
    pub fn range(&self) -> KeyRange {
        self.inner.view_read().range()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Bind the listener and start serving peer RPCs. The node answers
    /// nothing useful until `create` or `join` puts it in a ring.
    pub async fn start(&self) -> Result<(), NodeError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.started {
            return Err(NodeError::AlreadyStarted);
        }

        let handler: Arc<dyn PeerRpc> = self.inner.clone();
        let server = self.inner.transport.serve(handler.clone()).await?;
        self.inner.clients.install_loopback(Arc::downgrade(&handler));

        info!(
            bind = %server.local_addr(),
            address = %self.inner.local.address,
            "listener started"
        );

        lifecycle.server = Some(server);
        lifecycle.started = true;
        Ok(())
    }

    /// Stop the stabilization task and the listener. The node leaves
    /// the ring without notice; peers discover the absence through
    /// failed calls on their next tick. Safe on a never-started node.
    pub async fn stop(&self) -> Result<(), NodeError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if let Some(stabilizer) = lifecycle.stabilizer.take() {
            stabilizer.abort();
        }
        if let Some(server) = lifecycle.server.take() {
            server.shutdown();
        }
        if lifecycle.started {
            info!(node = %self.inner.local, "node stopped");
        }
        lifecycle.started = false;
        lifecycle.formed = false;
        Ok(())
    }

    /// Initialize a new singleton ring: this node owns every key.
    pub async fn create(&self) -> Result<(), NodeError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if !lifecycle.started {
            return Err(NodeError::NotStarted);
        }
        if lifecycle.formed {
            return Err(NodeError::AlreadyFormed);
        }

        info!(node = %self.inner.local, "creating new ring");
        let range = self.inner.view_write().form_singleton();

        lifecycle.stabilizer = Some(self.inner.spawn_stabilizer());
        lifecycle.formed = true;
        drop(lifecycle);

        self.inner.fire_range_change(Some(range));
        Ok(())
    }

    /// Join an existing ring through the peer at `seed_addr`.
    ///
    /// Retries until the handshake succeeds; cancel by dropping the
    /// future. The node becomes visible to the rest of the ring only
    /// once its new successor's next stabilization tick picks it up.
    pub async fn join(&self, seed_addr: &str) -> Result<(), NodeError> {
        {
            let lifecycle = self.inner.lifecycle.lock().await;
            if !lifecycle.started {
                return Err(NodeError::NotStarted);
            }
            if lifecycle.formed {
                return Err(NodeError::AlreadyFormed);
            }
        }

        info!(node = %self.inner.local, seed = seed_addr, "joining ring");
        let mut ticker = tokio::time::interval(self.inner.join_retry_interval);

        loop {
            ticker.tick().await;

            let Some((successor, successor_tail, predecessor)) =
                self.inner.join_attempt(seed_addr).await
            else {
                continue;
            };

            let mut lifecycle = self.inner.lifecycle.lock().await;
            if !lifecycle.started {
                return Err(NodeError::NotStarted);
            }
            if lifecycle.formed {
                return Err(NodeError::AlreadyFormed);
            }

            let range = self.inner.view_write().install_join(
                successor.clone(),
                &successor_tail,
                predecessor.clone(),
            );

            lifecycle.stabilizer = Some(self.inner.spawn_stabilizer());
            lifecycle.formed = true;
            drop(lifecycle);

            info!(
                node = %self.inner.local,
                successor = %successor,
                predecessor = %predecessor,
                "joined ring"
            );
            self.inner.fire_range_change(Some(range));
            return Ok(());
        }
    }

    /// The peer responsible for `key`, i.e. the live node whose arc
    /// contains `hash(key)`.
    pub async fn lookup(&self, key: &[u8]) -> Result<Peer, NodeError> {
        {
            let lifecycle = self.inner.lifecycle.lock().await;
            if !lifecycle.started {
                return Err(NodeError::NotStarted);
            }
            if !lifecycle.formed {
                return Err(NodeError::NotFormed);
            }
        }

        let id = truncate_id((self.inner.hash_fn)(key), self.inner.hash_bits);
        Ok(self.inner.resolve_successor(id).await?)
    }
}

impl NodeInner {
    pub(crate) fn view_read(&self) -> RwLockReadGuard<'_, RingView> {
        self.view.read().expect("ring view lock poisoned")
    }

    pub(crate) fn view_write(&self) -> RwLockWriteGuard<'_, RingView> {
        self.view.write().expect("ring view lock poisoned")
    }

    /// Announce the new owned arc to the host, outside every lock.
    pub(crate) fn fire_range_change(&self, range: Option<KeyRange>) {
        let Some(range) = range else { return };
        debug!(node = %self.local, %range, "owned range changed");
        if let Some(callback) = &self.on_range_change {
            callback(range);
        }
    }

    /// One join handshake: resolve our successor through the seed,
    /// fetch its ring, and validate it. `None` means retry.
    async fn join_attempt(&self, seed_addr: &str) -> Option<(Peer, Vec<Peer>, Peer)> {
        let seed = match self.clients.get(seed_addr).await {
            Ok(client) => client,
            Err(e) => {
                warn!(seed = seed_addr, %e, "cannot reach seed, retrying");
                return None;
            }
        };

        let successor = match seed.find_successor(self.local.id).await {
            Ok(peer) => peer,
            Err(e) => {
                warn!(seed = seed_addr, %e, "seed lookup failed, retrying");
                return None;
            }
        };
        if successor.id == self.local.id {
            // The seed still routes our id to a previous incarnation of
            // this node; wait for the ring to notice it is gone.
            debug!("ring still maps our id to ourselves, retrying");
            return None;
        }
        debug!(successor = %successor, "resolved prospective successor");

        let client = if successor.address == seed_addr {
            seed
        } else {
            match self.clients.get(&successor.address).await {
                Ok(client) => client,
                Err(e) => {
                    warn!(successor = %successor, %e, "cannot reach successor, retrying");
                    return None;
                }
            }
        };

        let state = match client.get_ring().await {
            Ok(state) => state,
            Err(e) => {
                warn!(successor = %successor, %e, "cannot fetch successor ring, retrying");
                return None;
            }
        };
        let Some(predecessor) = state.predecessor else {
            debug!(successor = %successor, "successor has no predecessor yet, retrying");
            return None;
        };

        Some((successor, state.successors, predecessor))
    }

    /// The lookup engine: local ownership test, then closest-preceding
    /// finger, then forwarding with the successor list as fallback.
    pub(crate) async fn resolve_successor(&self, id: u64) -> Result<Peer, NetError> {
        let contenders = {
            let view = self.view_read();
            let Some(head) = view.head_successor() else {
                return Err(NetError::Remote("node has no ring view".into()));
            };

            // Ids on the arc up to and including the head belong to it.
            if between(self.local.id, id, head.id) || id == head.id {
                return Ok(head.clone());
            }

            let candidate = view.closest_preceding(id);
            if candidate.id == self.local.id {
                return Ok(self.local.clone());
            }

            let mut contenders = Vec::with_capacity(1 + view.successors().len());
            contenders.push(candidate);
            contenders.extend(view.successors().iter().cloned());
            // Forwarding to ourselves through the loopback would just
            // re-run this computation.
            contenders.retain(|peer| peer.id != self.local.id);
            contenders
        };

        let mut last_err = None;
        for contender in contenders {
            let client = match self.clients.get(&contender.address).await {
                Ok(client) => client,
                Err(e) => {
                    debug!(peer = %contender, %e, "contender unreachable");
                    last_err = Some(e);
                    continue;
                }
            };

            debug!(node = %self.local, to = %contender, id, "forwarding find_successor");
            match client.find_successor(id).await {
                Ok(peer) => return Ok(peer),
                Err(e) => {
                    debug!(peer = %contender, %e, "forwarded lookup failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| NetError::Remote("no contender to forward to".into())))
    }

    /// The notify handler: accept the candidate when it falls between
    /// the current predecessor and us, otherwise check whether the
    /// current predecessor is even alive.
    pub(crate) async fn rectify(&self, candidate: Peer) {
        let probe = {
            let mut view = self.view_write();
            let accept = match view.predecessor() {
                None => true,
                Some(pred) => between(pred.id, candidate.id, self.local.id),
            };
            if accept {
                let changed = view.set_predecessor(candidate.clone());
                drop(view);
                if changed.is_some() {
                    debug!(node = %self.local, predecessor = %candidate, "accepted new predecessor");
                }
                self.fire_range_change(changed);
                return;
            }
            view.predecessor().cloned()
        };
        let Some(probed) = probe else { return };

        let alive = match self.clients.get(&probed.address).await {
            Ok(client) => client.get_ring().await.is_ok(),
            Err(_) => false,
        };
        if alive {
            return;
        }

        let changed = {
            let mut view = self.view_write();
            // Replace only if the dead peer is still the predecessor; a
            // concurrent notify may have installed a better one while
            // the probe was in flight.
            if view.predecessor().map(|p| p.id) == Some(probed.id) {
                view.set_predecessor(candidate.clone())
            } else {
                None
            }
        };
        if changed.is_some() {
            info!(node = %self.local, old = %probed, new = %candidate, "replaced dead predecessor");
        }
        self.fire_range_change(changed);
    }
}

#[async_trait::async_trait]
impl PeerRpc for NodeInner {
    async fn find_successor(&self, id: u64) -> Result<Peer, NetError> {
        self.resolve_successor(id).await
    }

    async fn get_ring(&self) -> Result<RingState, NetError> {
        let (successors, predecessor) = self.view_read().snapshot();
        if successors.is_empty() {
            return Err(NetError::Remote("node has no ring view".into()));
        }
        Ok(RingState {
            successors,
            predecessor,
        })
    }

    async fn notify(&self, peer: Peer) -> Result<(), NetError> {
        self.rectify(peer).await;
        Ok(())
    }
}
