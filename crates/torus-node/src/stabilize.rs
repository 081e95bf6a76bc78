//! The background stabilization task.
//!
//! One task per node, ticking at a fixed interval. Each tick reconciles
//! the successor list against the live head, announces this node to its
//! successor, and repairs one random finger — O(1) RPCs per tick
//! regardless of ring size. The view lock is released around every
//! outbound call; the loopback dispatcher re-enters the handler, so an
//! RPC under the lock would deadlock a singleton against itself.

use std::sync::Arc;

use rand::Rng;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use torus_types::{Peer, between};

use crate::node::NodeInner;

impl NodeInner {
    /// Launch the stabilizer; aborted by `stop`.
    pub(crate) fn spawn_stabilizer(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.stabilize_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                inner.reconcile_successors().await;
                inner.fix_random_finger().await;

                let view = inner.view_read();
                debug!(
                    node = %inner.local,
                    successor = ?view.head_successor().map(|p| p.name.as_str()),
                    predecessor = ?view.predecessor().map(|p| p.name.as_str()),
                    "stabilized"
                );
            }
        })
    }

    /// Reconcile the successor list against the first live successor,
    /// then notify it of this node.
    ///
    /// On a live head: splice its list under ours and check its
    /// predecessor — a peer sitting between us and the head is a newly
    /// inserted node, which becomes our head. On a dead head: pop it
    /// and retry with the next; a node that runs out of successors
    /// resets to an isolated singleton view and keeps trying on later
    /// ticks.
    pub(crate) async fn reconcile_successors(&self) {
        loop {
            let Some(head) = self.view_read().head_successor().cloned() else {
                return;
            };

            let reply = match self.clients.get(&head.address).await {
                Ok(client) => client.get_ring().await,
                Err(e) => Err(e),
            };

            match reply {
                Ok(state) => {
                    let inserted = {
                        let mut view = self.view_write();
                        view.splice_successors(&state.successors);
                        state
                            .predecessor
                            .filter(|p| between(self.local.id, p.id, head.id))
                    };
                    if let Some(peer) = inserted {
                        debug!(node = %self.local, peer = %peer, "adopting newly inserted successor");
                        self.adopt_inserted_successor(peer).await;
                    }
                    break;
                }
                Err(e) => {
                    warn!(node = %self.local, successor = %head, %e, "successor unreachable, dropping");
                    let isolated = {
                        let mut view = self.view_write();
                        view.pop_successor();
                        if view.is_formed() {
                            None
                        } else {
                            Some(view.reset_isolated())
                        }
                    };
                    if let Some(changed) = isolated {
                        self.fire_range_change(changed);
                        break;
                    }
                    // retry against the new head
                }
            }
        }

        self.notify_successor().await;
    }

    /// Adopt a node that inserted itself between us and our successor,
    /// together with its own successor list. If its list cannot be
    /// fetched the old list stands and the next tick retries.
    async fn adopt_inserted_successor(&self, peer: Peer) {
        let client = match self.clients.get(&peer.address).await {
            Ok(client) => client,
            Err(e) => {
                debug!(peer = %peer, %e, "inserted successor unreachable");
                return;
            }
        };
        match client.get_ring().await {
            Ok(state) => {
                self.view_write().adopt_successor(peer, &state.successors);
            }
            Err(e) => {
                debug!(peer = %peer, %e, "could not fetch inserted successor's ring");
            }
        }
    }

    /// Suggest this node as its successor's predecessor.
    async fn notify_successor(&self) {
        let Some(head) = self.view_read().head_successor().cloned() else {
            return;
        };
        let client = match self.clients.get(&head.address).await {
            Ok(client) => client,
            Err(e) => {
                debug!(successor = %head, %e, "cannot reach successor to notify");
                return;
            }
        };
        if let Err(e) = client.notify(self.local.clone()).await {
            debug!(successor = %head, %e, "notify failed");
        }
    }

    /// Re-resolve one uniformly random finger. A stale finger only
    /// costs lookup hops, so failures are logged and ignored.
    async fn fix_random_finger(&self) {
        let picked = {
            let view = self.view_read();
            if !view.is_formed() {
                return;
            }
            let index = rand::rng().random_range(0..view.finger_count());
            (index, view.finger_start(index))
        };
        let (index, start) = picked;

        match self.resolve_successor(start).await {
            Ok(peer) => {
                self.view_write().set_finger(index, peer);
            }
            Err(e) => {
                debug!(node = %self.local, index, %e, "failed fixing finger");
            }
        }
    }
}
