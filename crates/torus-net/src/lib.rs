//! Peer-to-peer RPC for the Torus ring.
//!
//! This crate defines the complete inter-node surface:
//!
//! - [`RingMessage`] — the wire protocol (postcard-serialized,
//!   length-prefixed, one request/response per QUIC stream).
//! - [`PeerRpc`] — the three-operation capability trait. A node's RPC
//!   handler and a remote client expose the same surface, which is what
//!   makes the in-process loopback dispatch, the QUIC client, and a
//!   deterministic test transport interchangeable.
//! - [`Transport`] — how a node binds its listener and reaches peers.
//! - [`QuicTransport`] — the production transport on iroh-quinn QUIC
//!   with TLS material from [`TransportSecurity`].

mod error;
mod message;
mod security;
#[cfg(test)]
mod tests;
mod transport;

use std::sync::Arc;

pub use error::NetError;
pub use message::{RingMessage, RingState};
pub use security::TransportSecurity;
pub use transport::{QuicTransport, recv_message, send_message};

use torus_types::Peer;

/// The complete inter-node call surface.
///
/// Implemented both by the node itself (the handler side) and by
/// transport clients (which forward each call over the wire). Any call
/// may fail with a transport error; callers treat failure as "peer
/// possibly dead" and fall back to the successor list.
#[async_trait::async_trait]
pub trait PeerRpc: Send + Sync {
    /// The callee's best current successor of `id`; may forward
    /// recursively. No side effects.
    async fn find_successor(&self, id: u64) -> Result<Peer, NetError>;

    /// A read-only snapshot of the callee's successor list and
    /// predecessor.
    async fn get_ring(&self) -> Result<RingState, NetError>;

    /// Tell the callee that `peer` may be its new predecessor.
    /// Idempotent.
    async fn notify(&self, peer: Peer) -> Result<(), NetError>;
}

impl std::fmt::Debug for dyn PeerRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn PeerRpc")
    }
}

/// A running RPC listener. Dropping the handle does not stop it; call
/// [`ServerHandle::shutdown`].
pub trait ServerHandle: Send + Sync {
    /// The address the listener actually bound (port resolved).
    fn local_addr(&self) -> String;

    /// Stop accepting and tear the listener down. In-flight calls from
    /// peers fail from their point of view as if the node had crashed.
    fn shutdown(&self);
}

/// How a node binds its listener and dials peers.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Bind the listener and serve `handler` until shutdown.
    async fn serve(&self, handler: Arc<dyn PeerRpc>) -> Result<Box<dyn ServerHandle>, NetError>;

    /// Produce a client for the peer at `addr`. Connections are
    /// established lazily and reused; a dead peer surfaces as an error
    /// on use, not here.
    async fn connect(&self, addr: &str) -> Result<Arc<dyn PeerRpc>, NetError>;
}
