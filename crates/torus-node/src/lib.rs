//! An embeddable node of a Torus ring.
//!
//! [`Node`] is the host-facing handle: configure it with a name and
//! addresses, `start` the listener, then either `create` a new ring or
//! `join` an existing one through any live peer. From then on a
//! background stabilization task keeps the node's view of the ring
//! converging under churn, `lookup` answers which peer owns a key, and
//! the range-change callback tells the host when its owned arc moves.
//!
//! The node tolerates up to `successor_count - 1` simultaneous peer
//! failures on its arc; a node that loses every successor falls back to
//! a singleton view and keeps ticking until the ring is reachable
//! again.

mod clients;
pub mod config;
pub mod error;
pub mod node;
mod stabilize;
#[cfg(test)]
mod tests;

pub use config::{NodeConfig, RangeCallback};
pub use error::NodeError;
pub use node::Node;

pub use torus_net::{NetError, PeerRpc, RingState, ServerHandle, Transport, TransportSecurity};
pub use torus_types::{KeyRange, Peer};
