//! Wire protocol for the Torus ring.
//!
//! All messages are postcard-serialized and framed with a 4-byte
//! big-endian length prefix, one request/response pair per QUIC
//! bi-directional stream. postcard encodes enum variants by index, so
//! the variant order below is append-only.

use serde::{Deserialize, Serialize};
use torus_types::Peer;

/// Snapshot of a peer's ring neighborhood, as returned by `get_ring`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingState {
    /// The peer's successor list, immediate neighbor first, up to r
    /// entries.
    pub successors: Vec<Peer>,
    /// The peer's predecessor, absent while it is still stabilizing.
    pub predecessor: Option<Peer>,
}

/// Protocol messages exchanged between Torus nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RingMessage {
    /// Ask the callee for its best successor of `id`.
    FindSuccessor {
        /// The identifier to resolve, already reduced mod 2^m.
        id: u64,
    },

    /// Successful reply to [`RingMessage::FindSuccessor`].
    FoundSuccessor {
        /// The peer responsible for the requested identifier.
        peer: Peer,
    },

    /// Ask the callee for a snapshot of its ring neighborhood.
    GetRing,

    /// Reply to [`RingMessage::GetRing`].
    Ring(RingState),

    /// Suggest `peer` as the callee's new predecessor.
    Notify {
        /// The peer announcing itself.
        peer: Peer,
    },

    /// Reply to [`RingMessage::Notify`].
    NotifyAck,

    /// The callee could not serve the request. Transport-level
    /// failures never produce this; it carries semantic failures such
    /// as an exhausted contender list.
    Failed {
        /// Human-readable description, surfaced as [`NetError::Remote`].
        ///
        /// [`NetError::Remote`]: crate::NetError::Remote
        reason: String,
    },
}
