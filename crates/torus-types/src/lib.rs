//! Shared types and identifier arithmetic for Torus.
//!
//! This crate defines the vocabulary used across the Torus workspace:
//! the [`Peer`] descriptor, the [`KeyRange`] arc type, the ring-modular
//! [`between`] predicate, and the hashing helpers that map names and
//! keys onto the identifier circle.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Peer descriptor
// ---------------------------------------------------------------------------

/// A node on the ring, as known to other nodes.
///
/// Peers are value copies — every node holds its own view of the ring,
/// never references into remote state. Two peers are the same node iff
/// their `id`s are equal; `name` exists for logging and `address` is an
/// opaque string handed to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Human-readable node name; `id = hash(name)`.
    pub name: String,
    /// Position on the identifier circle, already reduced mod 2^m.
    pub id: u64,
    /// Dial string for the transport layer.
    pub address: String,
}

impl Peer {
    /// Create a peer descriptor.
    pub fn new(name: impl Into<String>, id: u64, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id,
            address: address.into(),
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#018x})", self.name, self.id)
    }
}

// ---------------------------------------------------------------------------
// Ring arithmetic
// ---------------------------------------------------------------------------

/// Ring-modular ordering: does `b` lie strictly on the clockwise arc
/// from `a` to `c`, exclusive of both endpoints?
///
/// When `a == c` the arc is the whole circle minus the endpoint, so the
/// predicate holds for every `b != a`. All arguments must already be
/// reduced mod 2^m.
pub fn between(a: u64, b: u64, c: u64) -> bool {
    if a < c { a < b && b < c } else { a < b || b < c }
}

/// The half-open arc `(start, end]` on the identifier circle.
///
/// `start == end` denotes the full ring. A node's range is
/// `(predecessor.id, self.id]` — the set of keys it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    /// Exclusive lower bound.
    pub start: u64,
    /// Inclusive upper bound.
    pub end: u64,
}

impl KeyRange {
    /// Create the arc `(start, end]`.
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Does this arc contain `id`?
    pub fn contains(&self, id: u64) -> bool {
        if self.start == self.end {
            return true;
        }
        between(self.start, id, self.end) || id == self.end
    }

    /// Is this the full ring?
    pub fn is_full(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:#x}, {:#x}]", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// A key-to-identifier hash, shared across all nodes of one ring.
pub type HashFn = Arc<dyn Fn(&[u8]) -> u64 + Send + Sync>;

/// Default hash: SHA-256 truncated to its first 8 bytes, big-endian.
pub fn default_hash(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Reduce an identifier mod 2^bits. `bits` must be in 1..=64.
pub fn truncate_id(id: u64, bits: u32) -> u64 {
    if bits >= 64 { id } else { id & ((1u64 << bits) - 1) }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
