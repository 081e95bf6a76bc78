//! Finger table: the logarithmic index used to skip around the ring.

use torus_types::{Peer, between, truncate_id};

/// One finger: the best known successor of `start = local.id + 2^i`.
#[derive(Debug, Clone)]
pub struct FingerEntry {
    /// The identifier this finger indexes, already reduced mod 2^m.
    pub start: u64,
    /// Best known successor of `start`, if any has been resolved yet.
    pub node: Option<Peer>,
}

/// A table of `m` fingers for an `m`-bit identifier space.
///
/// Fingers are a routing accelerator only: a stale or unset finger
/// costs extra hops, never correctness — the successor-list fallback
/// in the lookup engine covers it.
#[derive(Debug, Clone)]
pub struct FingerTable {
    entries: Vec<FingerEntry>,
}

impl FingerTable {
    /// Build an empty table for `local_id` on a 2^bits ring.
    ///
    /// Entry `i` gets `start = local_id + 2^i (mod 2^bits)` and no node.
    pub fn new(local_id: u64, bits: u32) -> Self {
        let entries = (0..bits)
            .map(|i| FingerEntry {
                start: truncate_id(local_id.wrapping_add(1u64 << i), bits),
                node: None,
            })
            .collect();
        Self { entries }
    }

    /// Number of fingers (= the ring's bit width).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The identifier entry `i` indexes.
    pub fn start(&self, i: usize) -> u64 {
        self.entries[i].start
    }

    /// The node entry `i` currently points at.
    pub fn node(&self, i: usize) -> Option<&Peer> {
        self.entries[i].node.as_ref()
    }

    /// Record `peer` as the successor of entry `i`'s start.
    pub fn set(&mut self, i: usize, peer: Peer) {
        self.entries[i].node = Some(peer);
    }

    /// Point every finger at `peer`.
    ///
    /// Used right after create/join, when the only peer the node knows
    /// is its successor (or itself); stabilization refines the entries
    /// one per tick afterwards.
    pub fn fill(&mut self, peer: &Peer) {
        for entry in &mut self.entries {
            entry.node = Some(peer.clone());
        }
    }

    /// The closest known predecessor of `id`: scanning from the widest
    /// finger down, the first node lying strictly in `(local_id, id)`.
    pub fn closest_preceding(&self, local_id: u64, id: u64) -> Option<&Peer> {
        self.entries
            .iter()
            .rev()
            .filter_map(|entry| entry.node.as_ref())
            .find(|node| between(local_id, node.id, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str, id: u64) -> Peer {
        Peer::new(name, id, format!("{name}:0"))
    }

    #[test]
    fn test_starts_are_powers_of_two_offsets() {
        let table = FingerTable::new(0, 64);
        assert_eq!(table.len(), 64);
        assert_eq!(table.start(0), 1);
        assert_eq!(table.start(1), 2);
        assert_eq!(table.start(10), 1 << 10);
        assert_eq!(table.start(63), 1 << 63);
    }

    #[test]
    fn test_starts_wrap_at_small_bit_width() {
        // m = 3: ring of 8 ids, local at 6.
        let table = FingerTable::new(6, 3);
        assert_eq!(table.len(), 3);
        assert_eq!(table.start(0), 7);
        assert_eq!(table.start(1), 0);
        assert_eq!(table.start(2), 2);
    }

    #[test]
    fn test_closest_preceding_prefers_widest_finger() {
        let mut table = FingerTable::new(0, 8);
        table.set(2, peer("a", 4));
        table.set(5, peer("b", 32));
        table.set(7, peer("c", 128));

        // Looking up 200: c(128) is the widest finger before it.
        assert_eq!(table.closest_preceding(0, 200).unwrap().id, 128);
        // Looking up 40: c is past it, b(32) precedes it.
        assert_eq!(table.closest_preceding(0, 40).unwrap().id, 32);
        // Looking up 3: no finger lies strictly inside (0, 3).
        assert!(table.closest_preceding(0, 3).is_none());
    }

    #[test]
    fn test_closest_preceding_wraps() {
        let mut table = FingerTable::new(200, 8);
        table.set(0, peer("a", 220));
        table.set(5, peer("b", 10));

        // From 200 looking up 50: b(10) lies on the wrapped arc (200, 50).
        assert_eq!(table.closest_preceding(200, 50).unwrap().id, 10);
        // From 200 looking up 210: neither 220 nor 10 lies in (200, 210).
        assert!(table.closest_preceding(200, 210).is_none());
    }

    #[test]
    fn test_fill_points_everything_at_one_peer() {
        let mut table = FingerTable::new(0, 16);
        table.fill(&peer("s", 9000));
        for i in 0..table.len() {
            assert_eq!(table.node(i).unwrap().id, 9000);
        }
    }
}
