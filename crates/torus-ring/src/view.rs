//! The mutable ring view and its transition functions.

use tracing::debug;

use torus_types::{KeyRange, Peer};

use crate::finger::FingerTable;

/// Everything one node knows about the ring it is part of.
///
/// The successor list is the fault-tolerance buffer: with
/// `successor_count = r` the ring survives `r - 1` simultaneous
/// failures on any arc. An empty successor list means the node has not
/// yet formed or joined a ring. The `range` field is a cache derived
/// from the predecessor; every transition that moves the predecessor
/// recomputes it and reports whether it changed, so the caller can fire
/// the host callback after releasing its lock.
#[derive(Debug)]
pub struct RingView {
    local: Peer,
    successors: Vec<Peer>,
    predecessor: Option<Peer>,
    fingers: FingerTable,
    range: KeyRange,
    successor_count: usize,
}

/// `slice` without its last element.
fn all_but_last(slice: &[Peer]) -> &[Peer] {
    match slice.len() {
        0 => slice,
        n => &slice[..n - 1],
    }
}

impl RingView {
    /// A fresh, unformed view for `local` on a 2^bits ring.
    pub fn new(local: Peer, bits: u32, successor_count: usize) -> Self {
        let fingers = FingerTable::new(local.id, bits);
        let range = KeyRange::new(local.id, local.id);
        Self {
            local,
            successors: Vec::new(),
            predecessor: None,
            fingers,
            range,
            successor_count,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// This node's own descriptor.
    pub fn local(&self) -> &Peer {
        &self.local
    }

    /// The current successor list, immediate neighbor first.
    pub fn successors(&self) -> &[Peer] {
        &self.successors
    }

    /// The immediate clockwise neighbor, if the view is formed.
    pub fn head_successor(&self) -> Option<&Peer> {
        self.successors.first()
    }

    /// The counter-clockwise neighbor, unset transiently during churn.
    pub fn predecessor(&self) -> Option<&Peer> {
        self.predecessor.as_ref()
    }

    /// The arc of keys this node currently owns.
    pub fn range(&self) -> KeyRange {
        self.range
    }

    /// Has the node formed or joined a ring?
    pub fn is_formed(&self) -> bool {
        !self.successors.is_empty()
    }

    /// Value-copy of `(successors, predecessor)` for the get-ring reply.
    pub fn snapshot(&self) -> (Vec<Peer>, Option<Peer>) {
        (self.successors.clone(), self.predecessor.clone())
    }

    /// The identifier finger `i` indexes.
    pub fn finger_start(&self, i: usize) -> u64 {
        self.fingers.start(i)
    }

    /// Number of fingers (the ring's bit width).
    pub fn finger_count(&self) -> usize {
        self.fingers.len()
    }

    /// Record a freshly resolved successor for finger `i`.
    pub fn set_finger(&mut self, i: usize, peer: Peer) {
        self.fingers.set(i, peer);
    }

    /// The closest known predecessor of `id`, falling back to local.
    pub fn closest_preceding(&self, id: u64) -> Peer {
        self.fingers
            .closest_preceding(self.local.id, id)
            .cloned()
            .unwrap_or_else(|| self.local.clone())
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Become a singleton ring: every successor is self, the
    /// predecessor is self, and the owned range is the whole circle.
    pub fn form_singleton(&mut self) -> KeyRange {
        let local = self.local.clone();
        self.successors = vec![local.clone(); self.successor_count];
        self.predecessor = Some(local.clone());
        self.fingers.fill(&local);
        self.recompute_range();
        debug!(local = %self.local, "formed singleton ring");
        self.range
    }

    /// Install the view obtained from a successful join handshake.
    ///
    /// The successor list becomes `[successor]` followed by the
    /// successor's own list minus its last entry, truncated to r; the
    /// fingers are primed to the successor until stabilization refines
    /// them.
    pub fn install_join(
        &mut self,
        successor: Peer,
        successor_tail: &[Peer],
        predecessor: Peer,
    ) -> KeyRange {
        let mut list = Vec::with_capacity(self.successor_count);
        list.push(successor.clone());
        list.extend_from_slice(all_but_last(successor_tail));
        list.truncate(self.successor_count);

        self.successors = list;
        self.predecessor = Some(predecessor);
        self.fingers.fill(&successor);
        self.recompute_range();
        debug!(local = %self.local, successor = %successor, "installed joined view");
        self.range
    }

    /// Merge a get-ring reply from the current head successor:
    /// `[head] ++ reply`, truncated to r.
    pub fn splice_successors(&mut self, reply: &[Peer]) {
        let Some(head) = self.successors.first().cloned() else {
            return;
        };
        let mut list = Vec::with_capacity(self.successor_count);
        list.push(head);
        list.extend_from_slice(reply);
        list.truncate(self.successor_count);
        self.successors = list;
    }

    /// Adopt a newly-inserted immediate successor together with its
    /// own successor list.
    pub fn adopt_successor(&mut self, peer: Peer, peer_successors: &[Peer]) {
        let mut list = Vec::with_capacity(self.successor_count);
        list.push(peer);
        list.extend_from_slice(all_but_last(peer_successors));
        list.truncate(self.successor_count);
        self.successors = list;
    }

    /// Drop the head successor (presumed dead) and return it.
    pub fn pop_successor(&mut self) -> Option<Peer> {
        if self.successors.is_empty() {
            return None;
        }
        Some(self.successors.remove(0))
    }

    /// Every successor has failed: fall back to a self-only view and
    /// keep trying from there on subsequent stabilization ticks.
    pub fn reset_isolated(&mut self) -> Option<KeyRange> {
        self.successors = vec![self.local.clone()];
        self.predecessor = Some(self.local.clone());
        debug!(local = %self.local, "all successors unreachable; now isolated");
        self.recompute_range_changed()
    }

    /// Accept a new predecessor, reporting the new range if it moved.
    pub fn set_predecessor(&mut self, peer: Peer) -> Option<KeyRange> {
        self.predecessor = Some(peer);
        self.recompute_range_changed()
    }

    fn recompute_range(&mut self) {
        if let Some(pred) = &self.predecessor {
            self.range = KeyRange::new(pred.id, self.local.id);
        }
    }

    fn recompute_range_changed(&mut self) -> Option<KeyRange> {
        let old = self.range;
        self.recompute_range();
        (self.range != old).then_some(self.range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str, id: u64) -> Peer {
        Peer::new(name, id, format!("{name}:0"))
    }

    fn view(id: u64) -> RingView {
        RingView::new(peer("local", id), 64, 3)
    }

    #[test]
    fn test_fresh_view_is_unformed() {
        let v = view(100);
        assert!(!v.is_formed());
        assert!(v.head_successor().is_none());
        assert!(v.predecessor().is_none());
    }

    #[test]
    fn test_singleton_owns_the_whole_ring() {
        let mut v = view(100);
        let range = v.form_singleton();

        assert!(v.is_formed());
        assert_eq!(v.successors().len(), 3);
        assert!(v.successors().iter().all(|s| s.id == 100));
        assert_eq!(v.predecessor().unwrap().id, 100);
        assert!(range.is_full());
        assert!(range.contains(0));
        assert!(range.contains(u64::MAX));
    }

    #[test]
    fn test_install_join_drops_last_inherited_successor() {
        let mut v = view(100);
        let succ = peer("s", 200);
        let tail = vec![peer("t1", 300), peer("t2", 400), peer("t3", 500)];
        let range = v.install_join(succ, &tail, peer("p", 50));

        // [s] ++ [t1, t2] — t3 fell off the end, then truncate to r = 3.
        let ids: Vec<u64> = v.successors().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![200, 300, 400]);
        assert_eq!(v.predecessor().unwrap().id, 50);
        assert_eq!(range, KeyRange::new(50, 100));
        // All fingers primed to the successor.
        assert_eq!(v.closest_preceding(150), *v.local());
    }

    #[test]
    fn test_splice_keeps_head_and_truncates() {
        let mut v = view(100);
        v.form_singleton();
        v.splice_successors(&[peer("a", 1), peer("b", 2), peer("c", 3)]);

        let ids: Vec<u64> = v.successors().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![100, 1, 2]);
    }

    #[test]
    fn test_pop_to_empty_then_isolation_reset() {
        let mut v = view(100);
        v.install_join(peer("s", 200), &[peer("t", 300)], peer("p", 50));

        assert_eq!(v.pop_successor().unwrap().id, 200);
        assert_eq!(v.pop_successor().unwrap().id, 300);
        assert!(v.pop_successor().is_none());
        assert!(!v.is_formed());

        let range = v.reset_isolated().expect("range must change");
        assert!(range.is_full());
        assert_eq!(v.successors().len(), 1);
        assert_eq!(v.predecessor().unwrap().id, 100);
    }

    #[test]
    fn test_set_predecessor_reports_range_change_once() {
        let mut v = view(100);
        v.form_singleton();

        let changed = v.set_predecessor(peer("p", 40));
        assert_eq!(changed, Some(KeyRange::new(40, 100)));

        // Same predecessor again: the range did not move.
        assert_eq!(v.set_predecessor(peer("p", 40)), None);
    }
}
