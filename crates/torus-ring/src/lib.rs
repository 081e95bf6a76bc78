//! The per-node view of a Torus ring.
//!
//! [`RingView`] holds everything one node knows about the cluster — its
//! successor list, predecessor, finger table, and the derived key range
//! it owns. The view is plain data: all locking and all network I/O
//! live in `torus-node`, which mutates the view through the transition
//! functions defined here.

mod finger;
mod view;

pub use finger::{FingerEntry, FingerTable};
pub use view::RingView;
