//! Error types for the node.

use torus_net::NetError;

/// Errors surfaced to the host by the foreground operations.
///
/// Background tasks never return these; they log and continue.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// `start` was called on a node that is already serving.
    #[error("node already started")]
    AlreadyStarted,

    /// The operation requires `start` first.
    #[error("node not started")]
    NotStarted,

    /// `create` or `join` was called on a node already in a ring.
    #[error("node is already part of a ring")]
    AlreadyFormed,

    /// `lookup` was called before `create` or `join`.
    #[error("node has not created or joined a ring")]
    NotFormed,

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A network failure that exhausted every fallback.
    #[error("network error: {0}")]
    Net(#[from] NetError),
}
