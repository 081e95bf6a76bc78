//! Error types for network operations.

/// Errors that can occur during peer RPC.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to dial a remote endpoint.
    #[error("connect error: {0}")]
    Connect(String),

    /// A QUIC connection error.
    #[error("connection error: {0}")]
    Connection(#[from] iroh_quinn::ConnectionError),

    /// Failed to open a stream.
    #[error("stream open error: {0}")]
    StreamOpen(String),

    /// Error writing to a stream.
    #[error("write error: {0}")]
    Write(#[from] iroh_quinn::WriteError),

    /// Stream was already closed when trying to finish.
    #[error("stream closed: {0}")]
    ClosedStream(#[from] iroh_quinn::ClosedStream),

    /// Error reading a framed payload.
    #[error("read error: {0}")]
    ReadToEnd(#[from] iroh_quinn::ReadToEndError),

    /// Error reading the frame header.
    #[error("read exact error: {0}")]
    ReadExact(#[from] iroh_quinn::ReadExactError),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The peer address string does not parse.
    #[error("bad peer address: {0:?}")]
    BadAddress(String),

    /// TLS material could not be built.
    #[error("tls error: {0}")]
    Tls(String),

    /// The callee reported a semantic failure.
    #[error("remote error: {0}")]
    Remote(String),

    /// The peer answered with a message the protocol does not allow
    /// here.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// The call exceeded the transport's per-call deadline.
    #[error("rpc timed out")]
    Timeout,

    /// The transport has no bound endpoint yet.
    #[error("transport not started")]
    NotStarted,

    /// The local node has been stopped.
    #[error("node stopped")]
    Closed,
}
