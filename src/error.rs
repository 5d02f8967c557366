//! Error types for vrpc.

use thiserror::Error;

/// Main error type for all vrpc operations.
///
/// Handler-level failures never show up here: they travel in-band as a
/// non-zero [`Response::code`](crate::protocol::Response::code) so that one
/// bad request cannot poison the batch it rode in on.
#[derive(Debug, Error)]
pub enum VrpcError {
    /// I/O error during stream operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope serialization error.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Envelope deserialization error.
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Protocol error (oversized frame, unexpected frame kind, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Stream closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Dial did not complete within the configured dial timeout.
    #[error("connect timed out")]
    ConnectTimeout,

    /// Keepalive ping was not answered within the keepalive timeout.
    #[error("keepalive timed out")]
    KeepaliveTimeout,

    /// The client's stream worker is gone; the submission was not sent.
    #[error("invoke failed: stream worker is gone")]
    StreamGone,

    /// The batch carrying this call was aborted by a transport error.
    #[error("invoke failed: batch aborted by a transport error")]
    BatchAborted,

    /// The response batch was shorter than the request batch.
    #[error("response missing from batch (len {len}, index {index})")]
    ResponseMissing { len: usize, index: usize },

    /// The client pool has been closed.
    #[error("client pool is closed")]
    PoolClosed,
}

/// Result type alias using VrpcError.
pub type Result<T> = std::result::Result<T, VrpcError>;
