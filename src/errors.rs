//! Errors raised by the pool itself.
//!
//! Errors produced by work functions are never wrapped: they are the caller's
//! own `E` and travel back verbatim. Pool-side failures reach the caller
//! through `E: From<PoolError>`.

/// Everything that can go wrong on the pool side of a call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The configuration handed to the constructor was rejected.
    #[error("invalid pool config: {reason}")]
    InvalidConfig { reason: String },

    /// Workers are tokio tasks and need a runtime to live on.
    #[error("no tokio runtime available to host pool workers")]
    NoRuntime,

    /// The queue could not admit the job(s) without waiting.
    #[error("work queue is full (depth {depth}), cannot admit {requested} job(s)")]
    QueueFull { depth: usize, requested: usize },

    /// The pool has been shut down.
    #[error("pool is closed")]
    Closed,

    /// The caller stopped listening before a decisive outcome arrived.
    #[error("call cancelled")]
    Cancelled,

    /// A work function panicked.
    #[error("job panicked: {0}")]
    Panic(String),

    /// A blocking job could not be joined.
    #[error("job join failed: {0}")]
    JoinFailed(String),

    /// The result channel closed before every job reported back.
    #[error("result channel closed before every job reported")]
    ChannelClosed,
}
