/// Error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum FunnelError {
    /// Redis error, surfaced unchanged after the `NOSCRIPT` fallback.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The funnel script replied with something other than the expected
    /// five-element tuple.
    #[error("malformed funnel reply: {0}")]
    MalformedReply(String),

    /// Invalid Redis key.
    #[error("invalid redis key: {0}")]
    InvalidRedisKey(String),
}
