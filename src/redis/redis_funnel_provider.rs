use std::sync::Arc;

use redis::aio::ConnectionManager;

use crate::{
    Funnel, FunnelError, FunnelOptions, FunnelState, ManagedScript, RedisFunnel, RedisKey,
    RedisScriptBuilder, redis::FUNNEL_SCRIPT,
};

/// Configuration for the Redis provider.
///
/// # Examples
///
/// ```ignore
/// use funnel::RedisFunnelOptions;
///
/// let client = redis::Client::open("redis://127.0.0.1:6379/")?;
/// let connection_manager = client.get_connection_manager().await?;
///
/// let options = RedisFunnelOptions { connection_manager };
/// ```
#[derive(Clone)]
pub struct RedisFunnelOptions {
    /// Redis connection manager from the `redis` crate.
    ///
    /// Use `ConnectionManager` for automatic reconnection.
    pub connection_manager: ConnectionManager,
}

impl std::fmt::Debug for RedisFunnelOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisFunnelOptions").finish_non_exhaustive()
    }
}

/// Provider for funnels shared through Redis.
///
/// The funnel script is built once and shared by every [`RedisFunnel`] the
/// provider hands out. Keys are independent; nothing is cached locally.
///
/// # Requirements
///
/// - **Redis:** >= 4.0 (multi-field `HSET`, `redis.replicate_commands`)
/// - **Runtime:** Tokio or Smol
pub struct RedisFunnelProvider {
    script: Arc<ManagedScript>,
}

impl RedisFunnelProvider {
    pub(crate) fn new(options: RedisFunnelOptions) -> Self {
        Self {
            script: Arc::new(options.connection_manager.build(FUNNEL_SCRIPT)),
        }
    }

    /// Handle to the funnel stored under `key`.
    pub fn funnel(&self, key: RedisKey, options: FunnelOptions) -> RedisFunnel<ManagedScript> {
        RedisFunnel::with_script(self.script.clone(), key, options)
    }

    /// Water the funnel stored under `key`.
    ///
    /// `options` are sent with every call; shrinking the capacity clamps the
    /// stored quota on the next call.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let key = RedisKey::try_from("user_123")?;
    /// let options = FunnelOptions::per_second(10);
    ///
    /// let state = funnels.redis().watering(&key, &options, 1).await?;
    /// if !state.ready {
    ///     /* send 429, retry after state.retry_after() */
    /// }
    /// ```
    pub async fn watering(
        &self,
        key: &RedisKey,
        options: &FunnelOptions,
        quota: i64,
    ) -> Result<FunnelState, FunnelError> {
        self.funnel(key.clone(), *options).watering(quota).await
    }
}
