//! Top-level entrypoint that wires provider implementations.
//!
//! The `local` provider is always present. The `redis` provider is added when
//! the `redis-tokio` or `redis-smol` feature is enabled.

use std::sync::Arc;

use crate::{LocalFunnelOptions, LocalFunnelProvider};

#[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
use crate::{RedisFunnelOptions, RedisFunnelProvider};

/// Top-level configuration for [`Funnels`].
#[derive(Clone, Debug)]
#[cfg_attr(
    not(any(feature = "redis-tokio", feature = "redis-smol")),
    derive(Default)
)]
pub struct FunnelsOptions {
    /// Options for the local provider.
    pub local: LocalFunnelOptions,
    /// Options for the Redis provider.
    #[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
    pub redis: RedisFunnelOptions,
}

/// Funnel entrypoint.
///
/// Both providers accept the same [`FunnelOptions`](crate::FunnelOptions) and
/// return the same [`FunnelState`](crate::FunnelState), so switching a key
/// between them does not change admission decisions.
pub struct Funnels {
    local: Arc<LocalFunnelProvider>,
    #[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
    #[cfg_attr(docsrs, doc(cfg(any(feature = "redis-tokio", feature = "redis-smol"))))]
    redis: RedisFunnelProvider,
}

impl Funnels {
    /// Create a new [`Funnels`].
    pub fn new(options: FunnelsOptions) -> Self {
        Self {
            local: Arc::new(LocalFunnelProvider::new(options.local)),
            #[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
            #[cfg_attr(docsrs, doc(cfg(any(feature = "redis-tokio", feature = "redis-smol"))))]
            redis: RedisFunnelProvider::new(options.redis),
        }
    }

    /// Access the Redis provider.
    #[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
    #[cfg_attr(docsrs, doc(cfg(any(feature = "redis-tokio", feature = "redis-smol"))))]
    pub fn redis(&self) -> &RedisFunnelProvider {
        &self.redis
    }

    /// Access the local provider.
    ///
    /// Returned as an [`Arc`] so a cleanup loop can be attached with
    /// [`LocalFunnelProvider::run_cleanup_loop`].
    pub fn local(&self) -> &Arc<LocalFunnelProvider> {
        &self.local
    }
}
