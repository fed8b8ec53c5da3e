//! The capability shared by every backend.

use std::{future::Future, time::Duration};

use crate::FunnelError;

/// Outcome of a single [`Funnel::watering`] call.
///
/// Produced fresh on every call; `capacity` and `left_quota` describe the
/// funnel after this call took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunnelState {
    /// Whether the request was admitted.
    pub ready: bool,
    /// Funnel capacity.
    pub capacity: i64,
    /// Quota left after this call.
    pub left_quota: i64,
    /// Time until the requested quota could be satisfied.
    ///
    /// `None` when the request was admitted. When rejected this is
    /// `quota / leaking_rate`, i.e. the time to accumulate the full request
    /// from nothing, not just the missing part.
    pub interval: Option<Duration>,
    /// Time until the funnel drains empty, i.e. until `left_quota` is back at
    /// `capacity`. Reported whether or not the request was admitted.
    pub empty_time: Duration,
}

impl FunnelState {
    /// Whether the request was admitted.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Suggested wait before retrying, zero if the request was admitted.
    pub fn retry_after(&self) -> Duration {
        self.interval.unwrap_or(Duration::ZERO)
    }
}

/// A leaky-bucket rate limiter.
///
/// Every backend makes the same admission decision for the same inputs:
///
/// 1. Restore `elapsed × leaking_rate` units, never above capacity.
/// 2. Admit when the remaining quota covers the request and subtract it.
/// 3. Otherwise reject and report how long the request would take to fill.
///
/// A `quota` of zero or less is treated as `1`.
///
/// Cancellation is dropping the returned future. The in-process backend
/// completes without awaiting; the Redis backend either applies the whole
/// script or nothing, so dropping mid-flight never leaves partial state.
pub trait Funnel {
    /// Try to consume `quota` units.
    fn watering(&self, quota: i64) -> impl Future<Output = Result<FunnelState, FunnelError>> + Send;
}
