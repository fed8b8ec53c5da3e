use std::time::Duration;

/// Funnel configuration, fixed for the lifetime of a funnel.
///
/// The funnel holds at most `capacity` quota units and restores
/// `operations` units every `window`.
///
/// Capacity and operations are taken verbatim; non-positive values are not
/// rejected and produce funnels that never admit (or never refill).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FunnelOptions {
    capacity: i64,
    operations: i64,
    window: Duration,
}

impl FunnelOptions {
    /// Create options for a funnel of `capacity` units that allows
    /// `operations` operations per `window`.
    ///
    /// A zero `window` is replaced by one second.
    pub fn new(capacity: i64, operations: i64, window: Duration) -> Self {
        let window = if window.is_zero() {
            Duration::from_secs(1)
        } else {
            window
        };

        Self {
            capacity,
            operations,
            window,
        }
    }

    /// Shorthand for a funnel whose capacity equals its per-second rate.
    pub fn per_second(operations: i64) -> Self {
        Self::new(operations, operations, Duration::from_secs(1))
    }

    /// Maximum quota units the funnel can hold.
    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    /// Operations allowed per window.
    pub fn operations(&self) -> i64 {
        self.operations
    }

    /// Window over which `operations` are allowed.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Quota units restored per second.
    pub fn leaking_rate(&self) -> f64 {
        self.operations as f64 / self.window.as_secs_f64()
    }
}

/// Requests for zero or negative quota count as a request for one unit.
pub(crate) fn normalize_quota(quota: i64) -> i64 {
    if quota <= 0 { 1 } else { quota }
}

/// Convert fractional seconds into a [`Duration`], saturating on overflow.
///
/// Infinite waits (a zero leaking rate) read as [`Duration::MAX`]; negative or
/// NaN inputs read as zero.
pub(crate) fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }

    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
