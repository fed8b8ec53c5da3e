use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    Clock, Funnel, FunnelError, FunnelOptions, FunnelState, SystemClock,
    common::{normalize_quota, secs_to_duration},
};

/// In-process funnel.
///
/// Remaining quota and the last leak timestamp live behind one mutex. The
/// clock is read while holding it, so leak timestamps only move forward in
/// lock order. Durations in the returned [`FunnelState`] are computed after
/// the lock is released.
///
/// # Time resolution
///
/// Leakage is computed on whole seconds: the clock reading is truncated and
/// `floor(elapsed_secs × leaking_rate)` units are restored. The leak
/// timestamp only moves when at least one unit was restored, so slow funnels
/// still refill over several calls.
///
/// # Backward clock jumps
///
/// If the clock reads earlier than the last leak, the funnel is reset to full
/// capacity and the timestamp is moved to the new reading. This can
/// over-admit right after the jump but never leaves the funnel stuck empty.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use funnel::{FunnelOptions, MemoryFunnel};
///
/// let funnel = MemoryFunnel::new(FunnelOptions::new(5, 1, Duration::from_secs(10)));
///
/// let state = funnel.water(1);
/// assert!(state.ready);
/// assert_eq!(state.left_quota, 4);
/// assert_eq!(state.empty_time, Duration::from_secs(10));
/// ```
pub struct MemoryFunnel {
    options: FunnelOptions,
    leaking_rate: f64,
    clock: Arc<dyn Clock>,
    bucket: Mutex<Bucket>,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    left_quota: i64,
    leaking_ts: i64,
}

impl Bucket {
    /// Quota units restored by `now`, floored.
    fn delta_quota(&self, now: i64, leaking_rate: f64) -> i64 {
        let delta_ts = now.saturating_sub(self.leaking_ts);
        (delta_ts as f64 * leaking_rate).floor() as i64
    }

    /// Whether leaking at `now` restores at least one unit and reaches
    /// `capacity`. Any later leak then does the same, so the bucket would
    /// match a new one created at that time.
    fn is_refilled(&self, now: i64, capacity: i64, leaking_rate: f64) -> bool {
        let delta_quota = self.delta_quota(now, leaking_rate);
        delta_quota > 0 && self.left_quota.saturating_add(delta_quota) >= capacity
    }

    fn make_space(&mut self, now: i64, capacity: i64, leaking_rate: f64) {
        let delta_quota = self.delta_quota(now, leaking_rate);

        if delta_quota < 0 {
            tracing::warn!(
                leaking_ts = self.leaking_ts,
                now,
                "funnel.clock.backward, resetting funnel to full capacity"
            );
            self.left_quota = capacity;
            self.leaking_ts = now;
        } else if delta_quota > 0 {
            self.left_quota = self.left_quota.saturating_add(delta_quota).min(capacity);
            self.leaking_ts = now;
        }
    }

    fn watering(&mut self, now: i64, capacity: i64, leaking_rate: f64, quota: i64) -> bool {
        self.make_space(now, capacity, leaking_rate);

        if self.left_quota >= quota {
            self.left_quota -= quota;
            true
        } else {
            false
        }
    }
}

impl MemoryFunnel {
    /// Create a full funnel reading time from the system clock.
    pub fn new(options: FunnelOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    /// Create a full funnel reading time from `clock`.
    pub fn with_clock(options: FunnelOptions, clock: Arc<dyn Clock>) -> Self {
        let leaking_ts = unix_secs(clock.as_ref());

        Self {
            options,
            leaking_rate: options.leaking_rate(),
            clock,
            bucket: Mutex::new(Bucket {
                left_quota: options.capacity(),
                leaking_ts,
            }),
        }
    } // end constructor

    /// Options this funnel was built with.
    pub fn options(&self) -> &FunnelOptions {
        &self.options
    }

    /// Try to consume `quota` units.
    ///
    /// Synchronous counterpart of [`Funnel::watering`]; the in-process backend
    /// cannot fail.
    pub fn water(&self, quota: i64) -> FunnelState {
        let quota = normalize_quota(quota);
        let capacity = self.options.capacity();

        let (ready, left_quota) = {
            let mut bucket = self.lock();
            let now = unix_secs(self.clock.as_ref());
            let ready = bucket.watering(now, capacity, self.leaking_rate, quota);
            (ready, bucket.left_quota)
        };

        let interval = (!ready).then(|| secs_to_duration(quota as f64 / self.leaking_rate));
        let empty_time = match capacity - left_quota {
            n if n > 0 => secs_to_duration(n as f64 / self.leaking_rate),
            _ => Default::default(),
        };

        FunnelState {
            ready,
            capacity,
            left_quota,
            interval,
            empty_time,
        }
    } // end method water

    /// Whether the next leak is certain to refill the funnel and move its
    /// leak timestamp to the time of that leak.
    ///
    /// Does not modify the funnel. At least one unit must be due: a funnel at
    /// capacity with nothing to restore yet still carries its old leak
    /// timestamp, and one whose clock went backward carries a timestamp from
    /// the future. Neither matches a freshly created funnel.
    pub fn is_full(&self) -> bool {
        let bucket = self.lock();
        let now = unix_secs(self.clock.as_ref());

        bucket.is_refilled(now, self.options.capacity(), self.leaking_rate)
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        // Bucket updates are plain integer stores; a panicking holder cannot
        // leave it half-written.
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }
} // end of impl

impl Funnel for MemoryFunnel {
    async fn watering(&self, quota: i64) -> Result<FunnelState, FunnelError> {
        Ok(self.water(quota))
    }
}

fn unix_secs(clock: &dyn Clock) -> i64 {
    i64::try_from(clock.unix_time().as_secs()).unwrap_or(i64::MAX)
}
