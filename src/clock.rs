//! Time sources used by the in-process backend.
//!
//! The Redis backend reads time from the store itself (`TIME`), so a clock only
//! matters for [`MemoryFunnel`](crate::MemoryFunnel) and the local provider.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Source of the current unix time.
pub trait Clock: Send + Sync {
    /// Time elapsed since the unix epoch.
    fn unix_time(&self) -> Duration;
}

/// Wall clock backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_time(&self) -> Duration {
        // A system clock set before 1970 reads as the epoch itself.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time, so one handle can be given to a
/// funnel while the test keeps another to drive it.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock reading `unix_time`.
    pub fn new(unix_time: Duration) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(to_nanos(unix_time))),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(to_nanos(by), Ordering::SeqCst);
    }

    /// Move the clock backward, saturating at the epoch.
    pub fn rewind(&self, by: Duration) {
        let by = to_nanos(by);
        let _ = self
            .nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(by))
            });
    }

    /// Jump to an absolute reading.
    pub fn set(&self, unix_time: Duration) {
        self.nanos.store(to_nanos(unix_time), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn unix_time(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

fn to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
