use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use dashmap::DashMap;

use crate::{Clock, FunnelOptions, FunnelState, MemoryFunnel, SystemClock};

/// Configuration for the local provider.
#[derive(Clone)]
pub struct LocalFunnelOptions {
    /// Time source shared by every funnel the provider creates.
    pub clock: Arc<dyn Clock>,
}

impl Default for LocalFunnelOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
        }
    }
}

impl fmt::Debug for LocalFunnelOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalFunnelOptions").finish_non_exhaustive()
    }
}

/// Keyed registry of in-process funnels.
///
/// One key is one funnel, like one hash is one funnel in Redis.
///
/// **Sticky options:** the first call for a key decides its
/// [`FunnelOptions`]; later calls for the same key reuse the stored funnel
/// and ignore the options they pass.
///
/// **Memory growth:** funnels are never removed implicitly. Call
/// [`cleanup`](Self::cleanup) or start
/// [`run_cleanup_loop`](Self::run_cleanup_loop) to drop funnels that have
/// refilled completely.
pub struct LocalFunnelProvider {
    clock: Arc<dyn Clock>,
    funnels: DashMap<String, Arc<MemoryFunnel>>,
}

impl LocalFunnelProvider {
    pub(crate) fn new(options: LocalFunnelOptions) -> Self {
        Self {
            clock: options.clock,
            funnels: DashMap::new(),
        }
    }

    /// Water the funnel stored under `key`, creating it with `options` on
    /// first use.
    ///
    /// The registry entry stays borrowed for the duration of the call, so a
    /// concurrent [`cleanup`](Self::cleanup) cannot drop quota consumed here.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use funnel::{FunnelOptions, Funnels, FunnelsOptions};
    ///
    /// # #[cfg(not(any(feature = "redis-tokio", feature = "redis-smol")))]
    /// # {
    /// let funnels = Funnels::new(FunnelsOptions::default());
    /// // Two requests per minute.
    /// let options = FunnelOptions::new(2, 2, Duration::from_secs(60));
    ///
    /// assert!(funnels.local().watering("user_123", &options, 1).ready);
    /// assert!(funnels.local().watering("user_123", &options, 1).ready);
    /// assert!(!funnels.local().watering("user_123", &options, 1).ready);
    /// # }
    /// ```
    pub fn watering(&self, key: &str, options: &FunnelOptions, quota: i64) -> FunnelState {
        if let Some(funnel) = self.funnels.get(key) {
            return funnel.water(quota);
        }

        let funnel = self
            .funnels
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(self.create(options)));

        funnel.water(quota)
    } // end method watering

    /// Shared handle to the funnel stored under `key`.
    ///
    /// A handle obtained here keeps working after the provider's cleanup has
    /// dropped the key, but its state is no longer the one the provider
    /// serves.
    pub fn funnel(&self, key: &str, options: &FunnelOptions) -> Arc<MemoryFunnel> {
        if let Some(funnel) = self.funnels.get(key) {
            return funnel.value().clone();
        }

        self.funnels
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(self.create(options)))
            .value()
            .clone()
    }

    /// Number of tracked funnels.
    pub fn len(&self) -> usize {
        self.funnels.len()
    }

    /// Whether no funnel is tracked.
    pub fn is_empty(&self) -> bool {
        self.funnels.is_empty()
    }

    /// Drop every funnel that has refilled to capacity.
    ///
    /// Only funnels for which [`MemoryFunnel::is_full`] holds are removed.
    /// The next [`watering`](Self::watering) on such a key would have leaked
    /// it to capacity and stamped it with that call's time, which is exactly
    /// the state it is re-created in. Removal is therefore not observable
    /// through `watering` as long as the clock does not go backward.
    ///
    /// Returns the number of funnels removed.
    pub fn cleanup(&self) -> usize {
        let mut removed = 0;

        self.funnels.retain(|_, funnel| {
            let full = funnel.is_full();
            if full {
                removed += 1;
            }
            !full
        });

        tracing::debug!(removed, remaining = self.funnels.len(), "funnel.cleanup");

        removed
    } // end method cleanup

    /// Run [`cleanup`](Self::cleanup) every `interval` on a background thread.
    ///
    /// The loop runs on a plain OS thread named `funnel-cleanup` rather than
    /// an async task, so it works without any async runtime and whichever
    /// redis runtime feature is enabled.
    ///
    /// The thread holds only a weak reference and exits once the provider is
    /// dropped or the returned handle is stopped or dropped.
    pub fn run_cleanup_loop(self: &Arc<Self>, interval: Duration) -> CleanupLoopHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let provider: Weak<Self> = Arc::downgrade(self);
        let thread_stop = stop.clone();

        let thread = thread::Builder::new()
            .name("funnel-cleanup".to_string())
            .spawn(move || {
                loop {
                    thread::park_timeout(interval);

                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }

                    let Some(provider) = provider.upgrade() else {
                        break;
                    };

                    provider.cleanup();
                }
            });

        let thread = match thread {
            Ok(thread) => Some(thread),
            Err(err) => {
                tracing::error!(error = ?err, "funnel.cleanup.error, failed to spawn cleanup thread");
                None
            }
        };

        CleanupLoopHandle { stop, thread }
    } // end method run_cleanup_loop

    fn create(&self, options: &FunnelOptions) -> MemoryFunnel {
        MemoryFunnel::with_clock(*options, self.clock.clone())
    }
}

/// Handle to a running cleanup loop.
///
/// Dropping the handle signals the loop to stop without waiting for it.
#[derive(Debug)]
pub struct CleanupLoopHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CleanupLoopHandle {
    /// Whether the background thread was started.
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    /// Stop the loop and wait for the thread to exit.
    pub fn stop(mut self) {
        self.signal();

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    fn signal(&self) {
        self.stop.store(true, Ordering::Release);

        if let Some(thread) = &self.thread {
            thread.thread().unpark();
        }
    }
}

impl Drop for CleanupLoopHandle {
    fn drop(&mut self) {
        self.signal();
    }
}
