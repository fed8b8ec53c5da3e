//! In-process funnel backend.
//!
//! [`MemoryFunnel`] keeps its quota behind a mutex and never performs I/O.
//! [`LocalFunnelProvider`] keeps one funnel per key in a
//! [`DashMap`](dashmap::DashMap).
//!
//! # When to Use
//!
//! ✅ **Use the local backend when:**
//! - A single process owns the limit
//! - Admission must not wait on the network
//!
//! ❌ **Don't use the local backend when:**
//! - Several processes or hosts must share one quota
//! - Quota must survive a restart

mod memory_funnel;
pub use memory_funnel::*;

mod local_funnel_provider;
pub use local_funnel_provider::*;
