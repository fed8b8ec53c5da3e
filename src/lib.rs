#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod funnel;
pub use funnel::*;

mod funnels;
pub use funnels::*;

mod clock;
pub use clock::*;

pub mod local;
pub use local::*;

#[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
pub mod redis;
#[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
pub use self::redis::*;

mod error;
pub use error::*;

mod common;
pub use common::FunnelOptions;

#[cfg(test)]
mod tests;
