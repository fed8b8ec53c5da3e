//! Redis-backed funnel.
//!
//! State for each key lives in one Redis hash and is updated by a Lua script,
//! so every process using the key sees the same funnel.
//!
//! The backend talks to Redis only through [`RedisScript`]; a
//! [`ConnectionManager`](redis::aio::ConnectionManager) adapter is provided
//! by [`ManagedScript`].

mod common;
pub use common::*;

mod script;
pub use script::*;

mod redis_funnel;
pub use redis_funnel::*;

mod redis_funnel_provider;
pub use redis_funnel_provider::*;
