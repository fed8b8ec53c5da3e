use std::{ops::Deref, sync::Arc};

use crate::FunnelError;

/// A validated newtype for Redis keys.
///
/// The key is used verbatim as the name of the funnel's hash, so processes
/// sharing a key share a funnel. Constraints:
/// - Must not be empty
/// - Must not be longer than 512 bytes
#[derive(Debug, Clone, PartialEq, PartialOrd, Hash, Eq)]
pub struct RedisKey(Arc<str>);

impl RedisKey {
    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for RedisKey {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for RedisKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RedisKey {
    type Error = FunnelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(FunnelError::InvalidRedisKey(
                "Redis key must not be empty".to_string(),
            ))
        } else if value.len() > 512 {
            Err(FunnelError::InvalidRedisKey(
                "Redis key must not be longer than 512 bytes".to_string(),
            ))
        } else {
            Ok(Self(Arc::from(value)))
        }
    }
}

impl TryFrom<&str> for RedisKey {
    type Error = FunnelError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}
