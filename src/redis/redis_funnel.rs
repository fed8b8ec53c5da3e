use std::sync::Arc;

use redis::{ErrorKind, FromRedisValue, RedisResult, Value};

use crate::{
    Funnel, FunnelError, FunnelOptions, FunnelState, RedisKey,
    common::{normalize_quota, secs_to_duration},
    redis::{RedisScript, RedisScriptBuilder, ScriptArg},
};

/// Lua source of the funnel script.
///
/// `KEYS[1]` is the funnel hash. `ARGV` is capacity, operations, window
/// seconds and requested quota. The reply is
/// `{rejected, capacity, left_quota, interval, empty_time}` with both
/// durations as decimal strings in seconds and `"-1"` as the interval of an
/// admitted request.
///
/// Only `left_quota` and `leaking_ts` are read back; `capacity`,
/// `operations` and `seconds` are written for inspection.
pub const FUNNEL_SCRIPT: &str = r#"
redis.replicate_commands()

local function now()
    local time_array = redis.call("TIME")
    return tonumber(time_array[1]) + tonumber(time_array[2]) / 1000000
end

local key = KEYS[1]

local capacity = tonumber(ARGV[1])
local operations = tonumber(ARGV[2])
local seconds = tonumber(ARGV[3])
local quota = tonumber(ARGV[4])
local leaking_rate = operations / seconds

local left_quota
local leaking_ts

local cached = redis.call("HMGET", key, "left_quota", "leaking_ts")
if cached[1] then
    left_quota = tonumber(cached[1])
    if left_quota > capacity then
        left_quota = capacity
    end
    leaking_ts = tonumber(cached[2]) or now()
else
    left_quota = capacity
    leaking_ts = now()
end

local now_ts = now()
local delta_quota = (now_ts - leaking_ts) * leaking_rate

if left_quota + delta_quota >= quota then
    left_quota = left_quota + delta_quota
    if left_quota > capacity then
        left_quota = capacity
    end
    leaking_ts = now_ts
end

local rejected = 1
local interval = quota / leaking_rate

if left_quota >= quota then
    left_quota = left_quota - quota
    rejected = 0
    interval = -1
end

redis.call("HSET", key,
    "left_quota", left_quota,
    "leaking_ts", leaking_ts,
    "capacity", capacity,
    "operations", operations,
    "seconds", seconds
)

return {
    rejected,
    capacity,
    left_quota,
    tostring(interval),
    tostring((capacity - left_quota) / leaking_rate)
}
"#;

/// Funnel whose state lives in a Redis hash.
///
/// Every call runs [`FUNNEL_SCRIPT`] once: the read, leak, decision and write
/// happen inside Redis as one atomic unit, so any number of processes can
/// share a key. The handle itself holds only configuration.
///
/// Time is read from the server (`TIME`), not from the caller. Leakage is
/// continuous: fractional quota is carried in the hash and only truncated in
/// the reply. Unlike [`MemoryFunnel`](crate::MemoryFunnel), no top-up is
/// applied while it would still be too small for the request, and a
/// backward server clock is not special-cased.
///
/// The script is invoked by digest first. If Redis answers `NOSCRIPT` the full
/// source is sent once; every other error is returned unchanged.
///
/// # Examples
///
/// ```ignore
/// use std::time::Duration;
///
/// use funnel::{Funnel, FunnelOptions, RedisFunnel, RedisKey};
///
/// let client = redis::Client::open("redis://127.0.0.1:6379/")?;
/// let connection_manager = client.get_connection_manager().await?;
///
/// let funnel = RedisFunnel::new(
///     &connection_manager,
///     RedisKey::try_from("user_123")?,
///     FunnelOptions::new(10, 10, Duration::from_secs(1)),
/// );
///
/// let state = funnel.watering(1).await?;
/// if !state.ready {
///     // retry after state.retry_after()
/// }
/// ```
pub struct RedisFunnel<S> {
    key: RedisKey,
    options: FunnelOptions,
    script: Arc<S>,
}

impl<S: RedisScript> RedisFunnel<S> {
    /// Build the funnel script with `builder` and bind it to `key`.
    pub fn new<B>(builder: &B, key: RedisKey, options: FunnelOptions) -> Self
    where
        B: RedisScriptBuilder<Script = S>,
    {
        Self::with_script(Arc::new(builder.build(FUNNEL_SCRIPT)), key, options)
    }

    /// Bind an already built funnel script to `key`.
    ///
    /// `script` must have been built from [`FUNNEL_SCRIPT`].
    pub fn with_script(script: Arc<S>, key: RedisKey, options: FunnelOptions) -> Self {
        Self {
            key,
            options,
            script,
        }
    }

    /// Key of the funnel hash.
    pub fn key(&self) -> &RedisKey {
        &self.key
    }

    /// Options this funnel was built with.
    pub fn options(&self) -> &FunnelOptions {
        &self.options
    }

    async fn run_script(&self, keys: &[&str], args: &[ScriptArg]) -> RedisResult<Vec<Value>> {
        match self.script.eval_sha(keys, args).await {
            Err(err) if err.kind() == ErrorKind::NoScriptError => {
                tracing::debug!(key = %self.key, "funnel.redis.noscript, sending script source");
                self.script.eval(keys, args).await
            }
            result => result,
        }
    }
}

impl<S: RedisScript> Funnel for RedisFunnel<S> {
    async fn watering(&self, quota: i64) -> Result<FunnelState, FunnelError> {
        let quota = normalize_quota(quota);

        let keys = [self.key.as_str()];
        let args = [
            ScriptArg::Int(self.options.capacity()),
            ScriptArg::Int(self.options.operations()),
            ScriptArg::Float(self.options.window().as_secs_f64()),
            ScriptArg::Int(quota),
        ];

        let reply = self.run_script(&keys, &args).await?;

        decode_reply(reply)
    } // end method watering
}

/// Turn the script's five-element reply into a [`FunnelState`].
pub(crate) fn decode_reply(reply: Vec<Value>) -> Result<FunnelState, FunnelError> {
    let [rejected, capacity, left_quota, interval, empty_time]: [Value; 5] =
        reply.try_into().map_err(|reply: Vec<Value>| {
            FunnelError::MalformedReply(format!("expected 5 values, got {}", reply.len()))
        })?;

    let ready = match field::<i64>(&rejected, "rejected")? {
        0 => true,
        1 => false,
        other => {
            return Err(FunnelError::MalformedReply(format!(
                "rejected flag must be 0 or 1, got {other}"
            )));
        }
    };

    let capacity = field::<i64>(&capacity, "capacity")?;
    let left_quota = field::<i64>(&left_quota, "left_quota")?;
    let interval = secs_field(&interval, "interval")?;
    let empty_time = secs_field(&empty_time, "empty_time")?;

    let interval = if ready {
        None
    } else {
        match interval {
            secs if secs < 0.0 => {
                return Err(FunnelError::MalformedReply(format!(
                    "rejected reply carries negative interval {secs}"
                )));
            }
            secs => Some(secs_to_duration(secs)),
        }
    };

    Ok(FunnelState {
        ready,
        capacity,
        left_quota,
        interval,
        empty_time: secs_to_duration(empty_time),
    })
}

fn field<T: FromRedisValue>(value: &Value, name: &str) -> Result<T, FunnelError> {
    redis::from_redis_value(value)
        .map_err(|err| FunnelError::MalformedReply(format!("{name}: {err}")))
}

fn secs_field(value: &Value, name: &str) -> Result<f64, FunnelError> {
    let text: String = field(value, name)?;

    match text.trim().parse::<f64>() {
        Ok(secs) if !secs.is_nan() => Ok(secs),
        _ => Err(FunnelError::MalformedReply(format!(
            "{name}: {text:?} is not a number of seconds"
        ))),
    }
}
