use std::{future::Future, sync::Arc};

use redis::{
    RedisResult, RedisWrite, ToRedisArgs, Value,
    aio::ConnectionManager,
};

/// A single argument passed to a script.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScriptArg {
    /// Integer argument.
    Int(i64),
    /// Floating point argument.
    Float(f64),
}

impl ToRedisArgs for ScriptArg {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + RedisWrite,
    {
        match *self {
            ScriptArg::Int(value) => value.write_redis_args(out),
            ScriptArg::Float(value) => value.write_redis_args(out),
        }
    }
}

/// A Lua script bound to a connection.
///
/// Implementations run the script they were built from, either by its SHA1
/// digest or by sending the full source.
pub trait RedisScript: Send + Sync {
    /// Run the script by digest (`EVALSHA`).
    ///
    /// Fails with [`redis::ErrorKind::NoScriptError`] when the server does not
    /// have the script cached.
    fn eval_sha(
        &self,
        keys: &[&str],
        args: &[ScriptArg],
    ) -> impl Future<Output = RedisResult<Vec<Value>>> + Send;

    /// Run the script by sending its source (`EVAL`), caching it on the server.
    fn eval(
        &self,
        keys: &[&str],
        args: &[ScriptArg],
    ) -> impl Future<Output = RedisResult<Vec<Value>>> + Send;
}

/// Factory binding Lua sources to a connection.
pub trait RedisScriptBuilder {
    /// Script handle produced by this builder.
    type Script: RedisScript;

    /// Bind `source` to this builder's connection.
    fn build(&self, source: &str) -> Self::Script;
}

/// [`RedisScript`] running over a [`ConnectionManager`].
///
/// Cloning is cheap; the connection manager multiplexes one connection.
#[derive(Clone)]
pub struct ManagedScript {
    connection_manager: ConnectionManager,
    hash: Arc<str>,
    source: Arc<str>,
}

impl ManagedScript {
    /// Bind `source` to `connection_manager`.
    pub fn new(connection_manager: ConnectionManager, source: &str) -> Self {
        let hash = redis::Script::new(source).get_hash().to_string();

        Self {
            connection_manager,
            hash: Arc::from(hash),
            source: Arc::from(source),
        }
    }

    /// SHA1 digest of the script source.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    async fn invoke(
        &self,
        command: &str,
        script: &str,
        keys: &[&str],
        args: &[ScriptArg],
    ) -> RedisResult<Vec<Value>> {
        let mut cmd = redis::cmd(command);
        cmd.arg(script).arg(keys.len());

        for key in keys {
            cmd.arg(*key);
        }

        for arg in args {
            cmd.arg(*arg);
        }

        let mut connection_manager = self.connection_manager.clone();
        cmd.query_async(&mut connection_manager).await
    }
}

impl RedisScript for ManagedScript {
    async fn eval_sha(&self, keys: &[&str], args: &[ScriptArg]) -> RedisResult<Vec<Value>> {
        self.invoke("EVALSHA", &self.hash, keys, args).await
    }

    async fn eval(&self, keys: &[&str], args: &[ScriptArg]) -> RedisResult<Vec<Value>> {
        self.invoke("EVAL", &self.source, keys, args).await
    }
}

impl RedisScriptBuilder for ConnectionManager {
    type Script = ManagedScript;

    fn build(&self, source: &str) -> Self::Script {
        ManagedScript::new(self.clone(), source)
    }
}
