use async_trait::async_trait;
use bucketproxy::{CasStore, ProxyError, ProxyResult};
use redis::aio::ConnectionLike;
use redis::{AsyncCommands, Script};
use std::time::Duration;

pub(crate) const BACKEND: &str = "redis";

// KEYS[1] = key
// ARGV[1] = "1" when an expected value is given, "0" when the key must be absent
// ARGV[2] = expected value
// ARGV[3] = new value
// ARGV[4] = ttl in milliseconds, "0" for a persistent key
//
// GET yields `false` for a missing key, which never equals a string.
const COMPARE_AND_SWAP: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
    if current ~= ARGV[2] then
        return 0
    end
elseif current then
    return 0
end
if ARGV[4] ~= '0' then
    redis.call('SET', KEYS[1], ARGV[3], 'PX', ARGV[4])
else
    redis.call('SET', KEYS[1], ARGV[3])
end
return 1
"#;

/// [`CasStore`] over any async Redis connection (`ConnectionManager`, cluster connections).
///
/// The connection is cloned per operation, so multiplexed connections are shared rather than
/// pooled.
#[derive(Clone)]
pub struct RedisCasStore<C> {
    connection: C,
    script: Script,
}

impl<C> std::fmt::Debug for RedisCasStore<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCasStore").field("connection", &"<redis connection>").finish()
    }
}

impl<C> RedisCasStore<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    pub fn new(connection: C) -> Self {
        Self { connection, script: Script::new(COMPARE_AND_SWAP) }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }
}

/// `PX` argument for the script; sub-millisecond TTLs round up so a write never persists.
fn ttl_arg(ttl: Option<Duration>) -> u64 {
    match ttl {
        None => 0,
        Some(ttl) => u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1),
    }
}

fn unavailable(err: redis::RedisError) -> ProxyError {
    tracing::warn!(target: "bucketproxy::redis", error = %err, "redis command failed");
    ProxyError::unavailable(BACKEND, err)
}

#[async_trait]
impl<C> CasStore for RedisCasStore<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn get(&self, key: &[u8]) -> ProxyResult<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        conn.get::<_, Option<Vec<u8>>>(key).await.map_err(unavailable)
    }

    async fn compare_and_swap(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new: &[u8],
        ttl: Option<Duration>,
    ) -> ProxyResult<bool> {
        let mut conn = self.connection.clone();
        let swapped: i64 = self
            .script
            .key(key)
            .arg(if expected.is_some() { "1" } else { "0" })
            .arg(expected.unwrap_or_default())
            .arg(new)
            .arg(ttl_arg(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(swapped == 1)
    }

    async fn delete(&self, key: &[u8]) -> ProxyResult<bool> {
        let mut conn = self.connection.clone();
        let removed: u64 = conn.del(key).await.map_err(unavailable)?;
        Ok(removed > 0)
    }
}
