//! Redis store backend.
//!
//! The bucket transaction runs as a server-side Lua script, so the whole
//! read-modify-write is one round trip and indivisible across every
//! serving process. The script returns token counts and retry delays as
//! strings: Redis coerces Lua numbers to integer replies, which would
//! truncate the fractional parts the engine depends on.
//!
//! Script eviction (`SCRIPT FLUSH`, store restart) is recovered from by
//! reloading and retrying exactly once; a second failure escalates.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tokio::sync::RwLock;

use crate::{AdmissionStore, RawDecision, StoreError};

/// Connection and per-request timeout against the store.
const STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Atomic consume-or-deny transaction. KEYS[1] = bucket key,
/// ARGV = max_tokens, refill_rate, now (unix seconds), ttl (seconds).
/// Replies {allowed, tokens, retry_after} with the numbers stringified.
const BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local max_tokens = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local tokens = tonumber(redis.call('HGET', key, 'tokens'))
local last_refill = tonumber(redis.call('HGET', key, 'last_refill'))

if not tokens then
    tokens = max_tokens - 1
    redis.call('HSET', key, 'tokens', tokens, 'last_refill', now)
    redis.call('EXPIRE', key, ttl)
    return {1, tostring(tokens), '0'}
end

local elapsed = math.max(0, now - last_refill)
tokens = math.min(max_tokens, tokens + elapsed * refill_rate)

if tokens >= 1 then
    tokens = tokens - 1
    redis.call('HSET', key, 'tokens', tokens, 'last_refill', now)
    redis.call('EXPIRE', key, ttl)
    return {1, tostring(tokens), '0'}
else
    return {0, '0', tostring((1 - tokens) / refill_rate)}
end
"#;

/// [`AdmissionStore`] backed by a Redis server.
pub struct RedisStore {
    conn: ConnectionManager,
    /// SHA of the loaded bucket script; refreshed after eviction.
    script_sha: RwLock<String>,
}

impl RedisStore {
    /// Connect and preload the bucket script.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Unavailable(format!("invalid redis url: {e}")))?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(STORE_TIMEOUT)
            .set_response_timeout(STORE_TIMEOUT);
        let conn = ConnectionManager::new_with_config(client, config)
            .await
            .map_err(|e| StoreError::Unavailable(format!("redis connect: {e}")))?;

        let store = Self { conn, script_sha: RwLock::new(String::new()) };
        let sha = store.load_script().await?;
        *store.script_sha.write().await = sha;
        Ok(store)
    }

    async fn load_script(&self) -> Result<String, StoreError> {
        let mut conn = self.conn.clone();
        let sha: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(BUCKET_SCRIPT)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(format!("script load: {e}")))?;
        tracing::debug!(%sha, "bucket script loaded");
        Ok(sha)
    }

    async fn eval_bucket(
        &self,
        sha: &str,
        key: &str,
        max_tokens: u32,
        refill_rate: f64,
        ttl_secs: u64,
        now: f64,
    ) -> redis::RedisResult<(i64, String, String)> {
        let mut conn = self.conn.clone();
        redis::cmd("EVALSHA")
            .arg(sha)
            .arg(1)
            .arg(key)
            .arg(max_tokens)
            .arg(refill_rate)
            .arg(now)
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
    }
}

fn is_noscript(err: &redis::RedisError) -> bool {
    err.kind() == redis::ErrorKind::NoScriptError
}

fn parse_reply((allowed, tokens, retry_after): (i64, String, String)) -> Result<RawDecision, StoreError> {
    let tokens: f64 = tokens
        .parse()
        .map_err(|_| StoreError::Unavailable(format!("malformed script reply: {tokens}")))?;
    let retry_after: f64 = retry_after
        .parse()
        .map_err(|_| StoreError::Unavailable(format!("malformed script reply: {retry_after}")))?;
    Ok(RawDecision { allowed: allowed == 1, tokens, retry_after })
}

#[async_trait]
impl AdmissionStore for RedisStore {
    async fn bucket_check(
        &self,
        key: &str,
        max_tokens: u32,
        refill_rate: f64,
        ttl_secs: u64,
        now: f64,
    ) -> Result<RawDecision, StoreError> {
        let sha = self.script_sha.read().await.clone();
        match self.eval_bucket(&sha, key, max_tokens, refill_rate, ttl_secs, now).await {
            Ok(reply) => parse_reply(reply),
            Err(e) if is_noscript(&e) => {
                // One reload-and-retry; a second eviction escalates.
                tracing::warn!("bucket script evicted from store, reloading");
                let sha = self.load_script().await?;
                *self.script_sha.write().await = sha.clone();
                match self.eval_bucket(&sha, key, max_tokens, refill_rate, ttl_secs, now).await {
                    Ok(reply) => parse_reply(reply),
                    Err(e) if is_noscript(&e) => {
                        Err(StoreError::ScriptMissing(format!("script lost after reload: {e}")))
                    }
                    Err(e) => Err(StoreError::Unavailable(format!("bucket check: {e}"))),
                }
            }
            Err(e) => Err(StoreError::Unavailable(format!("bucket check: {e}"))),
        }
    }

    async fn history_push(
        &self,
        key: &str,
        entry: &str,
        capacity: usize,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .lpush(key, entry)
            .ltrim(key, 0, capacity as isize - 1)
            .expire(key, ttl_secs as i64)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(format!("history push: {e}")))?;
        Ok(())
    }

    async fn history_read(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("LRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(format!("history read: {e}")))
    }
}
