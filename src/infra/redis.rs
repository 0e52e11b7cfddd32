//! Redis-backed cache store.
//!
//! Entries are JSON strings under `<prefix>:entry:<key>` written with an
//! expiry. Every tag is a sorted set `<prefix>:tag:<tag>` of the entry names
//! that carry it, scored by the entry's expiry time. Storing prunes members
//! whose entries have expired and keeps the set alive at least as long as
//! its newest member; flushing deletes the members and the sets. Both run as
//! Lua scripts, so a store never interleaves with a flush. The scripts touch
//! entry names read from the sets, which ties this backend to a single
//! (non-cluster) Redis node.

use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client, RedisError, Script, aio::ConnectionManager};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::cache::{BackendError, CacheBackend, CacheKey, MAX_TTL, TagSet};

/// KEYS[1] entry, KEYS[2..] tag sets; ARGV[1] JSON value, ARGV[2] TTL seconds.
const STORE_SCRIPT: &str = r"
local ttl = tonumber(ARGV[2])
local now = tonumber(redis.call('TIME')[1])
redis.call('SET', KEYS[1], ARGV[1], 'EX', ttl)
for i = 2, #KEYS do
    local set = KEYS[i]
    redis.call('ZADD', set, now + ttl, KEYS[1])
    redis.call('ZREMRANGEBYSCORE', set, '-inf', now)
    if redis.call('TTL', set) < ttl then
        redis.call('EXPIRE', set, ttl)
    end
end
return 1
";

/// KEYS: tag sets. Returns the number of entries deleted.
const FLUSH_SCRIPT: &str = r"
local removed = 0
for _, set in ipairs(KEYS) do
    local members = redis.call('ZRANGE', set, 0, -1)
    for i = 1, #members, 500 do
        removed = removed + redis.call('DEL', unpack(members, i, math.min(i + 499, #members)))
    end
    redis.call('DEL', set)
end
return removed
";

#[derive(Clone)]
pub struct RedisBackend {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisBackend {
    /// Open a managed connection; fails when the server cannot be reached.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, BackendError> {
        let client = Client::open(url).map_err(unavailable)?;
        // The manager retries with backoff; try one connection first so a dead server fails fast.
        client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;
        let manager = ConnectionManager::new(client).await.map_err(unavailable)?;
        Ok(Self {
            manager,
            prefix: prefix.into(),
        })
    }

    fn entry_name(&self, key: &CacheKey) -> String {
        entry_name(&self.prefix, key)
    }

    fn tag_name(&self, tag: &str) -> String {
        tag_name(&self.prefix, tag)
    }
}

fn entry_name(prefix: &str, key: &CacheKey) -> String {
    format!("{prefix}:entry:{key}")
}

fn tag_name(prefix: &str, tag: &str) -> String {
    format!("{prefix}:tag:{tag}")
}

/// Whole seconds for `SET EX`, never below one nor above [`MAX_TTL`].
fn expiry_seconds(ttl: Duration) -> u64 {
    let ttl = ttl.min(MAX_TTL);
    let seconds = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        seconds.saturating_add(1)
    } else {
        seconds.max(1)
    }
}

fn unavailable(err: RedisError) -> BackendError {
    BackendError::unavailable(err.to_string())
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>, BackendError> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn.get(self.entry_name(key)).await.map_err(unavailable)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, value, tags), fields(key = %key, tag_count = tags.len()))]
    async fn put(
        &self,
        key: &CacheKey,
        value: Value,
        tags: &TagSet,
        ttl: Duration,
    ) -> Result<(), BackendError> {
        let entry = self.entry_name(key);
        let encoded = serde_json::to_string(&value)?;

        let script = Script::new(STORE_SCRIPT);
        let mut invocation = script.key(&entry);
        for tag in tags {
            invocation.key(self.tag_name(tag));
        }
        invocation.arg(encoded).arg(expiry_seconds(ttl));

        let mut conn = self.manager.clone();
        let _: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    #[instrument(skip(self, tags), fields(tag_count = tags.len()))]
    async fn flush_tags(&self, tags: &TagSet) -> Result<(), BackendError> {
        if tags.is_empty() {
            return Ok(());
        }
        let script = Script::new(FLUSH_SCRIPT);
        let mut invocation = script.prepare_invoke();
        for tag in tags {
            invocation.key(self.tag_name(tag));
        }

        let mut conn = self.manager.clone();
        let entry_count: u64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        debug!(cache = "redis", entry_count, "flushed tagged entries");
        Ok(())
    }
}
