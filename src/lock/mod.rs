//! Distributed lock for deduplicating scheduled runs.
//!
//! Several instances share one cron schedule; whichever obtains the lock
//! first runs the batch, the rest skip the tick. Locks are token-fenced:
//! release only deletes the key when the stored token matches, so an
//! expired lock re-obtained by another instance is never released by the
//! first.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::debug;
use uuid::Uuid;

/// Lock failure.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Backing store unreachable or misbehaving
    #[error("lock backend error: {0}")]
    Backend(String),
}

/// Result type for lock operations
pub type LockResult<T> = Result<T, LockError>;

/// Proof of a held lock; required to release it.
#[derive(Debug, Clone)]
pub struct LockGuard {
    /// Lock key
    pub key: String,
    /// Fencing token stored under the key
    pub token: String,
}

/// Mutual-exclusion collaborator.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try to obtain `key` for `ttl`. `None` means another holder has it.
    async fn obtain(&self, key: &str, ttl: Duration) -> LockResult<Option<LockGuard>>;

    /// Release a held lock. A no-op when the token no longer matches
    /// (the lock expired and moved on).
    async fn release(&self, guard: LockGuard) -> LockResult<()>;
}

/// Redis-backed lock: `SET key token NX PX ttl`, token-checked delete.
pub struct RedisLock {
    conn: ConnectionManager,
}

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

impl RedisLock {
    /// Connect to `redis_url` with an auto-reconnecting connection manager.
    pub async fn connect(redis_url: &str) -> LockResult<Self> {
        let client =
            redis::Client::open(redis_url).map_err(|e| LockError::Backend(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn obtain(&self, key: &str, ttl: Duration) -> LockResult<Option<LockGuard>> {
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;

        match reply {
            Some(_) => {
                debug!(key, "lock obtained");
                Ok(Some(LockGuard {
                    key: key.to_string(),
                    token,
                }))
            }
            None => Ok(None),
        }
    }

    async fn release(&self, guard: LockGuard) -> LockResult<()> {
        let mut conn = self.conn.clone();
        let _released: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&guard.key)
            .arg(&guard.token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;
        debug!(key = %guard.key, "lock released");
        Ok(())
    }
}

/// Process-local lock for tests and single-instance runs.
#[derive(Default)]
pub struct MemoryLock {
    held: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn obtain(&self, key: &str, ttl: Duration) -> LockResult<Option<LockGuard>> {
        let mut held = self.held.lock().expect("lock map poisoned");
        let now = Instant::now();
        if let Some((_, expiry)) = held.get(key) {
            if *expiry > now {
                return Ok(None);
            }
        }
        let token = Uuid::new_v4().to_string();
        held.insert(key.to_string(), (token.clone(), now + ttl));
        Ok(Some(LockGuard {
            key: key.to_string(),
            token,
        }))
    }

    async fn release(&self, guard: LockGuard) -> LockResult<()> {
        let mut held = self.held.lock().expect("lock map poisoned");
        if let Some((token, _)) = held.get(&guard.key) {
            if *token == guard.token {
                held.remove(&guard.key);
            }
        }
        Ok(())
    }
}
