/// Token Revocation Store
///
/// Records a token as revoked until its natural expiry.
///
/// ## Storage
///
/// - Key: `revoked_token:{sha256(token) hex}`
/// - TTL: the token's remaining validity (at least one second), or the
///   configured fallback when the expiry is unknown
///
/// Hashing keeps raw tokens out of Redis dumps; the TTL keeps the revocation
/// list bounded by the lifetime of the tokens it protects.
use crate::error::Result;
use async_trait::async_trait;
use crypto_core::{hash::token_fingerprint, Clock};
use redis_utils::SharedConnectionManager;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const REVOKED_TOKEN_PREFIX: &str = "revoked_token";

const MIN_TOKEN_TTL_SECS: u64 = 1;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Mark `token` as revoked; `expires_at` is its `exp` claim in Unix seconds
    ///
    /// Returns `false` when a live revocation entry already existed, so at
    /// most one caller ever sees `true` for a given token.
    async fn revoke(&self, token: &str, expires_at: Option<i64>) -> Result<bool>;

    async fn is_revoked(&self, token: &str) -> Result<bool>;
}

pub fn revocation_key(token: &str) -> String {
    format!("{}:{}", REVOKED_TOKEN_PREFIX, token_fingerprint(token))
}

/// Seconds a revocation entry must live
fn revocation_ttl(now_secs: i64, expires_at: Option<i64>, fallback: Duration) -> u64 {
    match expires_at {
        Some(exp) if exp > now_secs => ((exp - now_secs) as u64).max(MIN_TOKEN_TTL_SECS),
        Some(_) => MIN_TOKEN_TTL_SECS,
        None => fallback.as_secs().max(MIN_TOKEN_TTL_SECS),
    }
}

// ============================================================================
// Redis
// ============================================================================

pub struct RedisRevocationStore {
    redis: SharedConnectionManager,
    clock: Arc<dyn Clock>,
    fallback_ttl: Duration,
    timeout: Duration,
}

impl RedisRevocationStore {
    pub fn new(
        redis: SharedConnectionManager,
        clock: Arc<dyn Clock>,
        fallback_ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            redis,
            clock,
            fallback_ttl,
            timeout,
        }
    }
}

#[async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn revoke(&self, token: &str, expires_at: Option<i64>) -> Result<bool> {
        let key = revocation_key(token);
        let ttl = revocation_ttl(self.clock.now().timestamp(), expires_at, self.fallback_ttl);

        let mut redis_conn = self.redis.lock().await.clone();
        let created: Option<String> = redis_utils::with_timeout_of(self.timeout, async {
            redis::cmd("SET")
                .arg(&key)
                .arg("revoked")
                .arg("NX")
                .arg("EX")
                .arg(ttl)
                .query_async(&mut redis_conn)
                .await
        })
        .await?;

        if created.is_none() {
            tracing::debug!("Token was already revoked");
            return Ok(false);
        }
        tracing::info!(
            "Token revoked, revocation entry will expire in {} seconds",
            ttl
        );
        Ok(true)
    }

    async fn is_revoked(&self, token: &str) -> Result<bool> {
        let key = revocation_key(token);

        let mut redis_conn = self.redis.lock().await.clone();
        let exists: bool = redis_utils::with_timeout_of(self.timeout, async {
            redis::cmd("EXISTS")
                .arg(&key)
                .query_async(&mut redis_conn)
                .await
        })
        .await?;

        Ok(exists)
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local revocation list with the same expiry rules as Redis
pub struct InMemoryRevocationStore {
    clock: Arc<dyn Clock>,
    fallback_ttl: Duration,
    /// fingerprint key -> expiry (Unix seconds)
    entries: Mutex<HashMap<String, i64>>,
}

impl InMemoryRevocationStore {
    pub fn new(clock: Arc<dyn Clock>, fallback_ttl: Duration) -> Self {
        Self {
            clock,
            fallback_ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn active_entries(&self) -> usize {
        let now = self.clock.now().timestamp();
        let entries = self.entries.lock().await;
        entries.values().filter(|exp| **exp > now).count()
    }
}

#[async_trait]
impl RevocationStore for InMemoryRevocationStore {
    async fn revoke(&self, token: &str, expires_at: Option<i64>) -> Result<bool> {
        let now = self.clock.now().timestamp();
        let ttl = revocation_ttl(now, expires_at, self.fallback_ttl);
        let mut entries = self.entries.lock().await;
        entries.retain(|_, exp| *exp > now);
        match entries.entry(revocation_key(token)) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(now + ttl as i64);
                Ok(true)
            }
        }
    }

    async fn is_revoked(&self, token: &str) -> Result<bool> {
        let now = self.clock.now().timestamp();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(&revocation_key(token))
            .is_some_and(|exp| *exp > now))
    }
}
