//! Redis-backed idempotency storage
//!
//! ## Key layout
//!
//! - `idempotency:lock:{key}`: lock token, `SET NX PX`
//! - `idempotency:meta:{key}`: JSON metadata (status, headers, data key)
//! - `idempotency:data:{random}`: raw response body
//!
//! Metadata and body carry independent TTLs. A metadata entry whose body has
//! already expired, or that no longer parses, is deleted on read and treated
//! as a miss.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use redis_utils::{compare_and_delete, set_nx_px, with_timeout_of, SharedConnectionManager};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::storage::{CapturedResponse, IdempotencyStorage, LockToken};
use super::IdempotencyError;

#[derive(Debug, Clone)]
pub struct RedisIdempotencyConfig {
    pub lock_prefix: String,
    pub meta_prefix: String,
    pub data_prefix: String,
    pub meta_ttl: Duration,
    pub data_ttl: Duration,
    /// Upper bound for each Redis round trip
    pub timeout: Duration,
}

impl Default for RedisIdempotencyConfig {
    fn default() -> Self {
        Self {
            lock_prefix: "idempotency:lock:".to_string(),
            meta_prefix: "idempotency:meta:".to_string(),
            data_prefix: "idempotency:data:".to_string(),
            meta_ttl: Duration::from_secs(24 * 60 * 60),
            data_ttl: Duration::from_secs(24 * 60 * 60),
            timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredMeta {
    status_code: u16,
    headers: BTreeMap<String, Vec<String>>,
    data_key: String,
    created_at: DateTime<Utc>,
}

pub struct RedisIdempotencyStorage {
    redis: SharedConnectionManager,
    config: RedisIdempotencyConfig,
}

impl RedisIdempotencyStorage {
    pub fn new(redis: SharedConnectionManager, config: RedisIdempotencyConfig) -> Self {
        Self { redis, config }
    }

    async fn connection(&self) -> ConnectionManager {
        self.redis.lock().await.clone()
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}{}", self.config.lock_prefix, key)
    }

    fn meta_key(&self, key: &str) -> String {
        format!("{}{}", self.config.meta_prefix, key)
    }

    fn new_data_key(&self) -> String {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        format!("{}{}", self.config.data_prefix, hex::encode(bytes))
    }

    async fn discard_meta(&self, conn: &mut ConnectionManager, meta_key: &str) {
        let result: redis::RedisResult<()> =
            with_timeout_of(self.config.timeout, conn.del(meta_key)).await;
        if let Err(e) = result {
            warn!(error = %e, "failed to delete stale idempotency metadata");
        }
    }
}

#[async_trait]
impl IdempotencyStorage for RedisIdempotencyStorage {
    async fn acquire_lock(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockToken>, IdempotencyError> {
        let token = LockToken::generate();
        let lock_key = self.lock_key(key);
        let mut conn = self.connection().await;

        let acquired = with_timeout_of(
            self.config.timeout,
            set_nx_px(&mut conn, &lock_key, token.as_str(), ttl),
        )
        .await?;

        Ok(acquired.then_some(token))
    }

    async fn release_lock(&self, key: &str, token: &LockToken) -> Result<(), IdempotencyError> {
        let lock_key = self.lock_key(key);
        let mut conn = self.connection().await;

        let released = with_timeout_of(
            self.config.timeout,
            compare_and_delete(&mut conn, &lock_key, token.as_str()),
        )
        .await?;

        if !released {
            debug!("idempotency lock already expired or owned by another request");
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CapturedResponse>, IdempotencyError> {
        let meta_key = self.meta_key(key);
        let mut conn = self.connection().await;

        let raw: Option<String> = with_timeout_of(self.config.timeout, conn.get(&meta_key)).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let meta: StoredMeta = match serde_json::from_str(&raw) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(error = %e, "corrupted idempotency metadata, discarding");
                self.discard_meta(&mut conn, &meta_key).await;
                return Ok(None);
            }
        };

        let body: Option<Vec<u8>> =
            with_timeout_of(self.config.timeout, conn.get(&meta.data_key)).await?;
        let Some(body) = body else {
            warn!("idempotency response body expired before metadata, discarding");
            self.discard_meta(&mut conn, &meta_key).await;
            return Ok(None);
        };

        Ok(Some(CapturedResponse {
            status_code: meta.status_code,
            headers: meta.headers,
            body,
        }))
    }

    async fn store(&self, key: &str, response: &CapturedResponse) -> Result<(), IdempotencyError> {
        let data_key = self.new_data_key();
        let meta = StoredMeta {
            status_code: response.status_code,
            headers: response.headers.clone(),
            data_key: data_key.clone(),
            created_at: Utc::now(),
        };
        let meta_json =
            serde_json::to_string(&meta).map_err(|e| IdempotencyError::Storage(e.to_string()))?;

        let mut conn = self.connection().await;

        // Body first so metadata never points at a missing payload.
        let _: () = with_timeout_of(
            self.config.timeout,
            redis::cmd("SET")
                .arg(&data_key)
                .arg(response.body.as_slice())
                .arg("EX")
                .arg(self.config.data_ttl.as_secs().max(1))
                .query_async(&mut conn),
        )
        .await?;

        let stored: redis::RedisResult<()> = with_timeout_of(
            self.config.timeout,
            redis::cmd("SET")
                .arg(self.meta_key(key))
                .arg(meta_json)
                .arg("EX")
                .arg(self.config.meta_ttl.as_secs().max(1))
                .query_async(&mut conn),
        )
        .await;

        if let Err(e) = stored {
            let cleanup: redis::RedisResult<()> =
                with_timeout_of(self.config.timeout, conn.del(&data_key)).await;
            if let Err(cleanup_err) = cleanup {
                warn!(error = %cleanup_err, "failed to delete orphaned idempotency body");
            }
            return Err(e.into());
        }

        Ok(())
    }
}
