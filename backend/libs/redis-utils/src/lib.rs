//! Redis plumbing shared by the identity backend
//!
//! - [`RedisPool`]: a single multiplexed `ConnectionManager` behind a Tokio mutex
//! - [`with_timeout`]: bounds every round trip so no caller waits forever
//! - [`set_nx_px`] / [`compare_and_delete`]: the two atomic primitives the
//!   idempotency lock is built on

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{Client, ErrorKind, RedisError, RedisResult, Script};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Shared Redis connection manager guarded by a Tokio mutex.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Upper bound for a single Redis round trip when the caller does not pick one.
pub const DEFAULT_REDIS_TIMEOUT: Duration = Duration::from_secs(1);

/// Deletes KEYS[1] only while it still holds ARGV[1].
static COMPARE_AND_DELETE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#,
    )
});

/// Redis connection pool.
pub struct RedisPool {
    manager: SharedConnectionManager,
}

impl RedisPool {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("failed to parse REDIS_URL connection string")?;
        let connection_manager = ConnectionManager::new(client)
            .await
            .context("failed to initialize Redis connection manager")?;
        info!("Redis connection manager initialized");

        Ok(Self {
            manager: Arc::new(Mutex::new(connection_manager)),
        })
    }

    pub fn manager(&self) -> SharedConnectionManager {
        self.manager.clone()
    }
}

/// Run a Redis future under [`DEFAULT_REDIS_TIMEOUT`].
pub async fn with_timeout<T, F>(future: F) -> RedisResult<T>
where
    F: Future<Output = RedisResult<T>>,
{
    with_timeout_of(DEFAULT_REDIS_TIMEOUT, future).await
}

/// Run a Redis future under an explicit deadline.
///
/// An elapsed deadline surfaces as an `IoError` so callers handle it like any
/// other transport failure.
pub async fn with_timeout_of<T, F>(duration: Duration, future: F) -> RedisResult<T>
where
    F: Future<Output = RedisResult<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => {
            debug!(timeout_ms = duration.as_millis() as u64, "redis operation timed out");
            Err(RedisError::from((
                ErrorKind::IoError,
                "redis operation timed out",
            )))
        }
    }
}

/// `SET key value NX PX ttl`; returns whether the key was created.
pub async fn set_nx_px(
    conn: &mut ConnectionManager,
    key: &str,
    value: &str,
    ttl: Duration,
) -> RedisResult<bool> {
    let reply: Option<String> = redis::cmd("SET")
        .arg(key)
        .arg(value)
        .arg("NX")
        .arg("PX")
        .arg(ttl.as_millis().max(1) as u64)
        .query_async(conn)
        .await?;
    Ok(reply.is_some())
}

/// Delete `key` only if it still holds `expected`; returns whether it was deleted.
pub async fn compare_and_delete(
    conn: &mut ConnectionManager,
    key: &str,
    expected: &str,
) -> RedisResult<bool> {
    let deleted: i64 = COMPARE_AND_DELETE
        .key(key)
        .arg(expected)
        .invoke_async(conn)
        .await?;
    Ok(deleted == 1)
}
