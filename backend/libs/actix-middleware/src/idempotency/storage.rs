//! Storage contract for the idempotency guard

use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, HttpResponseBuilder};
use async_trait::async_trait;
use rand::RngCore;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::warn;

use super::IdempotencyError;

/// Headers that describe the original connection rather than the response
const HOP_BY_HOP_HEADERS: [&str; 4] = [
    "connection",
    "content-length",
    "transfer-encoding",
    "keep-alive",
];

/// Opaque proof of lock ownership
///
/// Issued by [`IdempotencyStorage::acquire_lock`] and required to release the
/// same lock; a release with any other token is a no-op.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// 128 random bits, hex encoded
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LockToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LockToken(..)")
    }
}

/// A response as it left the handler, ready to be replayed verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: Vec<u8>,
}

impl CapturedResponse {
    /// Snapshot status, headers and body; hop-by-hop headers are dropped
    ///
    /// Header values must be visible ASCII to be stored; others are skipped
    /// with a warning and will be missing from replays.
    pub fn capture(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Self {
        let mut captured: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in headers.iter() {
            let name = name.as_str();
            if HOP_BY_HOP_HEADERS.contains(&name) {
                continue;
            }
            match value.to_str() {
                Ok(value) => captured
                    .entry(name.to_string())
                    .or_default()
                    .push(value.to_string()),
                Err(_) => warn!(
                    header = name,
                    "header value is not visible ASCII, dropped from idempotent replay"
                ),
            }
        }

        Self {
            status_code: status.as_u16(),
            headers: captured,
            body: body.to_vec(),
        }
    }

    /// Server errors and rate-limit rejections are never memoized
    pub fn is_cacheable(&self) -> bool {
        is_cacheable_status(self.status_code)
    }

    /// Rebuild the response exactly as it was captured
    pub fn to_http_response(&self) -> HttpResponse {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut builder = HttpResponseBuilder::new(status);
        for (name, values) in &self.headers {
            let Ok(name) = HeaderName::try_from(name.as_str()) else {
                continue;
            };
            for value in values {
                if let Ok(value) = HeaderValue::from_str(value) {
                    builder.append_header((name.clone(), value));
                }
            }
        }
        builder.body(self.body.clone())
    }
}

pub fn is_cacheable_status(status_code: u16) -> bool {
    status_code < 500 && status_code != 429
}

/// Backing store for locks and captured responses
///
/// Implementations must make `acquire_lock` a single atomic "create if
/// absent" and `release_lock` an atomic compare-and-delete on the token.
#[async_trait]
pub trait IdempotencyStorage: Send + Sync {
    /// Single-shot lock attempt; `None` when another holder owns the key
    async fn acquire_lock(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockToken>, IdempotencyError>;

    /// Release only if `token` still owns the lock
    async fn release_lock(&self, key: &str, token: &LockToken) -> Result<(), IdempotencyError>;

    async fn get(&self, key: &str) -> Result<Option<CapturedResponse>, IdempotencyError>;

    async fn store(&self, key: &str, response: &CapturedResponse) -> Result<(), IdempotencyError>;
}
