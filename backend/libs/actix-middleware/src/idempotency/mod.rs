//! Idempotency guard for mutating endpoints
//!
//! Every request must carry an `Idempotency-Key` header. For a given key:
//!
//! 1. One non-blocking attempt is made to take the key's lock. A request that
//!    loses the race gets `409 request_in_progress` immediately; nothing queues.
//! 2. With the lock held, a cached response is replayed verbatim if present.
//! 3. Otherwise the handler runs once and its response is captured. Responses
//!    with status `< 500` and `!= 429` are stored with bounded linear-backoff
//!    retries; a storage failure after the last retry is logged and swallowed.
//! 4. The lock is released with the ownership token issued at acquisition,
//!    including when the request future is dropped mid-flight.
//!
//! ```text
//! Idle -> LockAttempted -> LockDenied (409)
//!                       -> LockHeld -> CacheChecked -> Replaying
//!                                                   -> Executing -> Captured -> StoreAttempted -> LockReleased
//! ```

mod memory;
mod redis_store;
mod storage;

pub use memory::InMemoryIdempotencyStorage;
pub use redis_store::{RedisIdempotencyConfig, RedisIdempotencyStorage};
pub use storage::{is_cacheable_status, CapturedResponse, IdempotencyStorage, LockToken};

use actix_web::{
    body::{to_bytes, BoxBody, MessageBody},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::StatusCode,
    Error, HttpResponse, ResponseError,
};
use error_types::{error_types as codes, ErrorResponse};
use futures::future::{ready, Ready};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::metrics::record_idempotency_outcome;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error("Idempotency key missing")]
    KeyMissing,

    #[error("Idempotency key must be at most 255 characters")]
    InvalidKey,

    #[error("Another request with same idempotency key is being processed")]
    RequestInProgress,

    #[error("Idempotency storage error: {0}")]
    Storage(String),
}

impl From<redis::RedisError> for IdempotencyError {
    fn from(err: redis::RedisError) -> Self {
        IdempotencyError::Storage(err.to_string())
    }
}

impl ResponseError for IdempotencyError {
    fn status_code(&self) -> StatusCode {
        match self {
            IdempotencyError::KeyMissing | IdempotencyError::InvalidKey => StatusCode::BAD_REQUEST,
            IdempotencyError::RequestInProgress => StatusCode::CONFLICT,
            IdempotencyError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse<BoxBody> {
        let body = match self {
            IdempotencyError::KeyMissing => {
                ErrorResponse::new(codes::IDEMPOTENCY_KEY_MISSING, self.to_string())
            }
            IdempotencyError::InvalidKey => {
                ErrorResponse::new(codes::INVALID_IDEMPOTENCY_KEY, self.to_string())
            }
            IdempotencyError::RequestInProgress => {
                ErrorResponse::new(codes::REQUEST_IN_PROGRESS, self.to_string())
            }
            // Don't leak storage details
            IdempotencyError::Storage(_) => ErrorResponse::internal(),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// How long a lock survives if its holder never releases it
    pub lock_ttl: Duration,
    /// Total store attempts for a captured response
    pub retry_count: u32,
    /// Base delay; attempt `n` waits `n * retry_delay` before the next one
    pub retry_delay: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(30),
            retry_count: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

// ============================================================================
// Middleware
// ============================================================================

pub struct IdempotencyMiddleware {
    storage: Arc<dyn IdempotencyStorage>,
    config: IdempotencyConfig,
}

impl IdempotencyMiddleware {
    pub fn new(storage: Arc<dyn IdempotencyStorage>, config: IdempotencyConfig) -> Self {
        Self { storage, config }
    }
}

impl<S, B> Transform<S, ServiceRequest> for IdempotencyMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = IdempotencyMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(IdempotencyMiddlewareService {
            service: Rc::new(service),
            storage: self.storage.clone(),
            config: self.config.clone(),
        }))
    }
}

pub struct IdempotencyMiddlewareService<S> {
    service: Rc<S>,
    storage: Arc<dyn IdempotencyStorage>,
    config: IdempotencyConfig,
}

impl<S, B> Service<ServiceRequest> for IdempotencyMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let storage = self.storage.clone();
        let config = self.config.clone();

        Box::pin(async move {
            let key = match idempotency_key(&req) {
                Ok(key) => key,
                Err(err) => {
                    record_idempotency_outcome(match err {
                        IdempotencyError::KeyMissing => "missing_key",
                        _ => "invalid_key",
                    });
                    return Ok(req.error_response(err));
                }
            };

            let token = match storage.acquire_lock(&key, config.lock_ttl).await {
                Ok(Some(token)) => token,
                Ok(None) => {
                    debug!("idempotency key already locked");
                    record_idempotency_outcome("conflict");
                    return Ok(req.error_response(IdempotencyError::RequestInProgress));
                }
                Err(err) => {
                    error!(error = %err, "failed to acquire idempotency lock");
                    return Ok(req.error_response(err));
                }
            };
            let lock = LockGuard::new(storage.clone(), key.clone(), token);

            match storage.get(&key).await {
                Ok(Some(cached)) => {
                    record_idempotency_outcome("replayed");
                    lock.release().await;
                    return Ok(req.into_response(cached.to_http_response()));
                }
                Ok(None) => {}
                Err(err) => {
                    error!(error = %err, "failed to read idempotent response");
                    lock.release().await;
                    return Ok(req.error_response(err));
                }
            }

            let http_req = req.request().clone();
            let res = match service.call(req).await {
                Ok(res) => res.map_into_boxed_body(),
                Err(err) => ServiceResponse::from_err(err, http_req),
            };

            let (http_req, response) = res.into_parts();
            let (response, body) = response.into_parts();
            let body = match to_bytes(body).await {
                Ok(body) => body,
                Err(err) => {
                    error!(error = %err, "failed to read handler response body");
                    lock.release().await;
                    let failure = HttpResponse::InternalServerError().json(ErrorResponse::internal());
                    return Ok(ServiceResponse::new(http_req, failure));
                }
            };

            let captured = CapturedResponse::capture(response.status(), response.headers(), &body);
            record_idempotency_outcome("executed");
            if captured.is_cacheable() {
                store_with_retry(storage.as_ref(), &key, &captured, &config).await;
            }
            lock.release().await;

            Ok(ServiceResponse::new(
                http_req,
                response.set_body(BoxBody::new(body)),
            ))
        })
    }
}

fn idempotency_key(req: &ServiceRequest) -> Result<String, IdempotencyError> {
    let value = req
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .ok_or(IdempotencyError::KeyMissing)?;
    let key = value.to_str().map_err(|_| IdempotencyError::InvalidKey)?;

    if key.is_empty() {
        return Err(IdempotencyError::KeyMissing);
    }
    if key.chars().count() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(IdempotencyError::InvalidKey);
    }
    Ok(key.to_string())
}

/// Bounded retries with linearly growing delay; failures are swallowed.
async fn store_with_retry(
    storage: &dyn IdempotencyStorage,
    key: &str,
    captured: &CapturedResponse,
    config: &IdempotencyConfig,
) -> bool {
    let attempts = config.retry_count.max(1);
    for attempt in 1..=attempts {
        match storage.store(key, captured).await {
            Ok(()) => return true,
            Err(err) => {
                warn!(attempt, error = %err, "failed to store idempotent response");
                if attempt < attempts {
                    tokio::time::sleep(config.retry_delay * attempt).await;
                }
            }
        }
    }

    error!(attempts, "giving up on storing idempotent response");
    record_idempotency_outcome("store_failed");
    false
}

// ============================================================================
// Lock release
// ============================================================================

/// Releases the idempotency lock exactly once
///
/// The normal path awaits [`LockGuard::release`]. If the request future is
/// dropped first, `Drop` hands the release to the runtime.
struct LockGuard {
    storage: Arc<dyn IdempotencyStorage>,
    key: String,
    token: Option<LockToken>,
}

impl LockGuard {
    fn new(storage: Arc<dyn IdempotencyStorage>, key: String, token: LockToken) -> Self {
        Self {
            storage,
            key,
            token: Some(token),
        }
    }

    async fn release(mut self) {
        if let Some(token) = self.token.take() {
            if let Err(err) = self.storage.release_lock(&self.key, &token).await {
                warn!(error = %err, "failed to release idempotency lock");
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let storage = self.storage.clone();
        let key = std::mem::take(&mut self.key);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = storage.release_lock(&key, &token).await {
                        warn!(error = %err, "failed to release idempotency lock after cancellation");
                    }
                });
            }
            Err(_) => warn!("no runtime to release idempotency lock; it will expire by TTL"),
        }
    }
}
