//! # Actix Middleware Library
//!
//! Middleware shared by the identity HTTP surface
//!
//! ## Modules
//! - `idempotency`: per-key lock plus response replay for mutating routes
//! - `auth`: bearer authentication that swaps the access token for an internal token
//! - `metrics`: Prometheus metrics middleware and exposition handler

pub mod auth;
pub mod idempotency;
pub mod metrics;

pub use auth::{AuthError, Authenticator, BearerAuthMiddleware, InternalToken, MissingInternalToken};
pub use idempotency::{
    CapturedResponse, IdempotencyConfig, IdempotencyError, IdempotencyMiddleware,
    IdempotencyStorage, InMemoryIdempotencyStorage, LockToken, RedisIdempotencyConfig,
    RedisIdempotencyStorage,
};
pub use metrics::{metrics_handler, MetricsMiddleware};
