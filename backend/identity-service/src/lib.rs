/// Identity Service Library
///
/// Passwordless sign-in, refresh token rotation and trust escalation for the
/// identity backend.
///
/// ## Modules
///
/// - `config`: Service configuration
/// - `error`: Error types and their HTTP mapping
/// - `grpc`: User service client
/// - `http`: HTTP routes and handlers
/// - `infrastructure`: Sign-in session store
/// - `security`: Token issuer and token revocation
/// - `services`: Sign-in flows, email, user directory
pub mod config;
pub mod error;
pub mod grpc;
pub mod http;
pub mod infrastructure;
pub mod security;
pub mod services;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use error::{IdentityError, Result};
