//! Wire-level response envelope for identity HTTP APIs
//!
//! Every handler answers with either `{"data": ...}` or
//! `{"error_type": ..., "error_message": ..., "error_details": [...]}`.
//! `error_type` values are part of the public contract and never change
//! once published; clients branch on them.

use serde::{Deserialize, Serialize};

/// Stable `error_type` codes
pub mod error_types {
    pub const INTERNAL: &str = "internal";
    pub const INVALID_JSON: &str = "invalid_json";
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NOT_FOUND: &str = "not_found";

    pub const IDEMPOTENCY_KEY_MISSING: &str = "idempotency_key_missing";
    pub const INVALID_IDEMPOTENCY_KEY: &str = "invalid_idempotency_key";
    pub const REQUEST_IN_PROGRESS: &str = "request_in_progress";

    pub const USER_NOT_FOUND: &str = "user_not_found";
    pub const SEND_CODE_FREQ_EXCEEDED: &str = "send_code_freq_exceeded";
    pub const SIGNIN_KEY_NOT_FOUND: &str = "signin_key_not_found";
    pub const WRONG_CODE: &str = "wrong_code";

    pub const REFRESH_TOKEN_EXPIRED: &str = "refresh_token_expired";
    pub const REFRESH_TOKEN_INVALIDATED: &str = "refresh_token_invalidated";
    pub const INVALID_TOKEN: &str = "invalid_token";
    pub const INVALID_TOKEN_TYPE: &str = "invalid_token_type";

    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const ACCESS_TOKEN_EXPIRED: &str = "access_token_expired";
}

/// Field-level validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub field: String,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Failure envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_type: String,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Vec<ErrorDetail>>,
}

impl ErrorResponse {
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            error_message: error_message.into(),
            error_details: None,
        }
    }

    pub fn with_details(mut self, details: Vec<ErrorDetail>) -> Self {
        self.error_details = Some(details);
        self
    }

    /// Generic 500 body; never carries the underlying cause
    pub fn internal() -> Self {
        Self::new(error_types::INTERNAL, "Internal Server Error")
    }
}

/// Success envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse<T> {
    pub data: T,
}

impl<T> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}
