use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use error_types::{error_types as codes, ErrorDetail, ErrorResponse};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IdentityError>;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Sign in key was not found")]
    SignInKeyNotFound,

    #[error("Wrong email verification code")]
    WrongCode,

    #[error("Refresh token expired")]
    RefreshTokenExpired,

    #[error("Refresh token invalidated")]
    RefreshTokenInvalidated,

    #[error("Access token expired")]
    AccessTokenExpired,

    #[error("Invalid or malformed JWT token")]
    InvalidJwt,

    #[error("Invalid token type")]
    InvalidTokenType,

    #[error("Invalid token claims")]
    InvalidClaims,

    #[error("User not found")]
    UserNotFound,

    #[error("Send code operation frequency exceeded")]
    SendCodeFreqExceeded,

    #[error("Validation failed")]
    Validation(Vec<ErrorDetail>),

    #[error("Failed to revoke token: {0}")]
    RevokeTokenFailed(String),

    #[error("Failed to generate token pair: {0}")]
    TokenGenerationFailed(String),

    #[error("Failed to generate internal token: {0}")]
    InternalTokenGenerationFailed(String),

    #[error("Internal token missing from request context")]
    MissingInternalToken,

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Email error: {0}")]
    Email(String),

    #[error("User directory error: {0}")]
    UserDirectory(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IdentityError {
    /// Wire error code from the shared envelope vocabulary
    pub fn error_type(&self) -> &'static str {
        match self {
            IdentityError::SignInKeyNotFound => codes::SIGNIN_KEY_NOT_FOUND,
            IdentityError::WrongCode => codes::WRONG_CODE,
            IdentityError::RefreshTokenExpired => codes::REFRESH_TOKEN_EXPIRED,
            IdentityError::RefreshTokenInvalidated => codes::REFRESH_TOKEN_INVALIDATED,
            IdentityError::AccessTokenExpired => codes::ACCESS_TOKEN_EXPIRED,
            IdentityError::InvalidJwt | IdentityError::InvalidClaims => codes::INVALID_TOKEN,
            IdentityError::InvalidTokenType => codes::INVALID_TOKEN_TYPE,
            IdentityError::UserNotFound => codes::USER_NOT_FOUND,
            IdentityError::SendCodeFreqExceeded => codes::SEND_CODE_FREQ_EXCEEDED,
            IdentityError::Validation(_) => codes::VALIDATION_FAILED,
            IdentityError::RevokeTokenFailed(_)
            | IdentityError::TokenGenerationFailed(_)
            | IdentityError::InternalTokenGenerationFailed(_)
            | IdentityError::MissingInternalToken
            | IdentityError::Redis(_)
            | IdentityError::Email(_)
            | IdentityError::UserDirectory(_)
            | IdentityError::Internal(_) => codes::INTERNAL,
        }
    }

    fn is_internal(&self) -> bool {
        self.error_type() == codes::INTERNAL
    }
}

impl ResponseError for IdentityError {
    fn status_code(&self) -> StatusCode {
        match self {
            IdentityError::SignInKeyNotFound | IdentityError::UserNotFound => StatusCode::NOT_FOUND,
            IdentityError::AccessTokenExpired => StatusCode::UNAUTHORIZED,
            IdentityError::WrongCode
            | IdentityError::RefreshTokenExpired
            | IdentityError::RefreshTokenInvalidated
            | IdentityError::InvalidJwt
            | IdentityError::InvalidTokenType
            | IdentityError::InvalidClaims
            | IdentityError::SendCodeFreqExceeded
            | IdentityError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = if self.is_internal() {
            // Don't leak internal details
            tracing::error!(error = %self, "request failed");
            ErrorResponse::internal()
        } else {
            let body = ErrorResponse::new(self.error_type(), self.to_string());
            match self {
                IdentityError::Validation(details) => body.with_details(details.clone()),
                _ => body,
            }
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

impl From<redis::RedisError> for IdentityError {
    fn from(err: redis::RedisError) -> Self {
        tracing::error!("Redis error: {}", err);
        IdentityError::Redis(err.to_string())
    }
}

impl From<serde_json::Error> for IdentityError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("Serialization error: {}", err);
        IdentityError::Internal(err.to_string())
    }
}

impl From<actix_middleware::MissingInternalToken> for IdentityError {
    fn from(_: actix_middleware::MissingInternalToken) -> Self {
        IdentityError::MissingInternalToken
    }
}
