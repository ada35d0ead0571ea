/// Request handlers for the `/v1.0` routes
use super::HttpState;
use crate::error::{IdentityError, Result};
use crate::security::token_issuer::{CLAIM_NAME, CLAIM_USERNAME};
use crate::security::TokenPair;
use actix_middleware::InternalToken;
use actix_web::{web, HttpRequest, HttpResponse};
use crypto_core::jwt::CLAIM_SUBJECT;
use error_types::{ErrorDetail, SuccessResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SendEmailCodeRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct SendEmailCodeResponse {
    pub signin_key: Uuid,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SignInRequest {
    pub signin_key: Uuid,
    pub code: String,
}

/// Body of `/refresh-token` and `/sign-out`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct IdentityResponse {
    pub sub: String,
    pub name: String,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct Empty {}

impl SendEmailCodeRequest {
    fn validate(&self) -> Result<&str> {
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(IdentityError::Validation(vec![ErrorDetail::new(
                "email",
                "must be a valid email address",
            )]));
        }
        Ok(email)
    }
}

impl SignInRequest {
    fn validate(&self) -> Result<()> {
        let mut details = Vec::new();
        if self.signin_key.is_nil() {
            details.push(ErrorDetail::new("signin_key", "is required"));
        }
        if self.code.trim().is_empty() {
            details.push(ErrorDetail::new("code", "is required"));
        }
        if details.is_empty() {
            Ok(())
        } else {
            Err(IdentityError::Validation(details))
        }
    }
}

impl RefreshTokenRequest {
    fn validate(&self) -> Result<&str> {
        let token = self.refresh_token.trim();
        if token.is_empty() {
            return Err(IdentityError::Validation(vec![ErrorDetail::new(
                "refresh_token",
                "is required",
            )]));
        }
        Ok(token)
    }
}

/// POST /v1.0/signin/send-email-code
pub async fn send_email_code(
    state: web::Data<HttpState>,
    payload: web::Json<SendEmailCodeRequest>,
) -> Result<HttpResponse> {
    let email = payload.validate()?;
    let signin_key = state.send_code.send_code(email).await?;
    Ok(HttpResponse::Ok().json(SuccessResponse::new(SendEmailCodeResponse { signin_key })))
}

/// POST /v1.0/signin
pub async fn sign_in(
    state: web::Data<HttpState>,
    payload: web::Json<SignInRequest>,
) -> Result<HttpResponse> {
    payload.validate()?;
    let pair: TokenPair = state
        .signin
        .sign_in(payload.signin_key, payload.code.trim())
        .await?;
    Ok(HttpResponse::Ok().json(SuccessResponse::new(pair)))
}

/// POST /v1.0/refresh-token
pub async fn refresh_token(
    state: web::Data<HttpState>,
    payload: web::Json<RefreshTokenRequest>,
) -> Result<HttpResponse> {
    let token = payload.validate()?;
    let pair = state.refresh.refresh(token).await?;
    Ok(HttpResponse::Ok().json(SuccessResponse::new(pair)))
}

/// PUT /v1.0/sign-out
pub async fn sign_out(
    state: web::Data<HttpState>,
    payload: web::Json<RefreshTokenRequest>,
) -> Result<HttpResponse> {
    let token = payload.validate()?;
    state.signout.sign_out(token).await?;
    Ok(HttpResponse::Ok().json(SuccessResponse::new(Empty {})))
}

/// GET /v1.0/identity
///
/// Reads back the internal token the bearer middleware attached.
pub async fn identity(state: web::Data<HttpState>, req: HttpRequest) -> Result<HttpResponse> {
    let internal = InternalToken::from_http_request(&req)?;
    let claims = state.issuer.validate_internal_token(internal.as_str())?;

    let field = |name: &str| claims.get_str(name).unwrap_or_default().to_string();
    Ok(HttpResponse::Ok().json(SuccessResponse::new(IdentityResponse {
        sub: field(CLAIM_SUBJECT),
        name: field(CLAIM_NAME),
        username: field(CLAIM_USERNAME),
    })))
}
