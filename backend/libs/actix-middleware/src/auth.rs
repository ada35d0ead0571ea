//! Bearer authentication with trust escalation
//!
//! Reads `Authorization: Bearer <access-token>`, hands the token to an
//! [`Authenticator`] and, on success, exposes the narrowed internal token to
//! handlers (request extensions) and to downstream services (`X-Internal-Token`
//! response header).

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue, AUTHORIZATION},
    http::StatusCode,
    Error, FromRequest, HttpMessage, HttpRequest, HttpResponse, ResponseError,
};
use error_types::{error_types as codes, ErrorResponse};
use futures::future::{ready, Ready};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use thiserror::Error;

pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Unauthorized")]
    MissingCredentials,

    #[error("Access token expired")]
    AccessTokenExpired,

    #[error("Invalid token type")]
    InvalidTokenType,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Authentication failed: {0}")]
    Internal(String),
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            AuthError::MissingCredentials => ErrorResponse::new(codes::UNAUTHORIZED, "Unauthorized"),
            AuthError::AccessTokenExpired => {
                ErrorResponse::new(codes::ACCESS_TOKEN_EXPIRED, "Access token expired")
            }
            AuthError::InvalidTokenType => {
                ErrorResponse::new(codes::INVALID_TOKEN_TYPE, "Invalid token type")
            }
            AuthError::InvalidToken => ErrorResponse::new(codes::INVALID_TOKEN, "Invalid token"),
            AuthError::Internal(_) => ErrorResponse::internal(),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

/// Exchanges a verified access token for an internal token
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, access_token: &str) -> Result<String, AuthError>;
}

/// Internal token attached by [`BearerAuthMiddleware`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalToken(pub String);

/// The route was reached without passing through [`BearerAuthMiddleware`]
#[derive(Debug, Clone, Copy, Error)]
#[error("internal token missing from request context")]
pub struct MissingInternalToken;

impl ResponseError for MissingInternalToken {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::InternalServerError().json(ErrorResponse::internal())
    }
}

impl InternalToken {
    /// Typed accessor for the token attached by [`BearerAuthMiddleware`]
    ///
    /// Absence means the route was wired without the middleware. Debug builds
    /// panic on it; release builds log and return [`MissingInternalToken`].
    pub fn from_http_request(req: &HttpRequest) -> Result<Self, MissingInternalToken> {
        let token = req.extensions().get::<InternalToken>().cloned();
        match token {
            Some(token) => Ok(token),
            None => {
                tracing::error!(path = %req.path(), "route requires bearer auth middleware but none ran");
                if cfg!(debug_assertions) {
                    panic!(
                        "route {} requires bearer auth middleware but none ran",
                        req.path()
                    );
                }
                Err(MissingInternalToken)
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromRequest for InternalToken {
    type Error = MissingInternalToken;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        ready(InternalToken::from_http_request(req))
    }
}

/// Bearer authentication middleware
pub struct BearerAuthMiddleware {
    authenticator: Arc<dyn Authenticator>,
}

impl BearerAuthMiddleware {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }
}

impl<S, B> Transform<S, ServiceRequest> for BearerAuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = BearerAuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(BearerAuthMiddlewareService {
            service: Rc::new(service),
            authenticator: self.authenticator.clone(),
        }))
    }
}

pub struct BearerAuthMiddlewareService<S> {
    service: Rc<S>,
    authenticator: Arc<dyn Authenticator>,
}

impl<S, B> Service<ServiceRequest> for BearerAuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let authenticator = self.authenticator.clone();

        Box::pin(async move {
            let access_token = match bearer_token(&req) {
                Some(token) => token,
                None => {
                    return Ok(req
                        .error_response(AuthError::MissingCredentials)
                        .map_into_right_body())
                }
            };

            let internal_token = match authenticator.authenticate(&access_token) {
                Ok(token) => token,
                Err(err) => {
                    match &err {
                        AuthError::Internal(cause) => {
                            tracing::error!(error = %cause, "failed to issue internal token")
                        }
                        other => tracing::debug!(reason = %other, "bearer authentication rejected"),
                    }
                    return Ok(req.error_response(err).map_into_right_body());
                }
            };

            req.extensions_mut()
                .insert(InternalToken(internal_token.clone()));

            let mut res = service.call(req).await?;
            match HeaderValue::from_str(&internal_token) {
                Ok(value) => {
                    res.headers_mut()
                        .insert(HeaderName::from_static(INTERNAL_TOKEN_HEADER), value);
                }
                Err(e) => tracing::warn!(error = %e, "internal token is not a valid header value"),
            }

            Ok(res.map_into_left_body())
        })
    }
}

fn bearer_token(req: &ServiceRequest) -> Option<String> {
    let header = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}
