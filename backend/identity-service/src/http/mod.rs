/// HTTP API for sign-in, token rotation and identity lookup
///
/// Mutating sign-in routes sit behind the idempotency guard; `/identity` sits
/// behind bearer auth, which swaps the caller's access token for an internal
/// token.
mod handlers;

pub use handlers::*;

use crate::security::TokenIssuer;
use crate::services::{RefreshService, SendCodeService, SignInService, SignOutService};
use actix_middleware::{
    metrics_handler, Authenticator, BearerAuthMiddleware, IdempotencyConfig,
    IdempotencyMiddleware, IdempotencyStorage,
};
use actix_web::{error::InternalError, web, HttpResponse};
use error_types::{error_types as codes, ErrorResponse};
use std::sync::Arc;

/// Shared HTTP server state
#[derive(Clone)]
pub struct HttpState {
    pub send_code: Arc<SendCodeService>,
    pub signin: Arc<SignInService>,
    pub refresh: Arc<RefreshService>,
    pub signout: Arc<SignOutService>,
    pub issuer: Arc<TokenIssuer>,
    pub idempotency_storage: Arc<dyn IdempotencyStorage>,
    pub idempotency_config: IdempotencyConfig,
}

impl HttpState {
    fn idempotent(&self) -> IdempotencyMiddleware {
        IdempotencyMiddleware::new(
            self.idempotency_storage.clone(),
            self.idempotency_config.clone(),
        )
    }
}

/// Register all routes; used by `main` and by the HTTP tests
pub fn configure_routes(cfg: &mut web::ServiceConfig, state: &HttpState) {
    let authenticator: Arc<dyn Authenticator> = state.issuer.clone();

    cfg.app_data(web::Data::new(state.clone()))
        .app_data(json_config())
        .route("/health", web::get().to(health_check))
        .route("/metrics", web::get().to(metrics_handler))
        .service(
            web::scope("/v1.0")
                .service(
                    web::resource("/signin/send-email-code")
                        .wrap(state.idempotent())
                        .route(web::post().to(send_email_code)),
                )
                .service(
                    web::resource("/signin")
                        .wrap(state.idempotent())
                        .route(web::post().to(sign_in)),
                )
                .service(
                    web::resource("/refresh-token")
                        .wrap(state.idempotent())
                        .route(web::post().to(refresh_token)),
                )
                .service(web::resource("/sign-out").route(web::put().to(sign_out)))
                .service(
                    web::resource("/identity")
                        .wrap(BearerAuthMiddleware::new(authenticator))
                        .route(web::get().to(identity)),
                ),
        )
        .default_service(web::to(not_found));
}

/// Malformed JSON bodies are reported as 422 `invalid_json`
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        tracing::debug!(error = %err, "rejected request body");
        let response = HttpResponse::UnprocessableEntity()
            .json(ErrorResponse::new(codes::INVALID_JSON, "Invalid JSON body"));
        InternalError::from_response(err, response).into()
    })
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(ErrorResponse::new(codes::NOT_FOUND, "Not found"))
}
