// Integration tests for the Identity Service HTTP API
//
// The full route table runs against in-memory stores, a fake user directory
// and an email sender that records outgoing messages, so no Redis, SMTP or
// user service is needed.

use actix_middleware::{IdempotencyConfig, InMemoryIdempotencyStorage};
use actix_web::{http::StatusCode, test, App};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use crypto_core::{Clock, FixedClock, JwtCodec, SigningAlgorithm, TokenConfig};
use identity_service::{
    http::{configure_routes, HttpState},
    infrastructure::InMemorySignInStore,
    security::{InMemoryRevocationStore, TokenIssuer},
    services::{
        EmailSender, RefreshService, SendCodeService, SignInService, SignOutService,
        UserDirectory, UserProfile,
    },
    Result,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const INTERNAL_PRIVATE_KEY: &str = include_str!("fixtures/internal_private.pem");
const INTERNAL_PUBLIC_KEY: &str = include_str!("fixtures/internal_public.pem");

struct FakeDirectory {
    user_id: Uuid,
}

#[async_trait]
impl UserDirectory for FakeDirectory {
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        Ok((email == "alice@example.com").then(|| UserProfile {
            user_id: self.user_id,
            name: "Alice".to_string(),
            username: "alice".to_string(),
        }))
    }
}

#[derive(Default)]
struct RecordingEmail {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingEmail {
    /// The code is the last word of the most recent message
    fn last_code(&self) -> String {
        let sent = self.sent.lock().unwrap();
        let (_, body) = sent.last().expect("no email sent");
        body.rsplit(' ').next().unwrap().to_string()
    }
}

#[async_trait]
impl EmailSender for RecordingEmail {
    async fn send(&self, recipient: &str, _subject: &str, body: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), body.to_string()));
        Ok(())
    }
}

struct Harness {
    state: HttpState,
    email: Arc<RecordingEmail>,
    clock: Arc<FixedClock>,
    user_id: Uuid,
}

fn harness() -> Harness {
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let dyn_clock: Arc<dyn Clock> = clock.clone();

    let access = TokenConfig::new(
        SigningAlgorithm::hmac("HS256", b"access-secret".to_vec()).unwrap(),
        ChronoDuration::minutes(15),
    )
    .with_issuer("identity")
    .with_audience(["api"])
    .with_type("access");
    let refresh = TokenConfig::new(
        SigningAlgorithm::hmac("HS256", b"refresh-secret".to_vec()).unwrap(),
        ChronoDuration::days(30),
    )
    .with_issuer("identity")
    .with_type("refresh");
    let internal = TokenConfig::new(
        SigningAlgorithm::rsa_from_pem(
            "RS256",
            INTERNAL_PUBLIC_KEY.as_bytes(),
            Some(INTERNAL_PRIVATE_KEY.as_bytes()),
        )
        .unwrap(),
        ChronoDuration::minutes(5),
    )
    .with_issuer("identity-internal")
    .with_audience(["services"])
    .with_type("internal");

    let issuer = Arc::new(TokenIssuer::new(
        JwtCodec::new(dyn_clock.clone()),
        access,
        refresh,
        internal,
    ));
    let revocation = Arc::new(InMemoryRevocationStore::new(
        dyn_clock.clone(),
        Duration::from_secs(3600),
    ));
    let sessions = Arc::new(InMemorySignInStore::new(
        dyn_clock.clone(),
        Duration::from_secs(600),
    ));
    let email = Arc::new(RecordingEmail::default());
    let user_id = Uuid::new_v4();

    let state = HttpState {
        send_code: Arc::new(SendCodeService::new(
            sessions.clone(),
            Arc::new(FakeDirectory { user_id }),
            email.clone(),
            dyn_clock,
            ChronoDuration::seconds(60),
        )),
        signin: Arc::new(SignInService::new(sessions, issuer.clone())),
        refresh: Arc::new(RefreshService::new(issuer.clone(), revocation.clone())),
        signout: Arc::new(SignOutService::new(issuer.clone(), revocation)),
        issuer,
        idempotency_storage: Arc::new(InMemoryIdempotencyStorage::default()),
        idempotency_config: IdempotencyConfig {
            retry_delay: Duration::from_millis(1),
            ..IdempotencyConfig::default()
        },
    };

    Harness {
        state,
        email,
        clock,
        user_id,
    }
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(App::new().configure(|cfg| configure_routes(cfg, &$state))).await
    };
}

fn post(uri: &str, body: Value) -> test::TestRequest {
    test::TestRequest::post()
        .uri(uri)
        .insert_header(("Idempotency-Key", Uuid::new_v4().to_string()))
        .set_json(body)
}

#[actix_web::test]
async fn test_full_sign_in_lifecycle() {
    let h = harness();
    let app = app!(h.state);

    // Request a code
    let resp = test::call_service(
        &app,
        post(
            "/v1.0/signin/send-email-code",
            json!({"email": "alice@example.com"}),
        )
        .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let signin_key = body["data"]["signin_key"].as_str().unwrap().to_string();

    // Redeem it
    let resp = test::call_service(
        &app,
        post(
            "/v1.0/signin",
            json!({"signin_key": signin_key, "code": h.email.last_code()}),
        )
        .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let access = body["data"]["access_token"].as_str().unwrap().to_string();
    let first_refresh = body["data"]["refresh_token"].as_str().unwrap().to_string();

    // Bearer auth escalates to an internal token
    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/v1.0/identity")
            .insert_header(("Authorization", format!("Bearer {}", access)))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-internal-token"));
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(
        body["data"],
        json!({"sub": h.user_id.to_string(), "name": "Alice", "username": "alice"})
    );

    // Rotate
    let resp = test::call_service(
        &app,
        post("/v1.0/refresh-token", json!({"refresh_token": first_refresh})).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let second_refresh = body["data"]["refresh_token"].as_str().unwrap().to_string();

    // The rotated-out token is dead
    let resp = test::call_service(
        &app,
        post("/v1.0/refresh-token", json!({"refresh_token": first_refresh})).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_type"], "refresh_token_invalidated");

    // Sign out kills the current one
    let resp = test::call_service(
        &app,
        test::TestRequest::put()
            .uri("/v1.0/sign-out")
            .set_json(json!({"refresh_token": second_refresh}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({"data": {}}));

    let resp = test::call_service(
        &app,
        post("/v1.0/refresh-token", json!({"refresh_token": second_refresh})).to_request(),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_type"], "refresh_token_invalidated");
}

#[actix_web::test]
async fn test_sign_in_replays_with_same_idempotency_key() {
    let h = harness();
    let app = app!(h.state);

    let resp = test::call_service(
        &app,
        post(
            "/v1.0/signin/send-email-code",
            json!({"email": "alice@example.com"}),
        )
        .to_request(),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    let payload = json!({
        "signin_key": body["data"]["signin_key"],
        "code": h.email.last_code(),
    });

    let request = || {
        test::TestRequest::post()
            .uri("/v1.0/signin")
            .insert_header(("Idempotency-Key", "signin-once"))
            .set_json(payload.clone())
            .to_request()
    };

    let first = test::call_and_read_body(&app, request()).await;
    // The session is consumed, yet the replay returns the original pair
    let second = test::call_and_read_body(&app, request()).await;
    assert_eq!(first, second);
}

#[actix_web::test]
async fn test_wrong_code_keeps_session_usable() {
    let h = harness();
    let app = app!(h.state);

    let resp = test::call_service(
        &app,
        post(
            "/v1.0/signin/send-email-code",
            json!({"email": "alice@example.com"}),
        )
        .to_request(),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    let signin_key = body["data"]["signin_key"].clone();
    let code = h.email.last_code();
    let wrong = if code == "100000" { "100001" } else { "100000" };

    let resp = test::call_service(
        &app,
        post("/v1.0/signin", json!({"signin_key": signin_key, "code": wrong})).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_type"], "wrong_code");

    let resp = test::call_service(
        &app,
        post("/v1.0/signin", json!({"signin_key": signin_key, "code": code})).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_send_code_errors() {
    let h = harness();
    let app = app!(h.state);

    let resp = test::call_service(
        &app,
        post(
            "/v1.0/signin/send-email-code",
            json!({"email": "ghost@example.com"}),
        )
        .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_type"], "user_not_found");

    let send = || {
        post(
            "/v1.0/signin/send-email-code",
            json!({"email": "alice@example.com"}),
        )
        .to_request()
    };
    assert_eq!(test::call_service(&app, send()).await.status(), StatusCode::OK);

    let resp = test::call_service(&app, send()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_type"], "send_code_freq_exceeded");

    h.clock.advance(ChronoDuration::seconds(61));
    assert_eq!(test::call_service(&app, send()).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_request_validation() {
    let h = harness();
    let app = app!(h.state);

    let resp = test::call_service(
        &app,
        post("/v1.0/signin/send-email-code", json!({"email": "nope"})).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_type"], "validation_failed");
    assert_eq!(body["error_details"][0]["field"], "email");

    let resp = test::call_service(&app, post("/v1.0/signin", json!({})).to_request()).await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_type"], "validation_failed");
    assert_eq!(body["error_details"].as_array().unwrap().len(), 2);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/v1.0/refresh-token")
            .insert_header(("Idempotency-Key", "malformed"))
            .insert_header(("Content-Type", "application/json"))
            .set_payload("{not json")
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_type"], "invalid_json");
}

#[actix_web::test]
async fn test_mutating_routes_require_idempotency_key() {
    let h = harness();
    let app = app!(h.state);

    for uri in ["/v1.0/signin/send-email-code", "/v1.0/signin", "/v1.0/refresh-token"] {
        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(uri)
                .set_json(json!({}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error_type"], "idempotency_key_missing");
    }
}

#[actix_web::test]
async fn test_identity_requires_bearer_token() {
    let h = harness();
    let app = app!(h.state);

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/v1.0/identity").to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_type"], "unauthorized");

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/v1.0/identity")
            .insert_header(("Authorization", "Bearer not-a-token"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_type"], "invalid_token");
}

#[actix_web::test]
async fn test_expired_access_token() {
    let h = harness();
    let app = app!(h.state);

    let pair = h
        .state
        .issuer
        .generate_pair(&crypto_core::Claims::new().with("sub", "user-1"))
        .unwrap();
    h.clock.advance(ChronoDuration::minutes(16));

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/v1.0/identity")
            .insert_header(("Authorization", format!("Bearer {}", pair.access_token)))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_type"], "access_token_expired");
}

#[actix_web::test]
async fn test_health_and_unknown_routes() {
    let h = harness();
    let app = app!(h.state);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/v1.0/nowhere").to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_type"], "not_found");
}
