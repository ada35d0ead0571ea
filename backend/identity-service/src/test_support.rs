//! Shared fixtures for unit tests

use crate::security::TokenIssuer;
use chrono::{Duration, TimeZone, Utc};
use crypto_core::{Claims, FixedClock, JwtCodec, SigningAlgorithm, TokenConfig};
use std::sync::Arc;

// Test RSA key pair - FOR TESTING ONLY
pub(crate) const INTERNAL_PRIVATE_KEY: &str =
    include_str!("../tests/fixtures/internal_private.pem");
pub(crate) const INTERNAL_PUBLIC_KEY: &str = include_str!("../tests/fixtures/internal_public.pem");

pub(crate) fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    ))
}

pub(crate) fn issuer_with_clock(clock: Arc<FixedClock>) -> TokenIssuer {
    let access = TokenConfig::new(
        SigningAlgorithm::hmac("HS256", b"access-secret".to_vec()).unwrap(),
        Duration::minutes(15),
    )
    .with_issuer("identity")
    .with_audience(["api"])
    .with_type("access");

    let refresh = TokenConfig::new(
        SigningAlgorithm::hmac("HS256", b"refresh-secret".to_vec()).unwrap(),
        Duration::days(30),
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
        Duration::minutes(5),
    )
    .with_issuer("identity-internal")
    .with_audience(["services"])
    .with_type("internal");

    TokenIssuer::new(JwtCodec::new(clock), access, refresh, internal)
}

pub(crate) fn fixed_issuer() -> (TokenIssuer, Arc<FixedClock>) {
    let clock = fixed_clock();
    (issuer_with_clock(clock.clone()), clock)
}

pub(crate) fn user_claims() -> Claims {
    Claims::new()
        .with("sub", "user-1")
        .with("name", "Alice")
        .with("username", "alice")
}
