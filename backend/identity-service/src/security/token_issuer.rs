//! Token issuance and trust escalation
//!
//! Holds the three token configurations of the service:
//!
//! - **access**: short-lived, presented by clients as a bearer token
//! - **refresh**: long-lived, single-use, exchanged for a new pair
//! - **internal**: short-lived RSA token minted for downstream services
//!
//! Internal tokens are a one-way narrowing of an access token: only `sub`,
//! `name` and `username` survive, and the `typ` check keeps them from ever
//! being accepted as access tokens.

use crate::error::{IdentityError, Result};
use actix_middleware::{AuthError, Authenticator};
use crypto_core::jwt::{
    Claims, JwtCodec, TokenConfig, TokenError, CLAIM_AUDIENCE, CLAIM_ISSUER, CLAIM_SUBJECT,
    CLAIM_TOKEN_ID, CLAIM_TYPE,
};
use serde::Serialize;
use uuid::Uuid;

pub const ACCESS_TOKEN_TYPE: &str = "access";
pub const REFRESH_TOKEN_TYPE: &str = "refresh";
pub const INTERNAL_TOKEN_TYPE: &str = "internal";

pub const CLAIM_NAME: &str = "name";
pub const CLAIM_USERNAME: &str = "username";

/// Claims copied from a user token into an internal token
const INTERNAL_CLAIMS: [&str; 3] = [CLAIM_SUBJECT, CLAIM_NAME, CLAIM_USERNAME];

/// Access + refresh tokens issued together
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct TokenIssuer {
    codec: JwtCodec,
    access: TokenConfig,
    refresh: TokenConfig,
    internal: TokenConfig,
}

impl TokenIssuer {
    pub fn new(
        codec: JwtCodec,
        access: TokenConfig,
        refresh: TokenConfig,
        internal: TokenConfig,
    ) -> Self {
        Self {
            codec,
            access,
            refresh,
            internal,
        }
    }

    pub fn codec(&self) -> &JwtCodec {
        &self.codec
    }

    pub fn access_config(&self) -> &TokenConfig {
        &self.access
    }

    pub fn refresh_config(&self) -> &TokenConfig {
        &self.refresh
    }

    pub fn internal_config(&self) -> &TokenConfig {
        &self.internal
    }

    /// Type a refresh token must carry
    pub fn refresh_token_type(&self) -> &str {
        self.refresh
            .token_type
            .as_deref()
            .unwrap_or(REFRESH_TOKEN_TYPE)
    }

    /// Issue an access + refresh pair for `claims`
    ///
    /// Each token gets its own `jti`, so two pairs minted for the same user in
    /// the same second never collide in the revocation store. Either both
    /// tokens are returned or neither is.
    pub fn generate_pair(&self, claims: &Claims) -> Result<TokenPair> {
        let access_token = self.sign(&self.access, claims)?;
        let refresh_token = self.sign(&self.refresh, claims)?;
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    fn sign(&self, config: &TokenConfig, claims: &Claims) -> Result<String> {
        let claims = claims
            .clone()
            .with(CLAIM_TOKEN_ID, Uuid::new_v4().to_string());
        self.codec.generate(config, &claims).map_err(|e| {
            tracing::error!(error = %e, "token signing failed");
            IdentityError::TokenGenerationFailed(e.to_string())
        })
    }

    /// Verify a refresh token against the refresh configuration
    pub fn parse_refresh(&self, token: &str) -> std::result::Result<Claims, TokenError> {
        self.codec.parse(&self.refresh, token)
    }

    /// Exchange a verified access token for an internal token
    ///
    /// ## Errors
    ///
    /// - `AccessTokenExpired` once the access token is past `exp`
    /// - `InvalidTokenType` if the token is not an access token
    /// - `InvalidJwt` for any other verification failure
    /// - `InternalTokenGenerationFailed` if the internal token cannot be signed
    pub fn authenticate(&self, access_token: &str) -> Result<String> {
        let claims = self
            .codec
            .parse(&self.access, access_token)
            .map_err(|e| match e {
                TokenError::TokenExpired => IdentityError::AccessTokenExpired,
                TokenError::InvalidTokenType => IdentityError::InvalidTokenType,
                _ => IdentityError::InvalidJwt,
            })?;

        let internal_claims = narrow_to_internal(&claims);
        self.codec
            .generate(&self.internal, &internal_claims)
            .map_err(|e| IdentityError::InternalTokenGenerationFailed(e.to_string()))
    }

    /// Verify an internal token and require `typ == "internal"`
    pub fn validate_internal_token(&self, token: &str) -> Result<Claims> {
        let claims = self
            .codec
            .parse(&self.internal, token)
            .map_err(|_| IdentityError::InvalidJwt)?;

        if claims.get_str(CLAIM_TYPE) != Some(INTERNAL_TOKEN_TYPE) {
            return Err(IdentityError::InvalidTokenType);
        }
        Ok(claims)
    }
}

/// Keep only the identity claims; `iss`, `aud` and `typ` come from the internal config
fn narrow_to_internal(claims: &Claims) -> Claims {
    let mut narrowed = Claims::new();
    for name in INTERNAL_CLAIMS {
        if let Some(value) = claims.get(name) {
            narrowed.insert(name, value.clone());
        }
    }
    narrowed.insert(CLAIM_TYPE, INTERNAL_TOKEN_TYPE);
    narrowed
}

/// Drop reserved claims that must be re-derived from the target configuration
pub(crate) fn strip_issuer_claims(mut claims: Claims) -> Claims {
    claims.remove(CLAIM_ISSUER);
    claims.remove(CLAIM_AUDIENCE);
    claims.remove(CLAIM_TYPE);
    claims.remove("nbf");
    claims
}

impl Authenticator for TokenIssuer {
    fn authenticate(&self, access_token: &str) -> std::result::Result<String, AuthError> {
        TokenIssuer::authenticate(self, access_token).map_err(|e| match e {
            IdentityError::AccessTokenExpired => AuthError::AccessTokenExpired,
            IdentityError::InvalidTokenType => AuthError::InvalidTokenType,
            IdentityError::InvalidJwt => AuthError::InvalidToken,
            other => AuthError::Internal(other.to_string()),
        })
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("access", &self.access)
            .field("refresh", &self.refresh)
            .field("internal", &self.internal)
            .finish()
    }
}
