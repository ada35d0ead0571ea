/// Refresh: rotate a refresh token into a new pair
///
/// Refresh tokens are single-use: the presented token is revoked before the
/// new pair is issued, and a failed revocation aborts the rotation. The
/// revocation itself is the claim on the token; of two concurrent rotations
/// only the one that creates the entry gets a pair.
use crate::error::{IdentityError, Result};
use crate::security::token_issuer::strip_issuer_claims;
use crate::security::{RevocationStore, TokenIssuer, TokenPair};
use crypto_core::jwt::{TokenError, CLAIM_EXPIRES_AT, CLAIM_SUBJECT};
use std::sync::Arc;

pub struct RefreshService {
    issuer: Arc<TokenIssuer>,
    revocation: Arc<dyn RevocationStore>,
}

impl RefreshService {
    pub fn new(issuer: Arc<TokenIssuer>, revocation: Arc<dyn RevocationStore>) -> Self {
        Self { issuer, revocation }
    }

    /// ## Errors
    ///
    /// - `RefreshTokenInvalidated` if the token was already used or signed out
    /// - `RefreshTokenExpired`, `InvalidTokenType`, `InvalidJwt` from verification
    /// - `InvalidClaims` if the token has no `sub`; the token is left unrevoked
    /// - `RevokeTokenFailed` if the old token cannot be revoked
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        if self.revocation.is_revoked(refresh_token).await? {
            return Err(IdentityError::RefreshTokenInvalidated);
        }

        let claims = self
            .issuer
            .parse_refresh(refresh_token)
            .map_err(|e| match e {
                TokenError::TokenExpired => IdentityError::RefreshTokenExpired,
                TokenError::InvalidTokenType => IdentityError::InvalidTokenType,
                _ => IdentityError::InvalidJwt,
            })?;

        if claims
            .get(CLAIM_SUBJECT)
            .map_or(true, serde_json::Value::is_null)
        {
            return Err(IdentityError::InvalidClaims);
        }

        let claimed = self
            .revocation
            .revoke(refresh_token, claims.get_i64(CLAIM_EXPIRES_AT))
            .await
            .map_err(|e| IdentityError::RevokeTokenFailed(e.to_string()))?;
        if !claimed {
            return Err(IdentityError::RefreshTokenInvalidated);
        }

        self.issuer.generate_pair(&strip_issuer_claims(claims))
    }
}
