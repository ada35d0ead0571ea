/// Sign-out: revoke a refresh token
use crate::error::{IdentityError, Result};
use crate::security::{RevocationStore, TokenIssuer};
use crypto_core::jwt::{TokenError, CLAIM_EXPIRES_AT, CLAIM_TYPE};
use std::sync::Arc;

pub struct SignOutService {
    issuer: Arc<TokenIssuer>,
    revocation: Arc<dyn RevocationStore>,
}

impl SignOutService {
    pub fn new(issuer: Arc<TokenIssuer>, revocation: Arc<dyn RevocationStore>) -> Self {
        Self { issuer, revocation }
    }

    /// Revoke `refresh_token` until its natural expiry
    ///
    /// An already-expired or already-revoked token is accepted.
    pub async fn sign_out(&self, refresh_token: &str) -> Result<()> {
        let claims = match self.issuer.parse_refresh(refresh_token) {
            Ok(claims) => claims,
            Err(TokenError::TokenExpired) => {
                tracing::debug!("sign-out with expired refresh token; nothing to revoke");
                return Ok(());
            }
            Err(TokenError::InvalidTokenType) => return Err(IdentityError::InvalidTokenType),
            Err(_) => return Err(IdentityError::InvalidJwt),
        };

        if claims.get_str(CLAIM_TYPE) != Some(self.issuer.refresh_token_type()) {
            return Err(IdentityError::InvalidTokenType);
        }

        self.revocation
            .revoke(refresh_token, claims.get_i64(CLAIM_EXPIRES_AT))
            .await
            .map_err(|e| IdentityError::RevokeTokenFailed(e.to_string()))?;
        Ok(())
    }
}
