/// Sign-in: redeem an emailed code for a token pair
use crate::error::{IdentityError, Result};
use crate::infrastructure::{SignInSession, SignInStore};
use crate::security::token_issuer::{CLAIM_NAME, CLAIM_USERNAME};
use crate::security::{TokenIssuer, TokenPair};
use crypto_core::jwt::{Claims, CLAIM_SUBJECT};
use std::sync::Arc;
use uuid::Uuid;

pub struct SignInService {
    store: Arc<dyn SignInStore>,
    issuer: Arc<TokenIssuer>,
}

impl SignInService {
    pub fn new(store: Arc<dyn SignInStore>, issuer: Arc<TokenIssuer>) -> Self {
        Self { store, issuer }
    }

    /// Exchange `(signin_key, code)` for an access + refresh pair
    ///
    /// The session is deleted only after both tokens are signed, so a failed
    /// issuance leaves it redeemable. The pair is returned only to the caller
    /// whose delete removed the session.
    ///
    /// ## Errors
    ///
    /// - `SignInKeyNotFound` if the session is absent, expired or already used
    /// - `WrongCode` if `code` differs; the session is kept
    pub async fn sign_in(&self, signin_key: Uuid, code: &str) -> Result<TokenPair> {
        let session = self
            .store
            .find(signin_key)
            .await?
            .ok_or(IdentityError::SignInKeyNotFound)?;

        if session.code != code {
            return Err(IdentityError::WrongCode);
        }

        let pair = self.issuer.generate_pair(&session_claims(&session))?;
        if !self.store.remove(&session).await? {
            tracing::warn!(user_id = %session.user_id, "sign-in session consumed concurrently");
            return Err(IdentityError::SignInKeyNotFound);
        }

        tracing::info!(user_id = %session.user_id, "user signed in");
        Ok(pair)
    }
}

fn session_claims(session: &SignInSession) -> Claims {
    Claims::new()
        .with(CLAIM_SUBJECT, session.user_id.to_string())
        .with(CLAIM_NAME, session.name.clone())
        .with(CLAIM_USERNAME, session.username.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::signin_store::MockSignInStore;
    use crate::infrastructure::InMemorySignInStore;
    use crate::test_support::{fixed_clock, issuer_with_clock};
    use crypto_core::Clock;
    use std::time::Duration;

    async fn setup(code: &str) -> (SignInService, Arc<InMemorySignInStore>, SignInSession) {
        let clock = fixed_clock();
        let store = Arc::new(InMemorySignInStore::new(
            clock.clone(),
            Duration::from_secs(600),
        ));
        let session = SignInSession {
            signin_key: Uuid::new_v4(),
            last_request: clock.now(),
            user_id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            name: "Alice".to_string(),
            username: "alice".to_string(),
            code: code.to_string(),
        };
        store.store(&session).await.unwrap();
        let service = SignInService::new(store.clone(), Arc::new(issuer_with_clock(clock)));
        (service, store, session)
    }

    #[tokio::test]
    async fn test_sign_in_issues_pair_and_consumes_session() {
        let (service, store, session) = setup("123456").await;

        let pair = service.sign_in(session.signin_key, "123456").await.unwrap();
        let claims = service
            .issuer
            .codec()
            .parse(service.issuer.access_config(), &pair.access_token)
            .unwrap();
        assert_eq!(claims.get_str("sub"), Some(session.user_id.to_string().as_str()));
        assert_eq!(claims.get_str("name"), Some("Alice"));
        assert_eq!(claims.get_str("username"), Some("alice"));
        assert!(service.issuer.parse_refresh(&pair.refresh_token).is_ok());

        assert!(store.find(session.signin_key).await.unwrap().is_none());
        assert!(matches!(
            service.sign_in(session.signin_key, "123456").await,
            Err(IdentityError::SignInKeyNotFound)
        ));
    }

    #[tokio::test]
    async fn test_wrong_code_keeps_session() {
        let (service, store, session) = setup("123456").await;

        assert!(matches!(
            service.sign_in(session.signin_key, "000000").await,
            Err(IdentityError::WrongCode)
        ));
        assert_eq!(store.find(session.signin_key).await.unwrap(), Some(session.clone()));

        assert!(service.sign_in(session.signin_key, "123456").await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_key_is_not_found() {
        let (service, _, _) = setup("123456").await;
        assert!(matches!(
            service.sign_in(Uuid::new_v4(), "123456").await,
            Err(IdentityError::SignInKeyNotFound)
        ));
    }

    /// Yields to the scheduler before every call so concurrent callers interleave
    struct YieldingSignInStore(Arc<InMemorySignInStore>);

    #[async_trait::async_trait]
    impl SignInStore for YieldingSignInStore {
        async fn find(&self, signin_key: Uuid) -> Result<Option<SignInSession>> {
            tokio::task::yield_now().await;
            self.0.find(signin_key).await
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<SignInSession>> {
            tokio::task::yield_now().await;
            self.0.find_by_email(email).await
        }

        async fn store(&self, session: &SignInSession) -> Result<()> {
            tokio::task::yield_now().await;
            self.0.store(session).await
        }

        async fn remove(&self, session: &SignInSession) -> Result<bool> {
            tokio::task::yield_now().await;
            self.0.remove(session).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_redemptions_issue_one_pair() {
        let (_, store, session) = setup("123456").await;
        let service = SignInService::new(
            Arc::new(YieldingSignInStore(store)),
            Arc::new(issuer_with_clock(fixed_clock())),
        );

        let (a, b) = tokio::join!(
            service.sign_in(session.signin_key, "123456"),
            service.sign_in(session.signin_key, "123456")
        );
        assert_eq!([&a, &b].iter().filter(|r| r.is_ok()).count(), 1);
        assert!([a, b]
            .into_iter()
            .any(|r| matches!(r, Err(IdentityError::SignInKeyNotFound))));
    }

    #[tokio::test]
    async fn test_store_failure_is_internal() {
        let mut store = MockSignInStore::new();
        store
            .expect_find()
            .returning(|_| Err(IdentityError::Redis("connection reset".into())));
        store.expect_remove().never();

        let service = SignInService::new(Arc::new(store), Arc::new(issuer_with_clock(fixed_clock())));
        assert!(matches!(
            service.sign_in(Uuid::new_v4(), "123456").await,
            Err(IdentityError::Redis(_))
        ));
    }
}
