//! Sign-in session storage
//!
//! A session is created when a code is emailed and consumed by a successful
//! sign-in. Redis layout:
//!
//! - `signin:session:{signin_key}` -> session JSON
//! - `signin:email:{email}` -> signin_key
//!
//! Both keys carry the session TTL. Storing a new session for an email
//! replaces the previous one.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crypto_core::Clock;
use redis_utils::SharedConnectionManager;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

const SESSION_PREFIX: &str = "signin:session:";
const EMAIL_PREFIX: &str = "signin:email:";

/// Pending sign-in awaiting code redemption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignInSession {
    pub signin_key: Uuid,
    pub last_request: DateTime<Utc>,
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub username: String,
    pub code: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignInStore: Send + Sync {
    async fn find(&self, signin_key: Uuid) -> Result<Option<SignInSession>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<SignInSession>>;

    async fn store(&self, session: &SignInSession) -> Result<()>;

    /// Delete the session; the email index goes too unless it already points elsewhere
    ///
    /// Returns `true` only for the call that actually deleted the session.
    async fn remove(&self, session: &SignInSession) -> Result<bool>;
}

fn session_key(signin_key: Uuid) -> String {
    format!("{SESSION_PREFIX}{signin_key}")
}

fn email_key(email: &str) -> String {
    format!("{EMAIL_PREFIX}{email}")
}

// ============================================================================
// Redis
// ============================================================================

pub struct RedisSignInStore {
    redis: SharedConnectionManager,
    ttl: Duration,
    timeout: Duration,
}

impl RedisSignInStore {
    pub fn new(redis: SharedConnectionManager, ttl: Duration, timeout: Duration) -> Self {
        Self {
            redis,
            ttl,
            timeout,
        }
    }
}

#[async_trait]
impl SignInStore for RedisSignInStore {
    async fn find(&self, signin_key: Uuid) -> Result<Option<SignInSession>> {
        let mut redis_conn = self.redis.lock().await.clone();
        let raw: Option<String> = redis_utils::with_timeout_of(self.timeout, async {
            redis::cmd("GET")
                .arg(session_key(signin_key))
                .query_async(&mut redis_conn)
                .await
        })
        .await?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<SignInSession>> {
        let mut redis_conn = self.redis.lock().await.clone();
        let raw: Option<String> = redis_utils::with_timeout_of(self.timeout, async {
            redis::cmd("GET")
                .arg(email_key(email))
                .query_async(&mut redis_conn)
                .await
        })
        .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        match Uuid::parse_str(&raw) {
            Ok(signin_key) => self.find(signin_key).await,
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed sign-in email index");
                Ok(None)
            }
        }
    }

    async fn store(&self, session: &SignInSession) -> Result<()> {
        let payload = serde_json::to_string(session)?;
        let ttl = self.ttl.as_secs().max(1);
        let index = email_key(&session.email);

        let mut redis_conn = self.redis.lock().await.clone();
        let previous: Option<String> = redis_utils::with_timeout_of(self.timeout, async {
            redis::cmd("GET").arg(&index).query_async(&mut redis_conn).await
        })
        .await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET")
            .arg(session_key(session.signin_key))
            .arg(payload)
            .arg("EX")
            .arg(ttl)
            .ignore()
            .cmd("SET")
            .arg(&index)
            .arg(session.signin_key.to_string())
            .arg("EX")
            .arg(ttl)
            .ignore();
        if let Some(previous) = previous
            .and_then(|raw| Uuid::parse_str(&raw).ok())
            .filter(|key| *key != session.signin_key)
        {
            pipe.cmd("DEL").arg(session_key(previous)).ignore();
        }

        redis_utils::with_timeout_of(self.timeout, async {
            pipe.query_async::<_, ()>(&mut redis_conn).await
        })
        .await?;
        Ok(())
    }

    async fn remove(&self, session: &SignInSession) -> Result<bool> {
        let mut redis_conn = self.redis.lock().await.clone();
        let deleted: u64 = redis_utils::with_timeout_of(self.timeout, async {
            redis::cmd("DEL")
                .arg(session_key(session.signin_key))
                .query_async(&mut redis_conn)
                .await
        })
        .await?;

        redis_utils::with_timeout_of(
            self.timeout,
            redis_utils::compare_and_delete(
                &mut redis_conn,
                &email_key(&session.email),
                &session.signin_key.to_string(),
            ),
        )
        .await?;
        Ok(deleted == 1)
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
struct SessionState {
    sessions: HashMap<Uuid, (SignInSession, DateTime<Utc>)>,
    by_email: HashMap<String, Uuid>,
}

/// Process-local session store with TTL handling driven by a [`Clock`]
pub struct InMemorySignInStore {
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    state: Mutex<SessionState>,
}

impl InMemorySignInStore {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            clock,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(10)),
            state: Mutex::new(SessionState::default()),
        }
    }
}

#[async_trait]
impl SignInStore for InMemorySignInStore {
    async fn find(&self, signin_key: Uuid) -> Result<Option<SignInSession>> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .get(&signin_key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(session, _)| session.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<SignInSession>> {
        let key = {
            let state = self.state.lock().await;
            state.by_email.get(email).copied()
        };
        match key {
            Some(key) => self.find(key).await,
            None => Ok(None),
        }
    }

    async fn store(&self, session: &SignInSession) -> Result<()> {
        let expires_at = self.clock.now() + self.ttl;
        let mut state = self.state.lock().await;
        if let Some(previous) = state
            .by_email
            .insert(session.email.clone(), session.signin_key)
        {
            if previous != session.signin_key {
                state.sessions.remove(&previous);
            }
        }
        state
            .sessions
            .insert(session.signin_key, (session.clone(), expires_at));
        Ok(())
    }

    async fn remove(&self, session: &SignInSession) -> Result<bool> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let removed = state
            .sessions
            .remove(&session.signin_key)
            .is_some_and(|(_, expires_at)| expires_at > now);
        if state.by_email.get(&session.email) == Some(&session.signin_key) {
            state.by_email.remove(&session.email);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixed_clock;

    fn session(email: &str, code: &str, now: DateTime<Utc>) -> SignInSession {
        SignInSession {
            signin_key: Uuid::new_v4(),
            last_request: now,
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            name: "Alice".to_string(),
            username: "alice".to_string(),
            code: code.to_string(),
        }
    }

    #[tokio::test]
    async fn test_absent_keys_are_none() {
        let store = InMemorySignInStore::new(fixed_clock(), Duration::from_secs(600));
        assert!(store.find(Uuid::new_v4()).await.unwrap().is_none());
        assert!(store.find_by_email("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_find_remove() {
        let clock = fixed_clock();
        let store = InMemorySignInStore::new(clock.clone(), Duration::from_secs(600));
        let s = session("alice@example.com", "123456", clock.now());

        store.store(&s).await.unwrap();
        assert_eq!(store.find(s.signin_key).await.unwrap(), Some(s.clone()));
        assert_eq!(
            store.find_by_email("alice@example.com").await.unwrap(),
            Some(s.clone())
        );

        assert!(store.remove(&s).await.unwrap());
        assert!(store.find(s.signin_key).await.unwrap().is_none());
        assert!(store.find_by_email("alice@example.com").await.unwrap().is_none());
        assert!(!store.remove(&s).await.unwrap());
    }

    #[tokio::test]
    async fn test_new_session_replaces_previous_for_email() {
        let clock = fixed_clock();
        let store = InMemorySignInStore::new(clock.clone(), Duration::from_secs(600));
        let old = session("alice@example.com", "111111", clock.now());
        let new = session("alice@example.com", "222222", clock.now());

        store.store(&old).await.unwrap();
        store.store(&new).await.unwrap();

        assert!(store.find(old.signin_key).await.unwrap().is_none());
        assert_eq!(
            store.find_by_email("alice@example.com").await.unwrap(),
            Some(new.clone())
        );

        // Removing the stale session must not drop the live index
        assert!(!store.remove(&old).await.unwrap());
        assert_eq!(
            store.find_by_email("alice@example.com").await.unwrap(),
            Some(new)
        );
    }

    #[tokio::test]
    async fn test_sessions_expire() {
        let clock = fixed_clock();
        let store = InMemorySignInStore::new(clock.clone(), Duration::from_secs(600));
        let s = session("alice@example.com", "123456", clock.now());
        store.store(&s).await.unwrap();

        clock.advance(chrono::Duration::seconds(599));
        assert!(store.find(s.signin_key).await.unwrap().is_some());
        clock.advance(chrono::Duration::seconds(1));
        assert!(store.find(s.signin_key).await.unwrap().is_none());
        assert!(store.find_by_email("alice@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_redis_store_round_trip() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let Ok(pool) = redis_utils::RedisPool::connect(&url).await else {
            eprintln!("skipping: redis unavailable at {url}");
            return;
        };
        let store = RedisSignInStore::new(
            pool.manager(),
            Duration::from_secs(60),
            redis_utils::DEFAULT_REDIS_TIMEOUT,
        );
        let email = format!("{}@example.com", Uuid::new_v4());
        let first = session(&email, "111111", Utc::now());
        let second = session(&email, "222222", Utc::now());

        store.store(&first).await.unwrap();
        assert_eq!(store.find(first.signin_key).await.unwrap(), Some(first.clone()));

        store.store(&second).await.unwrap();
        assert!(store.find(first.signin_key).await.unwrap().is_none());
        assert_eq!(store.find_by_email(&email).await.unwrap(), Some(second.clone()));

        assert!(store.remove(&second).await.unwrap());
        assert!(!store.remove(&second).await.unwrap());
        assert!(store.find(second.signin_key).await.unwrap().is_none());
        assert!(store.find_by_email(&email).await.unwrap().is_none());
    }
}
