//! In-process idempotency storage
//!
//! Same contract as the Redis adapter: lock acquisition and release each run
//! inside one critical section, entries expire by TTL.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::storage::{CapturedResponse, IdempotencyStorage, LockToken};
use super::IdempotencyError;

const DEFAULT_RESPONSE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Default)]
struct State {
    locks: HashMap<String, (LockToken, Instant)>,
    responses: HashMap<String, (CapturedResponse, Instant)>,
}

pub struct InMemoryIdempotencyStorage {
    state: Mutex<State>,
    response_ttl: Duration,
}

impl InMemoryIdempotencyStorage {
    pub fn new(response_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            response_ttl,
        }
    }

    /// Whether a live lock exists for `key`
    pub async fn is_locked(&self, key: &str) -> bool {
        let state = self.state.lock().await;
        state
            .locks
            .get(key)
            .is_some_and(|(_, expires_at)| *expires_at > Instant::now())
    }
}

impl Default for InMemoryIdempotencyStorage {
    fn default() -> Self {
        Self::new(DEFAULT_RESPONSE_TTL)
    }
}

#[async_trait]
impl IdempotencyStorage for InMemoryIdempotencyStorage {
    async fn acquire_lock(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockToken>, IdempotencyError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if let Some((_, expires_at)) = state.locks.get(key) {
            if *expires_at > now {
                return Ok(None);
            }
        }

        let token = LockToken::generate();
        state
            .locks
            .insert(key.to_string(), (token.clone(), now + ttl));
        Ok(Some(token))
    }

    async fn release_lock(&self, key: &str, token: &LockToken) -> Result<(), IdempotencyError> {
        let mut state = self.state.lock().await;
        if state.locks.get(key).is_some_and(|(owner, _)| owner == token) {
            state.locks.remove(key);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CapturedResponse>, IdempotencyError> {
        let mut state = self.state.lock().await;
        match state.responses.get(key) {
            Some((response, expires_at)) if *expires_at > Instant::now() => {
                Ok(Some(response.clone()))
            }
            Some(_) => {
                state.responses.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn store(&self, key: &str, response: &CapturedResponse) -> Result<(), IdempotencyError> {
        let mut state = self.state.lock().await;
        state.responses.insert(
            key.to_string(),
            (response.clone(), Instant::now() + self.response_ttl),
        );
        Ok(())
    }
}
