/// Storage adapters owned by identity-service
pub mod signin_store;

pub use signin_store::{InMemorySignInStore, RedisSignInStore, SignInSession, SignInStore};
