/// Security module for token issuance and revocation
///
/// - **token_issuer**: access/refresh pair issuance and trust escalation to internal tokens
/// - **token_revocation**: revocation store (Redis and in-memory adapters)
///
/// Signing and verification live in `crypto-core::jwt`.
pub use crypto_core::jwt;

pub mod token_issuer;
pub mod token_revocation;

pub use token_issuer::{TokenIssuer, TokenPair};
pub use token_revocation::{InMemoryRevocationStore, RedisRevocationStore, RevocationStore};
