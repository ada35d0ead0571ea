//! Cryptographic primitives shared by the identity backend
//!
//! ## Modules
//! - `clock`: substitutable source of the current time
//! - `hash`: SHA-256 helpers used for token fingerprints
//! - `jwt`: signing configuration and the token codec

pub mod clock;
pub mod hash;
pub mod jwt;

pub use clock::{Clock, FixedClock, SystemClock};
pub use jwt::{Claims, JwtCodec, SigningAlgorithm, TokenConfig, TokenError};
