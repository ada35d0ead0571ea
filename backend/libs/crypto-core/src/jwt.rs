/// Token codec for the identity backend
///
/// Signs and verifies compact JWTs against an explicit [`TokenConfig`].
/// The codec itself is stateless apart from its [`Clock`], so one instance is
/// shared by every token purpose (access, refresh, internal).
///
/// ## Security Design
///
/// - **Closed algorithm set**: [`SigningAlgorithm`] is either HMAC or RSA, chosen
///   once at configuration time. Nothing downstream dispatches on strings.
/// - **No algorithm substitution**: a token whose header names a different
///   algorithm than the configured one is rejected before signature checks.
/// - **Explicit time**: expiry is evaluated against the injected clock, never
///   the library's own wall clock.
///
/// ## Usage
///
/// ```rust
/// use std::sync::Arc;
/// use chrono::Duration;
/// use crypto_core::{Claims, JwtCodec, SigningAlgorithm, SystemClock, TokenConfig};
///
/// let algorithm = SigningAlgorithm::hmac("HS256", b"secret".to_vec()).unwrap();
/// let config = TokenConfig::new(algorithm, Duration::minutes(15))
///     .with_issuer("identity")
///     .with_type("access");
///
/// let codec = JwtCodec::new(Arc::new(SystemClock));
/// let claims = Claims::new().with("sub", "user-1");
/// let token = codec.generate(&config, &claims).unwrap();
/// let parsed = codec.parse(&config, &token).unwrap();
/// assert_eq!(parsed.get_str("sub"), Some("user-1"));
/// ```
use crate::clock::{Clock, SystemClock};
use chrono::Duration;
use jsonwebtoken::{
    decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

pub const CLAIM_ISSUER: &str = "iss";
pub const CLAIM_AUDIENCE: &str = "aud";
pub const CLAIM_TYPE: &str = "typ";
pub const CLAIM_ISSUED_AT: &str = "iat";
pub const CLAIM_EXPIRES_AT: &str = "exp";
pub const CLAIM_SUBJECT: &str = "sub";
pub const CLAIM_TOKEN_ID: &str = "jti";

/// Numeric date claims normalized to integers after parsing
const NUMERIC_DATE_CLAIMS: [&str; 3] = [CLAIM_ISSUED_AT, CLAIM_EXPIRES_AT, "nbf"];

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Unknown signing method: {0}")]
    InvalidSigningMethod(String),

    #[error("Signing key material is missing")]
    MissingKeyMaterial,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Failed to sign token: {0}")]
    SigningFailure(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token issuer")]
    InvalidIssuer,

    #[error("Invalid token type")]
    InvalidTokenType,

    #[error("Invalid token audience")]
    InvalidAudience,

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Signing method plus the key material it needs
///
/// HMAC variants carry the shared secret. RSA variants always carry the public
/// key; the private key is optional so verify-only deployments never hold it.
#[derive(Clone)]
pub enum SigningAlgorithm {
    Hmac {
        algorithm: Algorithm,
        secret: Vec<u8>,
    },
    Rsa {
        algorithm: Algorithm,
        public_key: DecodingKey,
        private_key: Option<EncodingKey>,
    },
}

impl SigningAlgorithm {
    /// Build an HMAC signing algorithm (`HS256`, `HS384`, `HS512`)
    ///
    /// ## Errors
    ///
    /// `InvalidSigningMethod` if `method` is not an HMAC method name.
    pub fn hmac(method: &str, secret: impl Into<Vec<u8>>) -> Result<Self, TokenError> {
        match parse_method(method)? {
            algorithm @ (Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) => {
                Ok(Self::Hmac {
                    algorithm,
                    secret: secret.into(),
                })
            }
            _ => Err(TokenError::InvalidSigningMethod(method.to_string())),
        }
    }

    /// Build an RSA signing algorithm (`RS256`, `RS384`, `RS512`) from PEM keys
    ///
    /// ## Arguments
    ///
    /// * `method` - RSA method name
    /// * `public_pem` - SPKI or PKCS#1 public key
    /// * `private_pem` - PKCS#8 or PKCS#1 private key, `None` for verify-only use
    ///
    /// ## Errors
    ///
    /// `InvalidSigningMethod` for non-RSA method names, `InvalidKey` if a PEM
    /// block cannot be parsed as an RSA key.
    pub fn rsa_from_pem(
        method: &str,
        public_pem: &[u8],
        private_pem: Option<&[u8]>,
    ) -> Result<Self, TokenError> {
        let algorithm = match parse_method(method)? {
            algorithm @ (Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512) => algorithm,
            _ => return Err(TokenError::InvalidSigningMethod(method.to_string())),
        };

        let public_key = DecodingKey::from_rsa_pem(public_pem)
            .map_err(|e| TokenError::InvalidKey(format!("RSA public key: {e}")))?;

        let private_key = private_pem
            .map(EncodingKey::from_rsa_pem)
            .transpose()
            .map_err(|e| TokenError::InvalidKey(format!("RSA private key: {e}")))?;

        Ok(Self::Rsa {
            algorithm,
            public_key,
            private_key,
        })
    }

    /// Whether `method` names an HMAC algorithm
    ///
    /// Lets configuration loaders decide which key material to read before
    /// constructing the algorithm.
    pub fn is_symmetric_method(method: &str) -> Result<bool, TokenError> {
        Ok(matches!(
            parse_method(method)?,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ))
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::Hmac { algorithm, .. } | Self::Rsa { algorithm, .. } => *algorithm,
        }
    }

    fn encoding_key(&self) -> Result<EncodingKey, TokenError> {
        match self {
            Self::Hmac { secret, .. } if secret.is_empty() => Err(TokenError::MissingKeyMaterial),
            Self::Hmac { secret, .. } => Ok(EncodingKey::from_secret(secret)),
            Self::Rsa { private_key, .. } => {
                private_key.clone().ok_or(TokenError::MissingKeyMaterial)
            }
        }
    }

    fn decoding_key(&self) -> Result<DecodingKey, TokenError> {
        match self {
            Self::Hmac { secret, .. } if secret.is_empty() => Err(TokenError::MissingKeyMaterial),
            Self::Hmac { secret, .. } => Ok(DecodingKey::from_secret(secret)),
            Self::Rsa { public_key, .. } => Ok(public_key.clone()),
        }
    }
}

impl fmt::Debug for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hmac { algorithm, .. } => f
                .debug_struct("Hmac")
                .field("algorithm", algorithm)
                .field("secret", &"<redacted>")
                .finish(),
            Self::Rsa {
                algorithm,
                private_key,
                ..
            } => f
                .debug_struct("Rsa")
                .field("algorithm", algorithm)
                .field("has_private_key", &private_key.is_some())
                .finish(),
        }
    }
}

fn parse_method(name: &str) -> Result<Algorithm, TokenError> {
    match name.trim().to_ascii_uppercase().as_str() {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        _ => Err(TokenError::InvalidSigningMethod(name.to_string())),
    }
}

// ============================================================================
// Token Configuration
// ============================================================================

/// Per-purpose token configuration, immutable after startup
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub algorithm: SigningAlgorithm,
    pub lifetime: Duration,
    pub issuer: Option<String>,
    pub audience: Vec<String>,
    pub token_type: Option<String>,
}

impl TokenConfig {
    pub fn new(algorithm: SigningAlgorithm, lifetime: Duration) -> Self {
        Self {
            algorithm,
            lifetime,
            issuer: None,
            audience: Vec::new(),
            token_type: None,
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_audience<I, S>(mut self, audience: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audience = audience.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = Some(token_type.into());
        self
    }
}

// ============================================================================
// Claims
// ============================================================================

/// Claim set carried by a token
///
/// An open map: reserved claims sit next to whatever the issuer copied in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl Claims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(name.into(), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.0
            .get(name)
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Audience values, accepting both the string and the array form
    pub fn audience(&self) -> Vec<&str> {
        match self.0.get(CLAIM_AUDIENCE) {
            Some(Value::String(single)) => vec![single.as_str()],
            Some(Value::Array(many)) => many.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    fn normalize_numeric_dates(&mut self) {
        for name in NUMERIC_DATE_CLAIMS {
            if let Some(Value::Number(n)) = self.0.get(name) {
                if n.as_i64().is_none() {
                    if let Some(f) = n.as_f64() {
                        self.0.insert(name.to_string(), Value::from(f as i64));
                    }
                }
            }
        }
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Stateless signer/verifier bound to a clock
#[derive(Clone)]
pub struct JwtCodec {
    clock: Arc<dyn Clock>,
}

impl JwtCodec {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Codec reading the wall clock
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Sign a copy of `claims` augmented with the configured reserved claims
    ///
    /// Injects `iss`, `aud` and `typ` when configured, then `iat = now` and
    /// `exp = now + lifetime`. The caller's claim set is left untouched.
    ///
    /// ## Errors
    ///
    /// - `MissingKeyMaterial` if the HMAC secret is empty or no RSA private key is loaded
    /// - `SigningFailure` if the underlying signer fails
    pub fn generate(&self, config: &TokenConfig, claims: &Claims) -> Result<String, TokenError> {
        let key = config.algorithm.encoding_key()?;

        let mut claims = claims.clone();
        if let Some(issuer) = &config.issuer {
            claims.insert(CLAIM_ISSUER, issuer.clone());
        }
        if !config.audience.is_empty() {
            claims.insert(CLAIM_AUDIENCE, config.audience.clone());
        }
        if let Some(token_type) = &config.token_type {
            claims.insert(CLAIM_TYPE, token_type.clone());
        }

        let now = self.clock.now().timestamp();
        claims.insert(CLAIM_ISSUED_AT, now);
        claims.insert(CLAIM_EXPIRES_AT, now + config.lifetime.num_seconds());

        let header = Header::new(config.algorithm.algorithm());
        encode(&header, &claims, &key).map_err(|e| TokenError::SigningFailure(e.to_string()))
    }

    /// Verify `token` and return its claims with a fresh `jti`
    ///
    /// Checks, in order: header algorithm, signature, expiry, issuer, type.
    /// Parsing the same token twice yields different `jti` values.
    ///
    /// ## Errors
    ///
    /// - `TokenExpired` once `now >= exp`
    /// - `InvalidIssuer` / `InvalidTokenType` on mismatch with a configured value
    /// - `InvalidToken` for algorithm mismatch, bad signature or malformed input
    pub fn parse(&self, config: &TokenConfig, token: &str) -> Result<Claims, TokenError> {
        let expected = config.algorithm.algorithm();
        let header = decode_header(token).map_err(|e| TokenError::InvalidToken(e.to_string()))?;
        if header.alg != expected {
            return Err(TokenError::InvalidToken(format!(
                "unexpected signing algorithm {:?}",
                header.alg
            )));
        }

        let key = config.algorithm.decoding_key()?;

        // Expiry, audience and issuer are checked below against our own clock and config.
        let mut validation = Validation::new(expected);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let mut claims = decode::<Claims>(token, &key, &validation)
            .map_err(|e| TokenError::InvalidToken(e.to_string()))?
            .claims;
        claims.normalize_numeric_dates();

        let exp = claims
            .get_i64(CLAIM_EXPIRES_AT)
            .ok_or_else(|| TokenError::InvalidToken("missing exp claim".to_string()))?;
        if self.clock.now().timestamp() >= exp {
            return Err(TokenError::TokenExpired);
        }

        if let Some(issuer) = &config.issuer {
            if claims.get_str(CLAIM_ISSUER) != Some(issuer.as_str()) {
                return Err(TokenError::InvalidIssuer);
            }
        }

        if let Some(token_type) = &config.token_type {
            if claims.get_str(CLAIM_TYPE) != Some(token_type.as_str()) {
                return Err(TokenError::InvalidTokenType);
            }
        }

        claims.insert(CLAIM_TOKEN_ID, Uuid::new_v4().to_string());
        Ok(claims)
    }

    /// [`parse`](Self::parse) plus a membership check on `aud`
    pub fn parse_with_audience(
        &self,
        config: &TokenConfig,
        token: &str,
        audience: &str,
    ) -> Result<Claims, TokenError> {
        let claims = self.parse(config, token)?;
        if !claims.audience().contains(&audience) {
            return Err(TokenError::InvalidAudience);
        }
        Ok(claims)
    }
}

impl fmt::Debug for JwtCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtCodec").finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
