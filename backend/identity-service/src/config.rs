//! Configuration management for Identity Service
//!
//! Loads settings from environment variables; a `.env` file is honoured in
//! debug builds.
//!
//! # Example
//!
//! ```no_run
//! use identity_service::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     println!("listening on {}:{}", settings.server.host, settings.server.port);
//!     Ok(())
//! }
//! ```

use anyhow::{bail, Context, Result};
use crate::security::token_issuer::{ACCESS_TOKEN_TYPE, INTERNAL_TOKEN_TYPE, REFRESH_TOKEN_TYPE};
use crypto_core::jwt::{SigningAlgorithm, TokenConfig};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::info;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub redis: RedisSettings,
    pub access_token: TokenSettings,
    pub refresh_token: TokenSettings,
    pub internal_token: TokenSettings,
    pub revocation: RevocationSettings,
    pub signin: SignInSettings,
    pub idempotency: IdempotencySettings,
    pub email: EmailSettings,
    pub user_service: UserServiceSettings,
}

impl Settings {
    pub fn load() -> Result<Self> {
        // Load .env file in development
        if cfg!(debug_assertions) && dotenvy::dotenv().is_ok() {
            info!("Loaded .env file for development");
        }

        let settings = Settings {
            server: ServerSettings::from_env()?,
            redis: RedisSettings::from_env()?,
            access_token: TokenSettings::from_env(
                "ACCESS_TOKEN",
                ACCESS_TOKEN_TYPE,
                "HS256",
                15 * 60,
            )?,
            refresh_token: TokenSettings::from_env(
                "REFRESH_TOKEN",
                REFRESH_TOKEN_TYPE,
                "HS256",
                30 * 24 * 60 * 60,
            )?,
            internal_token: TokenSettings::from_env(
                "INTERNAL_TOKEN",
                INTERNAL_TOKEN_TYPE,
                "RS256",
                5 * 60,
            )?,
            revocation: RevocationSettings::from_env()?,
            signin: SignInSettings::from_env()?,
            idempotency: IdempotencySettings::from_env()?,
            email: EmailSettings::from_env()?,
            user_service: UserServiceSettings::from_env()?,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if SigningAlgorithm::is_symmetric_method(&self.internal_token.signing_method)? {
            bail!(
                "INTERNAL_TOKEN_SIGNING_METHOD must be an RSA method, got {}",
                self.internal_token.signing_method
            );
        }

        // `typ` is what keeps the three token kinds apart
        let mut seen: Vec<&str> = Vec::with_capacity(3);
        for token in [&self.access_token, &self.refresh_token, &self.internal_token] {
            let Some(token_type) = token.token_type.as_deref() else {
                bail!("{}_TYPE must not be empty", token.prefix);
            };
            if seen.contains(&token_type) {
                bail!(
                    "{}_TYPE '{}' is already used by another token kind",
                    token.prefix,
                    token_type
                );
            }
            seen.push(token_type);
        }
        if self.internal_token.token_type.as_deref() != Some(INTERNAL_TOKEN_TYPE) {
            bail!("INTERNAL_TOKEN_TYPE must be '{}'", INTERNAL_TOKEN_TYPE);
        }
        Ok(())
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

impl ServerSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid SERVER_PORT")?,
            workers: env::var("SERVER_WORKERS")
                .ok()
                .map(|v| v.parse())
                .transpose()
                .context("Invalid SERVER_WORKERS")?,
        })
    }
}

/// Redis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    pub url: String,
    /// Upper bound for each Redis round trip, in milliseconds
    pub timeout_ms: u64,
}

impl RedisSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("REDIS_URL").context("REDIS_URL must be set")?,
            timeout_ms: env::var("REDIS_TIMEOUT_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .context("Invalid REDIS_TIMEOUT_MS")?,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Settings for one token purpose, read from `{PREFIX}_*` variables
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenSettings {
    pub prefix: String,
    pub signing_method: String,
    pub lifetime_secs: i64,
    pub issuer: Option<String>,
    pub audience: Vec<String>,
    pub token_type: Option<String>,
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub private_key_path: Option<String>,
    pub public_key_path: Option<String>,
}

impl TokenSettings {
    fn from_env(
        prefix: &str,
        default_type: &str,
        default_method: &str,
        default_lifetime_secs: i64,
    ) -> Result<Self> {
        let var = |name: &str| env::var(format!("{}_{}", prefix, name));
        let non_empty = |name: &str| var(name).ok().filter(|v| !v.trim().is_empty());

        Ok(Self {
            prefix: prefix.to_string(),
            signing_method: var("SIGNING_METHOD").unwrap_or_else(|_| default_method.to_string()),
            lifetime_secs: var("LIFETIME_SECS")
                .unwrap_or_else(|_| default_lifetime_secs.to_string())
                .parse()
                .with_context(|| format!("Invalid {}_LIFETIME_SECS", prefix))?,
            issuer: non_empty("ISSUER"),
            audience: var("AUDIENCE")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            token_type: match var("TYPE") {
                Ok(value) if value.trim().is_empty() => None,
                Ok(value) => Some(value),
                Err(_) => Some(default_type.to_string()),
            },
            secret: non_empty("SECRET"),
            private_key_path: non_empty("PRIVATE_KEY_PATH"),
            public_key_path: non_empty("PUBLIC_KEY_PATH"),
        })
    }

    /// Build the codec configuration, reading key files for RSA methods
    pub fn to_token_config(&self) -> Result<TokenConfig> {
        let algorithm = if SigningAlgorithm::is_symmetric_method(&self.signing_method)? {
            let secret = self
                .secret
                .as_ref()
                .with_context(|| format!("{}_SECRET must be set", self.prefix))?;
            SigningAlgorithm::hmac(&self.signing_method, secret.as_bytes().to_vec())?
        } else {
            let public_path = self
                .public_key_path
                .as_ref()
                .with_context(|| format!("{}_PUBLIC_KEY_PATH must be set", self.prefix))?;
            let private_path = self
                .private_key_path
                .as_ref()
                .with_context(|| format!("{}_PRIVATE_KEY_PATH must be set", self.prefix))?;

            let public_pem = std::fs::read(public_path)
                .with_context(|| format!("Failed to read {}", public_path))?;
            let private_pem = std::fs::read(private_path)
                .with_context(|| format!("Failed to read {}", private_path))?;
            SigningAlgorithm::rsa_from_pem(&self.signing_method, &public_pem, Some(&private_pem))?
        };

        let mut config =
            TokenConfig::new(algorithm, chrono::Duration::seconds(self.lifetime_secs));
        if let Some(issuer) = &self.issuer {
            config = config.with_issuer(issuer.clone());
        }
        if !self.audience.is_empty() {
            config = config.with_audience(self.audience.clone());
        }
        if let Some(token_type) = &self.token_type {
            config = config.with_type(token_type.clone());
        }
        Ok(config)
    }
}

impl std::fmt::Debug for TokenSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSettings")
            .field("prefix", &self.prefix)
            .field("signing_method", &self.signing_method)
            .field("lifetime_secs", &self.lifetime_secs)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("token_type", &self.token_type)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .field("public_key_path", &self.public_key_path)
            .finish()
    }
}

/// Revocation store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationSettings {
    /// TTL used when a revoked token's expiry is unknown
    pub fallback_ttl_secs: u64,
}

impl RevocationSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            fallback_ttl_secs: env::var("REVOKED_TOKEN_TTL_SECS")
                .unwrap_or_else(|_| (30 * 24 * 60 * 60).to_string())
                .parse()
                .context("Invalid REVOKED_TOKEN_TTL_SECS")?,
        })
    }
}

/// Sign-in code flow settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInSettings {
    pub session_ttl_secs: u64,
    /// Minimum gap between two codes sent to the same email
    pub send_frequency_secs: i64,
}

impl SignInSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            session_ttl_secs: env::var("SIGNIN_SESSION_TTL_SECS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .context("Invalid SIGNIN_SESSION_TTL_SECS")?,
            send_frequency_secs: env::var("SIGNIN_SEND_FREQUENCY_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("Invalid SIGNIN_SEND_FREQUENCY_SECS")?,
        })
    }
}

/// Idempotency guard settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencySettings {
    pub lock_ttl_secs: u64,
    pub data_ttl_secs: u64,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
}

impl IdempotencySettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            lock_ttl_secs: env::var("IDEMPOTENCY_LOCK_TTL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid IDEMPOTENCY_LOCK_TTL_SECS")?,
            data_ttl_secs: env::var("IDEMPOTENCY_DATA_TTL_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .context("Invalid IDEMPOTENCY_DATA_TTL_SECS")?,
            retry_count: env::var("IDEMPOTENCY_RETRY_COUNT")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("Invalid IDEMPOTENCY_RETRY_COUNT")?,
            retry_delay_ms: env::var("IDEMPOTENCY_RETRY_DELAY_MS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .context("Invalid IDEMPOTENCY_RETRY_DELAY_MS")?,
        })
    }

    pub fn guard_config(&self) -> actix_middleware::IdempotencyConfig {
        actix_middleware::IdempotencyConfig {
            lock_ttl: Duration::from_secs(self.lock_ttl_secs),
            retry_count: self.retry_count,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn redis_config(&self, timeout: Duration) -> actix_middleware::RedisIdempotencyConfig {
        actix_middleware::RedisIdempotencyConfig {
            meta_ttl: Duration::from_secs(self.data_ttl_secs),
            data_ttl: Duration::from_secs(self.data_ttl_secs),
            timeout,
            ..Default::default()
        }
    }
}

/// SMTP settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    #[serde(skip_serializing)]
    pub smtp_password: Option<String>,
    pub smtp_from: String,
    pub use_starttls: bool,
}

impl EmailSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            smtp_host: env::var("SMTP_HOST").unwrap_or_default(),
            smtp_port: env::var("SMTP_PORT")
                .unwrap_or_else(|_| "587".to_string())
                .parse()
                .context("Invalid SMTP_PORT")?,
            smtp_username: env::var("SMTP_USERNAME").ok().filter(|v| !v.is_empty()),
            smtp_password: env::var("SMTP_PASSWORD").ok().filter(|v| !v.is_empty()),
            smtp_from: env::var("SMTP_FROM")
                .unwrap_or_else(|_| "Identity <no-reply@localhost>".to_string()),
            use_starttls: env::var("SMTP_USE_STARTTLS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .context("Invalid SMTP_USE_STARTTLS")?,
        })
    }
}

/// User service (gRPC) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserServiceSettings {
    pub grpc_addr: String,
    pub timeout_ms: u64,
}

impl UserServiceSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            grpc_addr: env::var("USER_SERVICE_GRPC_ADDR")
                .unwrap_or_else(|_| "http://user-service:9080".to_string()),
            timeout_ms: env::var("USER_SERVICE_TIMEOUT_MS")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("Invalid USER_SERVICE_TIMEOUT_MS")?,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear(prefix: &str) {
        for name in [
            "SIGNING_METHOD",
            "LIFETIME_SECS",
            "ISSUER",
            "AUDIENCE",
            "TYPE",
            "SECRET",
            "PRIVATE_KEY_PATH",
            "PUBLIC_KEY_PATH",
        ] {
            env::remove_var(format!("{}_{}", prefix, name));
        }
    }

    #[test]
    #[serial]
    fn test_token_settings_from_env() {
        env::set_var("ACCESS_TOKEN_SIGNING_METHOD", "HS512");
        env::set_var("ACCESS_TOKEN_LIFETIME_SECS", "120");
        env::set_var("ACCESS_TOKEN_ISSUER", "identity");
        env::set_var("ACCESS_TOKEN_AUDIENCE", "api, web,,mobile");
        env::set_var("ACCESS_TOKEN_SECRET", "test-secret-key");

        let settings = TokenSettings::from_env("ACCESS_TOKEN", "access", "HS256", 900).unwrap();

        assert_eq!(settings.signing_method, "HS512");
        assert_eq!(settings.lifetime_secs, 120);
        assert_eq!(settings.issuer.as_deref(), Some("identity"));
        assert_eq!(settings.audience, vec!["api", "web", "mobile"]);
        assert_eq!(settings.token_type.as_deref(), Some("access")); // Default
        assert!(!format!("{:?}", settings).contains("test-secret-key"));

        let config = settings.to_token_config().unwrap();
        assert_eq!(config.lifetime, chrono::Duration::seconds(120));
        assert_eq!(config.token_type.as_deref(), Some("access"));

        clear("ACCESS_TOKEN");
    }

    fn load_with(vars: &[(&str, &str)]) -> Result<Settings> {
        for prefix in ["ACCESS_TOKEN", "REFRESH_TOKEN", "INTERNAL_TOKEN"] {
            clear(prefix);
        }
        env::set_var("REDIS_URL", "redis://localhost:6379");
        for (name, value) in vars {
            env::set_var(name, value);
        }
        let result = Settings::load();
        for (name, _) in vars {
            env::remove_var(name);
        }
        env::remove_var("REDIS_URL");
        result
    }

    #[test]
    #[serial]
    fn test_default_token_types_load() {
        let settings = load_with(&[]).unwrap();
        assert_eq!(settings.access_token.token_type.as_deref(), Some("access"));
        assert_eq!(settings.refresh_token.token_type.as_deref(), Some("refresh"));
        assert_eq!(settings.internal_token.token_type.as_deref(), Some("internal"));
    }

    #[test]
    #[serial]
    fn test_empty_token_types_are_rejected() {
        for prefix in ["ACCESS_TOKEN", "REFRESH_TOKEN", "INTERNAL_TOKEN"] {
            let name = format!("{}_TYPE", prefix);
            let err = load_with(&[(name.as_str(), "")]).unwrap_err();
            assert!(err.to_string().contains(&name), "{}", err);
        }
    }

    #[test]
    #[serial]
    fn test_shared_token_types_are_rejected() {
        let err = load_with(&[("REFRESH_TOKEN_TYPE", "access")]).unwrap_err();
        assert!(err.to_string().contains("REFRESH_TOKEN_TYPE"), "{}", err);

        let err = load_with(&[("ACCESS_TOKEN_TYPE", "internal")]).unwrap_err();
        assert!(err.to_string().contains("INTERNAL_TOKEN_TYPE"), "{}", err);
    }

    #[test]
    #[serial]
    fn test_internal_token_type_is_fixed() {
        let err = load_with(&[("INTERNAL_TOKEN_TYPE", "svc")]).unwrap_err();
        assert!(err.to_string().contains("INTERNAL_TOKEN_TYPE"), "{}", err);

        // Access and refresh types may be renamed
        let settings = load_with(&[
            ("ACCESS_TOKEN_TYPE", "at"),
            ("REFRESH_TOKEN_TYPE", "rt"),
        ])
        .unwrap();
        assert_eq!(settings.access_token.token_type.as_deref(), Some("at"));
    }

    #[test]
    #[serial]
    fn test_symmetric_internal_method_is_rejected() {
        let err = load_with(&[("INTERNAL_TOKEN_SIGNING_METHOD", "HS256")]).unwrap_err();
        assert!(err.to_string().contains("RSA"), "{}", err);
    }

    #[test]
    #[serial]
    fn test_hmac_without_secret_is_rejected() {
        clear("ACCESS_TOKEN");
        let settings = TokenSettings::from_env("ACCESS_TOKEN", "access", "HS256", 900).unwrap();
        let err = settings.to_token_config().unwrap_err();
        assert!(err.to_string().contains("ACCESS_TOKEN_SECRET"));
    }

    #[test]
    #[serial]
    fn test_rsa_keys_are_read_from_files() {
        let fixtures = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");
        env::set_var(
            "INTERNAL_TOKEN_PUBLIC_KEY_PATH",
            format!("{}/internal_public.pem", fixtures),
        );
        env::set_var(
            "INTERNAL_TOKEN_PRIVATE_KEY_PATH",
            format!("{}/internal_private.pem", fixtures),
        );

        let settings = TokenSettings::from_env("INTERNAL_TOKEN", "internal", "RS256", 300).unwrap();
        let config = settings.to_token_config().unwrap();
        assert!(matches!(config.algorithm, SigningAlgorithm::Rsa { .. }));
        assert_eq!(config.token_type.as_deref(), Some("internal"));

        clear("INTERNAL_TOKEN");
    }

    #[test]
    #[serial]
    fn test_unknown_signing_method_is_rejected() {
        env::set_var("ACCESS_TOKEN_SIGNING_METHOD", "none");
        env::set_var("ACCESS_TOKEN_SECRET", "secret");
        let settings = TokenSettings::from_env("ACCESS_TOKEN", "access", "HS256", 900).unwrap();
        assert!(settings.to_token_config().is_err());
        clear("ACCESS_TOKEN");
    }

    #[test]
    #[serial]
    fn test_defaults() {
        for name in [
            "SERVER_PORT",
            "SIGNIN_SESSION_TTL_SECS",
            "SIGNIN_SEND_FREQUENCY_SECS",
            "IDEMPOTENCY_LOCK_TTL_SECS",
            "IDEMPOTENCY_RETRY_COUNT",
            "SMTP_HOST",
        ] {
            env::remove_var(name);
        }

        assert_eq!(ServerSettings::from_env().unwrap().port, 8080);

        let signin = SignInSettings::from_env().unwrap();
        assert_eq!(signin.session_ttl_secs, 600);
        assert_eq!(signin.send_frequency_secs, 60);

        let idempotency = IdempotencySettings::from_env().unwrap();
        let guard = idempotency.guard_config();
        assert_eq!(guard.lock_ttl, Duration::from_secs(30));
        assert_eq!(guard.retry_count, 3);
        assert_eq!(guard.retry_delay, Duration::from_millis(100));

        let email = EmailSettings::from_env().unwrap();
        assert!(email.smtp_host.is_empty());
    }

    #[test]
    #[serial]
    fn test_redis_settings_from_env() {
        env::set_var("REDIS_URL", "redis://localhost:6379");
        env::remove_var("REDIS_TIMEOUT_MS");

        let settings = RedisSettings::from_env().unwrap();

        assert_eq!(settings.url, "redis://localhost:6379");
        assert_eq!(settings.timeout(), Duration::from_secs(1)); // Default

        env::remove_var("REDIS_URL");
    }
}
