/// Identity Service Main Entry Point
///
/// Starts the HTTP server with:
/// - Redis connection manager (sessions, revocation, idempotency)
/// - Email sender (SMTP)
/// - User service gRPC client
use actix_middleware::{MetricsMiddleware, RedisIdempotencyStorage};
use actix_web::{App, HttpServer};
use anyhow::{Context, Result};
use crypto_core::{Clock, JwtCodec, SystemClock};
use identity_service::{
    config::Settings,
    http::{configure_routes, HttpState},
    infrastructure::RedisSignInStore,
    security::{RedisRevocationStore, TokenIssuer},
    services::{
        GrpcUserDirectory, RefreshService, SendCodeService, SignInService, SignOutService,
        SmtpEmailSender,
    },
};
use redis_utils::RedisPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "identity_service=info,actix_middleware=info,info".into()
        }))
        .with_target(false)
        .json()
        .init();

    info!("Starting Identity Service");

    // Load configuration
    let settings = Settings::load().context("Failed to load configuration")?;
    info!("Configuration loaded successfully");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let issuer = Arc::new(TokenIssuer::new(
        JwtCodec::new(clock.clone()),
        settings
            .access_token
            .to_token_config()
            .context("Invalid access token configuration")?,
        settings
            .refresh_token
            .to_token_config()
            .context("Invalid refresh token configuration")?,
        settings
            .internal_token
            .to_token_config()
            .context("Invalid internal token configuration")?,
    ));
    info!("Token configurations initialized");

    // Initialize Redis connection pool
    let redis_pool = RedisPool::connect(&settings.redis.url)
        .await
        .context("Failed to connect to Redis")?;
    let redis = redis_pool.manager();
    let redis_timeout = settings.redis.timeout();

    let revocation = Arc::new(RedisRevocationStore::new(
        redis.clone(),
        clock.clone(),
        Duration::from_secs(settings.revocation.fallback_ttl_secs),
        redis_timeout,
    ));
    let signin_store = Arc::new(RedisSignInStore::new(
        redis.clone(),
        Duration::from_secs(settings.signin.session_ttl_secs),
        redis_timeout,
    ));
    let idempotency_storage = Arc::new(RedisIdempotencyStorage::new(
        redis.clone(),
        settings.idempotency.redis_config(redis_timeout),
    ));

    // Initialize email service
    let email = Arc::new(
        SmtpEmailSender::new(&settings.email).context("Failed to initialize email service")?,
    );
    if email.is_enabled() {
        info!("Email service initialized with SMTP");
    } else {
        info!("Email service running in no-op mode (SMTP not configured)");
    }

    let directory = Arc::new(
        GrpcUserDirectory::connect_lazy(
            &settings.user_service.grpc_addr,
            settings.user_service.timeout(),
        )
        .context("Failed to configure user service client")?,
    );

    let state = HttpState {
        send_code: Arc::new(SendCodeService::new(
            signin_store.clone(),
            directory,
            email,
            clock.clone(),
            chrono::Duration::seconds(settings.signin.send_frequency_secs),
        )),
        signin: Arc::new(SignInService::new(signin_store, issuer.clone())),
        refresh: Arc::new(RefreshService::new(issuer.clone(), revocation.clone())),
        signout: Arc::new(SignOutService::new(issuer.clone(), revocation)),
        issuer,
        idempotency_storage,
        idempotency_config: settings.idempotency.guard_config(),
    };

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    info!("Starting HTTP server on {}", addr);

    let mut server = HttpServer::new(move || {
        let state = state.clone();
        App::new()
            .wrap(MetricsMiddleware)
            .wrap(TracingLogger::default())
            .configure(move |cfg| configure_routes(cfg, &state))
    })
    .disable_signals()
    .bind(&addr)
    .with_context(|| format!("Failed to bind {}", addr))?;

    if let Some(workers) = settings.server.workers {
        server = server.workers(workers);
    }

    let server = server.run();
    let handle = server.handle();

    tokio::select! {
        result = server => {
            result.context("HTTP server error")?;
        }
        _ = shutdown_signal() => {
            handle.stop(true).await;
        }
    }

    info!("Identity service shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Shutting down gracefully...");
}
