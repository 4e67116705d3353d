use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing::{info, warn};

use portico_auth::{TokenBroker, TokenBrokerConfig};
use portico_limiter::{InMemoryLimiter, RateLimiter, RedisLimiter};
use portico_proxy::{ProxyEngine, RateLimitPolicy};
use portico_registry::{Registry, RegistryConfig};

use portico_server::config::Config;
use portico_server::error::ServerError;
use portico_server::router::{AppState, router};

/// Portico API gateway.
#[derive(Parser, Debug)]
#[command(name = "portico", about = "API gateway with dynamic service registration")]
struct Cli {
    /// Override the bind host.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Override the PORT environment variable.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    // RUST_LOG wins over the LOG_LEVEL variable when both are set.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone())),
        )
        .init();

    let registry = Arc::new(Registry::new(RegistryConfig {
        heartbeat_ttl: config.heartbeat_ttl,
        strict_pattern_matching: config.strict_pattern_matching,
    }));
    info!(
        heartbeat_ttl = ?config.heartbeat_ttl,
        health_check_interval = ?config.health_check_interval,
        "registry created"
    );

    let broker = if config.jwt_enabled() {
        let broker = TokenBroker::new(TokenBrokerConfig {
            public_key_pem: config.jwt_public_key.clone(),
            private_key_pem: config.jwt_private_key.clone(),
            issuer: config.jwt_issuer.clone(),
            internal_ttl: config.jwt_internal_ttl,
            allowed_issuers: config.jwt_allowed_issuers.clone(),
        })
        .map_err(|e| ServerError::Broker(e.to_string()))?;
        info!(issuer = %config.jwt_issuer, "jwt authentication enabled");
        Some(Arc::new(broker))
    } else {
        warn!("JWT keys not configured, authentication disabled");
        None
    };

    let mut redis_pool = None;
    let limiter: Option<Arc<dyn RateLimiter>> = if config.rate_limit_enabled {
        match &config.redis_url {
            Some(url) => {
                let pool = deadpool_redis::Config::from_url(url.as_str())
                    .create_pool(Some(deadpool_redis::Runtime::Tokio1))
                    .map_err(|e| ServerError::Redis(e.to_string()))?;
                redis_pool = Some(pool.clone());
                info!("rate limiting enabled with Redis");
                Some(Arc::new(RedisLimiter::new(pool)))
            }
            None => {
                warn!("rate limiting enabled with in-memory limiter (single replica only)");
                Some(Arc::new(InMemoryLimiter::new()))
            }
        }
    } else {
        None
    };

    let mut engine = ProxyEngine::builder(Arc::clone(&registry));
    if let Some(broker) = &broker {
        engine = engine.broker(Arc::clone(broker));
    }
    if let Some(limiter) = limiter {
        engine = engine.limiter(
            limiter,
            RateLimitPolicy {
                user_rpm: config.rate_limit_user_rpm,
                ip_rpm: config.rate_limit_ip_rpm,
            },
        );
    }

    let state = AppState {
        registry: Arc::clone(&registry),
        broker,
        engine: Arc::new(engine.build()),
        start_time: Instant::now(),
        version: config.version.clone(),
    };
    let app = router(state, &config);

    registry.start().await;

    let port = cli.port.unwrap_or(config.port);
    let addr = format!("{}:{}", cli.host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, version = %config.version, env = %config.env, "portico listening");

    // Teardown order on shutdown: stop and join the cleanup loop, then close
    // the Redis pool, then let the HTTP server drain.
    let shutdown_registry = Arc::clone(&registry);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        shutdown_registry.stop().await;
        if let Some(pool) = redis_pool {
            pool.close();
        }
    })
    .await?;

    info!("portico shut down");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger graceful
/// shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
