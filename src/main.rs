//! Gatekeeper - authentication and authorization service
//! Mission: Tokens, roles and permissions behind a rate-limited axum API

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use gatekeeper_backend::{
    app,
    auth::{AuthDb, PasswordHasher},
    build_state,
    config::ServerConfig,
    middleware::RateLimiter,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let config = ServerConfig::parse();
    config.validate().context("Invalid configuration")?;

    let db = Arc::new(AuthDb::open(&config.db_path)?);
    info!(path = %config.db_path, "Auth database ready");

    let state = build_state(
        db,
        &config.jwt_config(),
        PasswordHasher::new(config.bcrypt_cost),
    )?;

    match (
        config.bootstrap_admin_email.as_deref(),
        config.bootstrap_admin_password.as_deref(),
    ) {
        (Some(email), Some(password)) => {
            state
                .service
                .bootstrap_admin(email, password)
                .context("Failed to bootstrap admin account")?;
        }
        (Some(_), None) | (None, Some(_)) => {
            warn!("BOOTSTRAP_ADMIN_EMAIL and BOOTSTRAP_ADMIN_PASSWORD must both be set; skipping");
        }
        (None, None) => {}
    }

    let auth_limiter = RateLimiter::new("auth", config.auth_rate_limit());
    let api_limiter = RateLimiter::new("api", config.api_rate_limit());
    auth_limiter.spawn_cleanup(config.cleanup_interval());
    api_limiter.spawn_cleanup(config.cleanup_interval());

    let app = app(state, auth_limiter, api_limiter)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("API server listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

/// Initialize tracing from RUST_LOG, defaulting to debug for this crate
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatekeeper_backend=debug,gatekeeper=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // 1) Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // 2) Also try the package root when launched from elsewhere
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
