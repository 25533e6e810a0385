//! Gatekeeper Backend Library
//!
//! Token issuance, RBAC and rate limiting for an axum service. The binary in
//! `main.rs` wires these together; tests drive them through [`app`].

pub mod auth;
pub mod config;
pub mod middleware;

use crate::auth::{
    api::{self, AuthState},
    AuthDb, AuthService, JwtHandler, PasswordHasher, Rbac, RoleStore, UserStore,
};
use crate::config::{ConfigError, JwtConfig};
use crate::middleware::{request_logging, RateLimiter};
use axum::{routing::get, Router};
use std::sync::Arc;

/// Assemble the auth service over an open database
pub fn build_state(
    db: Arc<AuthDb>,
    jwt: &JwtConfig,
    hasher: PasswordHasher,
) -> Result<AuthState, ConfigError> {
    let users = UserStore::new(db.clone());
    let rbac = Rbac::new(RoleStore::new(db), users.clone());
    let jwt = Arc::new(JwtHandler::new(jwt)?);

    Ok(AuthState::new(AuthService::new(users, rbac, jwt, hasher)))
}

/// Full HTTP application: auth routes, `/health` and request logging
pub fn app(state: AuthState, auth_limiter: RateLimiter, api_limiter: RateLimiter) -> Router {
    api::router(state, auth_limiter, api_limiter)
        .route("/health", get(health_check))
        .layer(axum::middleware::from_fn(request_logging))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
