//! Startup Configuration
//! Mission: Parse flags / environment once and fail fast on bad values

use crate::middleware::rate_limit::RateLimitConfig;
use clap::Parser;
use std::time::Duration;
use thiserror::Error;

/// Minimum HMAC secret length in bytes
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("JWT secret is not configured (set JWT_SECRET)")]
    MissingSecret,
    #[error("JWT secret must be at least {min} bytes, got {len}")]
    SecretTooShort { len: usize, min: usize },
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// Token signing configuration
#[derive(Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub leeway_secs: u64,
}

impl JwtConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            issuer: "gatekeeper".to_string(),
            access_ttl_secs: 15 * 60,
            refresh_ttl_secs: 7 * 24 * 3600,
            leeway_secs: 0,
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn with_ttls(mut self, access_secs: i64, refresh_secs: i64) -> Self {
        self.access_ttl_secs = access_secs;
        self.refresh_ttl_secs = refresh_secs;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        if self.secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::SecretTooShort {
                len: self.secret.len(),
                min: MIN_SECRET_LEN,
            });
        }
        if self.access_ttl_secs <= 0 || self.refresh_ttl_secs <= 0 {
            return Err(ConfigError::InvalidValue {
                name: "token ttl",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

/// Server configuration from flags or environment (after `.env` loading)
#[derive(Parser, Clone)]
#[command(name = "gatekeeper")]
#[command(about = "Authentication and authorization service")]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind_addr: String,

    /// SQLite database file
    #[arg(long, env = "AUTH_DB_PATH", default_value = "gatekeeper_auth.db")]
    pub db_path: String,

    /// HMAC secret, at least 32 bytes
    #[arg(long, env = "JWT_SECRET", hide_env_values = true, default_value = "")]
    pub jwt_secret: String,

    #[arg(long, env = "JWT_ISSUER", default_value = "gatekeeper")]
    pub jwt_issuer: String,

    #[arg(long, env = "ACCESS_TOKEN_TTL_SECS", default_value = "900")]
    pub access_ttl_secs: i64,

    #[arg(long, env = "REFRESH_TOKEN_TTL_SECS", default_value = "604800")]
    pub refresh_ttl_secs: i64,

    #[arg(long, env = "JWT_LEEWAY_SECS", default_value = "0")]
    pub jwt_leeway_secs: u64,

    /// bcrypt work factor
    #[arg(long, env = "BCRYPT_COST", default_value_t = bcrypt::DEFAULT_COST)]
    pub bcrypt_cost: u32,

    /// Requests per window on the authentication endpoints
    #[arg(long, env = "AUTH_RATE_LIMIT", default_value = "5")]
    pub auth_rate_limit: usize,

    #[arg(long, env = "AUTH_RATE_WINDOW_SECS", default_value = "60")]
    pub auth_rate_window_secs: u64,

    /// Requests per window on the general API
    #[arg(long, env = "API_RATE_LIMIT", default_value = "100")]
    pub api_rate_limit: usize,

    #[arg(long, env = "API_RATE_WINDOW_SECS", default_value = "60")]
    pub api_rate_window_secs: u64,

    /// How often idle rate-limit keys are purged
    #[arg(long, env = "RATE_LIMIT_CLEANUP_SECS", default_value = "60")]
    pub rate_limit_cleanup_secs: u64,

    /// Seed an admin identity on startup when both are set
    #[arg(long, env = "BOOTSTRAP_ADMIN_EMAIL")]
    pub bootstrap_admin_email: Option<String>,

    #[arg(long, env = "BOOTSTRAP_ADMIN_PASSWORD", hide_env_values = true)]
    pub bootstrap_admin_password: Option<String>,
}

impl ServerConfig {
    pub fn jwt_config(&self) -> JwtConfig {
        JwtConfig {
            secret: self.jwt_secret.clone(),
            issuer: self.jwt_issuer.clone(),
            access_ttl_secs: self.access_ttl_secs,
            refresh_ttl_secs: self.refresh_ttl_secs,
            leeway_secs: self.jwt_leeway_secs,
        }
    }

    pub fn auth_rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::new(
            self.auth_rate_limit,
            Duration::from_secs(self.auth_rate_window_secs),
        )
    }

    pub fn api_rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::new(
            self.api_rate_limit,
            Duration::from_secs(self.api_rate_window_secs),
        )
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cleanup_secs.max(1))
    }

    /// Everything that must hold before the server starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.jwt_config().validate()?;

        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(ConfigError::InvalidValue {
                name: "BCRYPT_COST",
                reason: format!("{} is outside 4..=31", self.bcrypt_cost),
            });
        }
        for (name, limit, window) in [
            ("AUTH_RATE_LIMIT", self.auth_rate_limit, self.auth_rate_window_secs),
            ("API_RATE_LIMIT", self.api_rate_limit, self.api_rate_window_secs),
        ] {
            if limit == 0 || window == 0 {
                return Err(ConfigError::InvalidValue {
                    name,
                    reason: "limit and window must both be non-zero".to_string(),
                });
            }
        }
        Ok(())
    }
}
