//! JWT Token Handler
//! Mission: Issue and validate HS256 tokens with a single shared secret

use crate::auth::error::{AuthError, AuthResult};
use crate::auth::models::{Claims, TokenType, User};
use crate::config::{ConfigError, JwtConfig};
use anyhow::Context;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;
use uuid::Uuid;

/// The only algorithm tokens are signed with or accepted under
pub const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// JWT Handler for token operations
pub struct JwtHandler {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl JwtHandler {
    /// Build a handler; rejects secrets shorter than the configured minimum
    pub fn new(config: &JwtConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.algorithms = vec![SIGNING_ALGORITHM];
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.leeway = config.leeway_secs;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            access_ttl_secs: config.access_ttl_secs,
            refresh_ttl_secs: config.refresh_ttl_secs,
        })
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl_secs
    }

    pub fn refresh_ttl_secs(&self) -> i64 {
        self.refresh_ttl_secs
    }

    /// Build the claim set for `user`, snapshotting `roles`
    pub fn claims_for(&self, user: &User, roles: Vec<String>, token_type: TokenType) -> Claims {
        let now = Utc::now().timestamp();
        let ttl = match token_type {
            TokenType::Access => self.access_ttl_secs,
            TokenType::Refresh => self.refresh_ttl_secs,
        };

        Claims {
            user_id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            roles,
            token_type,
            iss: self.issuer.clone(),
            iat: now,
            exp: now + ttl,
            jti: Uuid::new_v4().to_string(),
        }
    }

    /// Sign an arbitrary claim set
    pub fn encode_claims(&self, claims: &Claims) -> AuthResult<String> {
        let token = encode(&Header::new(SIGNING_ALGORITHM), claims, &self.encoding_key)
            .context("Failed to sign JWT")?;
        Ok(token)
    }

    /// Generate a signed token of the given type for a user
    pub fn generate_token(
        &self,
        user: &User,
        roles: Vec<String>,
        token_type: TokenType,
    ) -> AuthResult<String> {
        let claims = self.claims_for(user, roles, token_type);

        debug!(
            user_id = user.id,
            token_type = token_type.as_str(),
            "Generating JWT, expires at {}",
            claims.exp
        );

        self.encode_claims(&claims)
    }

    /// Validate signature, algorithm, issuer and expiry.
    ///
    /// Every failure collapses into `InvalidToken`; the specific reason only
    /// reaches the debug log.
    pub fn validate_token(&self, token: &str) -> AuthResult<Claims> {
        let decoded = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            debug!(reason = ?e.kind(), "JWT rejected");
            AuthError::InvalidToken
        })?;

        Ok(decoded.claims)
    }
}

impl std::fmt::Debug for JwtHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtHandler")
            .field("issuer", &self.issuer)
            .field("algorithm", &SIGNING_ALGORITHM)
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .finish()
    }
}
