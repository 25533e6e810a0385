//! Authentication Service
//! Mission: Credentials, token lifecycle and email verification

use crate::auth::db::is_unique_violation;
use crate::auth::error::{AuthError, AuthResult};
use crate::auth::jwt::JwtHandler;
use crate::auth::models::{Claims, Permission, Role, TokenPair, TokenType, User};
use crate::auth::password::{is_strong_enough, PasswordHasher};
use crate::auth::rbac::Rbac;
use crate::auth::user_store::UserStore;
use chrono::{Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifetime of an email verification token
pub const VERIFICATION_TTL_HOURS: i64 = 24;

/// Random bytes per verification token (hex-encoded to twice as many chars)
const VERIFICATION_TOKEN_BYTES: usize = 32;

pub const ADMIN_ROLE: &str = "admin";
pub const ROLES_MANAGE: &str = "roles:manage";
pub const USERS_MANAGE: &str = "users:manage";

/// Result of a successful registration
#[derive(Debug)]
pub struct Registration {
    pub user: User,
    /// Handed to the (external) mailer, never logged
    pub verification_token: String,
}

/// Result of a successful login
#[derive(Debug)]
pub struct LoginOutcome {
    pub tokens: TokenPair,
    pub user: User,
    pub roles: Vec<String>,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_email(email: &str) -> AuthResult<()> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err(AuthError::InvalidInput("malformed email"));
    };
    let domain_ok = domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains('@');
    if local.is_empty() || !domain_ok || email.chars().any(char::is_whitespace) {
        return Err(AuthError::InvalidInput("malformed email"));
    }
    Ok(())
}

fn validate_username(username: &str) -> AuthResult<()> {
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err(AuthError::InvalidInput("username must be 3-32 characters"));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(AuthError::InvalidInput("username contains invalid characters"));
    }
    Ok(())
}

fn new_verification_token() -> String {
    let mut bytes = [0u8; VERIFICATION_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Credential checks and token issuance over the identity store
#[derive(Clone)]
pub struct AuthService {
    users: UserStore,
    rbac: Rbac,
    jwt: Arc<JwtHandler>,
    hasher: PasswordHasher,
}

impl AuthService {
    pub fn new(users: UserStore, rbac: Rbac, jwt: Arc<JwtHandler>, hasher: PasswordHasher) -> Self {
        Self {
            users,
            rbac,
            jwt,
            hasher,
        }
    }

    pub fn rbac(&self) -> &Rbac {
        &self.rbac
    }

    pub fn jwt(&self) -> &Arc<JwtHandler> {
        &self.jwt
    }

    // ---- registration ----

    pub fn register(&self, email: &str, username: &str, password: &str) -> AuthResult<Registration> {
        let email = normalize_email(email);
        let username = username.trim();
        validate_email(&email)?;
        validate_username(username)?;
        if !is_strong_enough(password) {
            return Err(AuthError::WeakPassword);
        }

        if self.users.get_by_email(&email)?.is_some()
            || self.users.get_by_username(username)?.is_some()
        {
            return Err(AuthError::UserAlreadyExists);
        }

        let hash = self.hasher.hash(password)?;
        let user = self
            .users
            .create_user(&email, username, &hash)
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AuthError::UserAlreadyExists
                } else {
                    AuthError::Internal(e)
                }
            })?;

        let verification_token = self.generate_verification_token(user.id)?;
        Ok(Registration {
            user,
            verification_token,
        })
    }

    // ---- credentials and tokens ----

    /// Inactive accounts are refused before the password is checked, so the
    /// answer is `InactiveUser` whether or not the password matches.
    pub fn authenticate(&self, email: &str, password: &str) -> AuthResult<LoginOutcome> {
        let email = normalize_email(email);
        let user = self
            .users
            .get_by_email(&email)?
            .ok_or(AuthError::InvalidCredentials)?;

        if !user.active {
            warn!(user_id = user.id, "Login attempt on inactive account");
            return Err(AuthError::InactiveUser);
        }
        if !self.hasher.verify(password, &user.password_hash) {
            warn!(user_id = user.id, "Failed login attempt");
            return Err(AuthError::InvalidCredentials);
        }

        let roles = self.snapshot_roles(user.id);
        let access_token = self
            .jwt
            .generate_token(&user, roles.clone(), TokenType::Access)?;
        let refresh_token = self
            .jwt
            .generate_token(&user, roles.clone(), TokenType::Refresh)?;

        info!(user_id = user.id, roles = roles.len(), "Login successful");

        Ok(LoginOutcome {
            tokens: TokenPair {
                access_token,
                refresh_token,
                token_type: "Bearer",
                expires_in: self.jwt.access_ttl_secs(),
            },
            user,
            roles,
        })
    }

    /// Role lookup failures degrade to an empty snapshot instead of failing issuance
    fn snapshot_roles(&self, user_id: i64) -> Vec<String> {
        self.rbac.user_role_names(user_id).unwrap_or_else(|e| {
            warn!(user_id, error = %e, "Role lookup failed during token issuance");
            Vec::new()
        })
    }

    pub fn validate_token(&self, token: &str) -> AuthResult<Claims> {
        self.jwt.validate_token(token)
    }

    /// Issue a fresh access token. The refresh token is not rotated.
    pub fn refresh_access_token(&self, refresh_token: &str) -> AuthResult<String> {
        let claims = self.jwt.validate_token(refresh_token)?;
        if claims.token_type != TokenType::Refresh {
            debug!(user_id = claims.user_id, "Access token presented for refresh");
            return Err(AuthError::InvalidToken);
        }

        let user = self
            .users
            .get_by_id(claims.user_id)?
            .ok_or(AuthError::UserNotFound)?;
        if !user.active {
            return Err(AuthError::InactiveUser);
        }

        let roles = self.snapshot_roles(user.id);
        let token = self.jwt.generate_token(&user, roles, TokenType::Access)?;
        debug!(user_id = user.id, "Access token refreshed");
        Ok(token)
    }

    // ---- email verification ----

    /// Overwrites any previous token for the identity
    pub fn generate_verification_token(&self, user_id: i64) -> AuthResult<String> {
        let token = new_verification_token();
        let expires_at = Utc::now() + Duration::hours(VERIFICATION_TTL_HOURS);

        if !self.users.set_verification_token(user_id, &token, expires_at)? {
            return Err(AuthError::UserNotFound);
        }
        info!(user_id, %expires_at, "Verification token issued");
        Ok(token)
    }

    pub fn verify_email(&self, token: &str) -> AuthResult<User> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        let Some(user) = self.users.get_by_verification_token(token)? else {
            // A consumed token no longer matches the live column; recognise
            // it by digest so a replay reads as AlreadyVerified.
            return match self.users.get_by_consumed_token_digest(&token_digest(token))? {
                Some(_) => Err(AuthError::AlreadyVerified),
                None => Err(AuthError::InvalidToken),
            };
        };

        if user.email_verified {
            return Err(AuthError::AlreadyVerified);
        }
        match user.verification_expires_at {
            Some(expires_at) if expires_at > Utc::now() => {}
            _ => return Err(AuthError::TokenExpired),
        }

        let now = Utc::now();
        if !self
            .users
            .consume_verification_token(user.id, token, now, &token_digest(token))?
        {
            // Lost the race to a concurrent call with the same token
            return Err(AuthError::AlreadyVerified);
        }

        info!(user_id = user.id, "Email verified");
        Ok(User {
            email_verified: true,
            email_verified_at: Some(now),
            verification_token: None,
            verification_expires_at: None,
            ..user
        })
    }

    pub fn resend_verification(&self, email: &str) -> AuthResult<String> {
        let user = self
            .users
            .get_by_email(&normalize_email(email))?
            .ok_or(AuthError::UserNotFound)?;
        if user.email_verified {
            return Err(AuthError::AlreadyVerified);
        }
        self.generate_verification_token(user.id)
    }

    // ---- account administration ----

    pub fn get_user(&self, user_id: i64) -> AuthResult<User> {
        self.users.get_by_id(user_id)?.ok_or(AuthError::UserNotFound)
    }

    pub fn list_users(&self) -> AuthResult<Vec<User>> {
        Ok(self.users.list_users()?)
    }

    pub fn set_active(&self, user_id: i64, active: bool) -> AuthResult<()> {
        if !self.users.set_active(user_id, active)? {
            return Err(AuthError::UserNotFound);
        }
        info!(user_id, active, "Account activation changed");
        Ok(())
    }

    pub fn change_password(&self, user_id: i64, current: &str, new: &str) -> AuthResult<()> {
        let user = self.get_user(user_id)?;
        if !self.hasher.verify(current, &user.password_hash) {
            warn!(user_id, "Password change with wrong current password");
            return Err(AuthError::InvalidCredentials);
        }
        if !is_strong_enough(new) {
            return Err(AuthError::WeakPassword);
        }

        let hash = self.hasher.hash(new)?;
        self.users.update_password_hash(user_id, &hash)?;
        info!(user_id, "Password changed");
        Ok(())
    }

    pub fn user_roles(&self, user_id: i64) -> AuthResult<Vec<Role>> {
        self.get_user(user_id)?;
        self.rbac.user_roles(user_id)
    }

    pub fn user_permissions(&self, user_id: i64) -> AuthResult<Vec<Permission>> {
        self.get_user(user_id)?;
        self.rbac.user_permissions(user_id)
    }

    /// Seed the `admin` role, its management permissions and an active,
    /// verified identity holding it. Safe to run on every startup.
    pub fn bootstrap_admin(&self, email: &str, password: &str) -> AuthResult<User> {
        let role = match self.rbac.role_by_name(ADMIN_ROLE)? {
            Some(role) => role,
            None => self.rbac.create_role(ADMIN_ROLE, "Full administrative access")?,
        };
        for (name, description) in [
            (ROLES_MANAGE, "Manage roles, permissions and grants"),
            (USERS_MANAGE, "Manage user role assignments"),
        ] {
            let permission = match self.rbac.permission_by_name(name)? {
                Some(p) => p,
                None => self.rbac.create_permission(name, description)?,
            };
            self.rbac.grant_permission(role.id, permission.id)?;
        }

        let email = normalize_email(email);
        let user = match self.users.get_by_email(&email)? {
            // Registration does not prove ownership of the address, so an
            // existing account is only promoted if it holds the configured password.
            Some(user) => {
                if !self.hasher.verify(password, &user.password_hash) {
                    warn!(
                        user_id = user.id,
                        "Bootstrap email belongs to an account with a different password; not promoting"
                    );
                    return Err(AuthError::InvalidCredentials);
                }
                user
            }
            None => {
                validate_email(&email)?;
                if !is_strong_enough(password) {
                    return Err(AuthError::WeakPassword);
                }
                let username = match self.users.get_by_username(ADMIN_ROLE)? {
                    None => ADMIN_ROLE.to_string(),
                    Some(_) => format!("admin-{}", &new_verification_token()[..8]),
                };
                let hash = self.hasher.hash(password)?;
                self.users.create_user(&email, &username, &hash)?
            }
        };

        if !user.active {
            self.users.set_active(user.id, true)?;
        }
        if !user.email_verified {
            self.users.mark_email_verified(user.id, Utc::now())?;
        }
        self.rbac.assign_role(user.id, role.id)?;

        info!(user_id = user.id, "Bootstrap admin ready");
        self.get_user(user.id)
    }
}
