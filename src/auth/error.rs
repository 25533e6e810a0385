//! Authentication Errors
//! Mission: One taxonomy for every auth failure, rendered without leaking internals

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

pub type AuthResult<T> = Result<T, AuthError>;

/// Every failure the auth core can surface.
///
/// `Display` text is for logs only; the outward body is chosen in
/// [`IntoResponse`] from a fixed table.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("user is inactive")]
    InactiveUser,
    #[error("invalid token")]
    InvalidToken,
    #[error("missing authorization token")]
    MissingToken,
    #[error("malformed authorization header")]
    MalformedAuthHeader,
    #[error("no authenticated identity in request context")]
    Unauthenticated,
    #[error("forbidden")]
    Forbidden,
    #[error("name already in use: {0}")]
    DuplicateName(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("user not found")]
    UserNotFound,
    #[error("user already exists")]
    UserAlreadyExists,
    #[error("role is still assigned to at least one user")]
    RoleInUse,
    #[error("assignment does not exist")]
    NotAssigned,
    #[error("verification token expired")]
    TokenExpired,
    #[error("email already verified")]
    AlreadyVerified,
    #[error("password must be at least 8 characters")]
    WeakPassword,
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Duration },
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Stable machine-readable code used in response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::InactiveUser => "inactive_user",
            AuthError::InvalidToken => "invalid_token",
            AuthError::MissingToken => "missing_token",
            AuthError::MalformedAuthHeader => "malformed_auth_header",
            AuthError::Unauthenticated => "unauthenticated",
            AuthError::Forbidden => "forbidden",
            AuthError::DuplicateName(_) => "duplicate_name",
            AuthError::NotFound(_) => "not_found",
            AuthError::UserNotFound => "user_not_found",
            AuthError::UserAlreadyExists => "user_already_exists",
            AuthError::RoleInUse => "role_in_use",
            AuthError::NotAssigned => "not_assigned",
            AuthError::TokenExpired => "token_expired",
            AuthError::AlreadyVerified => "already_verified",
            AuthError::WeakPassword => "weak_password",
            AuthError::InvalidInput(_) => "invalid_input",
            AuthError::RateLimited { .. } => "rate_limited",
            AuthError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::MissingToken
            | AuthError::MalformedAuthHeader
            | AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthError::InactiveUser | AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::NotFound(_) | AuthError::UserNotFound | AuthError::NotAssigned => {
                StatusCode::NOT_FOUND
            }
            AuthError::DuplicateName(_)
            | AuthError::UserAlreadyExists
            | AuthError::RoleInUse
            | AuthError::AlreadyVerified => StatusCode::CONFLICT,
            AuthError::TokenExpired => StatusCode::GONE,
            AuthError::WeakPassword | AuthError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "Invalid email or password",
            AuthError::InactiveUser => "Account is disabled",
            AuthError::InvalidToken => "Invalid or expired token",
            AuthError::MissingToken => "Missing authorization token",
            AuthError::MalformedAuthHeader => {
                "Invalid authorization format. Use: Bearer {token}"
            }
            AuthError::Unauthenticated => "Authentication required",
            AuthError::Forbidden => "Insufficient permissions",
            AuthError::DuplicateName(_) => "Name already exists",
            AuthError::NotFound(_) => "Resource not found",
            AuthError::UserNotFound => "User not found",
            AuthError::UserAlreadyExists => "Email or username already registered",
            AuthError::RoleInUse => "Role is still assigned to users",
            AuthError::NotAssigned => "Assignment not found",
            AuthError::TokenExpired => "Verification token has expired",
            AuthError::AlreadyVerified => "Email already verified",
            AuthError::WeakPassword => "Password must be at least 8 characters",
            AuthError::InvalidInput(_) => "Invalid request",
            AuthError::RateLimited { .. } => "Too many requests. Please slow down.",
            AuthError::Internal(_) => "Internal server error",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            AuthError::Internal(e) => error!(error = ?e, "auth request failed"),
            AuthError::RateLimited { .. } => {}
            other if status.is_client_error() => {
                warn!(code = other.code(), "auth request rejected: {}", other)
            }
            _ => {}
        }

        let body = Json(json!({
            "error": self.code(),
            "message": self.public_message(),
        }));

        let mut response = (status, body).into_response();
        if let AuthError::RateLimited { retry_after } = self {
            let secs = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<rusqlite::Error> for AuthError {
    fn from(e: rusqlite::Error) -> Self {
        AuthError::Internal(e.into())
    }
}
