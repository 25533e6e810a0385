//! Authentication Models
//! Mission: Define secure identity, RBAC and token data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // bcrypt hash - never serialize
    pub active: bool,
    pub email_verified: bool,
    pub email_verified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub verification_token: Option<String>,
    #[serde(skip_serializing)]
    pub verification_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Named bundle of permissions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub description: String,
}

/// Atomic named capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: i64,
    pub name: String,
    pub description: String,
}

/// Which half of the token pair a JWT is
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TokenType {
    #[serde(rename = "access")]
    Access,
    #[serde(rename = "refresh")]
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// JWT Claims payload
///
/// `roles` is a snapshot taken at issuance; authorization decisions
/// re-query membership instead of trusting it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub user_id: i64,
    pub email: String,
    pub username: String,
    pub roles: Vec<String>,
    pub token_type: TokenType,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Access + refresh pair handed out on login
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64, // seconds until the access token expires
}

/// Response of `POST /api/auth/refresh`
#[derive(Debug, Serialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Registration request body
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ResendVerificationRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

/// Role / permission create or rename body
#[derive(Debug, Deserialize)]
pub struct NamedEntityRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// User response (sanitized)
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub active: bool,
    pub email_verified: bool,
    pub created_at: String,
}

impl UserResponse {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            active: user.active,
            email_verified: user.email_verified,
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

/// Login response
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: UserResponse,
    pub roles: Vec<String>,
}

/// `GET /api/auth/me`
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: 7,
            email: "a@x.com".to_string(),
            username: "alice".to_string(),
            password_hash: "$2b$04$hash".to_string(),
            active: true,
            email_verified: false,
            email_verified_at: None,
            verification_token: Some("deadbeef".to_string()),
            verification_expires_at: Some(Utc::now()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_user_never_serializes_secrets() {
        let json = serde_json::to_string(&sample_user()).unwrap();
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("$2b$"));
        assert!(!json.contains("deadbeef"));
        assert!(json.contains("alice"));
    }

    #[test]
    fn test_token_type_serialization() {
        assert_eq!(serde_json::to_string(&TokenType::Access).unwrap(), r#""access""#);
        let refresh: TokenType = serde_json::from_str(r#""refresh""#).unwrap();
        assert_eq!(refresh, TokenType::Refresh);
        assert_eq!(TokenType::Refresh.as_str(), "refresh");
    }

    #[test]
    fn test_user_response_from_user() {
        let response = UserResponse::from_user(&sample_user());
        assert_eq!(response.id, 7);
        assert_eq!(response.email, "a@x.com");
        assert!(!response.email_verified);
    }
}
