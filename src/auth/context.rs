//! Request Context
//! Mission: Carry the authenticated identity from token validation to handlers

use crate::auth::error::AuthError;
use crate::auth::models::Claims;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts, http::Extensions};
use serde::Serialize;

/// Authenticated identity attached to a request after bearer validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    pub user_id: i64,
    pub email: String,
    pub username: String,
    /// Role names as of token issuance
    pub roles: Vec<String>,
}

/// Private extension key; only this module can insert or read it.
#[derive(Clone)]
struct CurrentIdentity(AuthContext);

impl AuthContext {
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            user_id: claims.user_id,
            email: claims.email.clone(),
            username: claims.username.clone(),
            roles: claims.roles.clone(),
        }
    }

    /// True if the role was held when the token was issued. Authorization
    /// gates re-query membership instead; this is for display only.
    pub fn had_role_at_issuance(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Attach this identity to a request's extensions
    pub fn attach(self, extensions: &mut Extensions) {
        extensions.insert(CurrentIdentity(self));
    }

    /// Read the identity attached by the auth middleware, if any
    pub fn current(extensions: &Extensions) -> Option<&AuthContext> {
        extensions.get::<CurrentIdentity>().map(|c| &c.0)
    }

    /// Like [`current`](Self::current) but absence is `Unauthenticated`
    pub fn require(extensions: &Extensions) -> Result<&AuthContext, AuthError> {
        Self::current(extensions).ok_or(AuthError::Unauthenticated)
    }
}

/// Marker the auth middleware leaves on the response so outer layers
/// (request logging) can see who was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServedUser(pub i64);

/// Extractor: handlers taking `AuthContext` reject with 401 when the auth
/// middleware did not run or found no identity.
#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        AuthContext::require(&parts.extensions).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::TokenType;
    use axum::{body::Body, http::Request};

    fn sample_claims() -> Claims {
        Claims {
            user_id: 9,
            email: "a@x.com".to_string(),
            username: "alice".to_string(),
            roles: vec!["editor".to_string()],
            token_type: TokenType::Access,
            iss: "gatekeeper".to_string(),
            iat: 0,
            exp: 0,
            jti: "j".to_string(),
        }
    }

    #[test]
    fn test_attach_and_read_back() {
        let mut req = Request::new(Body::empty());
        assert!(AuthContext::current(req.extensions()).is_none());

        AuthContext::from_claims(&sample_claims()).attach(req.extensions_mut());

        let ctx = AuthContext::current(req.extensions()).unwrap();
        assert_eq!(ctx.user_id, 9);
        assert_eq!(ctx.username, "alice");
        assert!(ctx.had_role_at_issuance("editor"));
    }

    #[test]
    fn test_plain_extension_is_not_an_identity() {
        let mut req = Request::new(Body::empty());
        // A bare AuthContext inserted by unrelated code is not picked up.
        req.extensions_mut()
            .insert(AuthContext::from_claims(&sample_claims()));

        assert!(matches!(
            AuthContext::require(req.extensions()),
            Err(AuthError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_extractor_rejects_without_identity() {
        let req = Request::new(Body::empty());
        let (mut parts, _) = req.into_parts();

        let result = AuthContext::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(AuthError::Unauthenticated)));
    }
}
