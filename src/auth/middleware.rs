//! Authentication Middleware
//! Mission: Protect API endpoints with JWT validation and RBAC gates

use crate::auth::context::{AuthContext, ServedUser};
use crate::auth::error::AuthError;
use crate::auth::jwt::JwtHandler;
use crate::auth::models::TokenType;
use crate::auth::rbac::{Rbac, Requirement};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

/// Pull the bearer token out of the `Authorization` header.
///
/// A missing header and a header that is not `Bearer <token>` are
/// distinct failures.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?;
    let value = value.to_str().map_err(|_| AuthError::MalformedAuthHeader)?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or(AuthError::MalformedAuthHeader)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() || token.contains(' ') {
        return Err(AuthError::MalformedAuthHeader);
    }
    Ok(token)
}

/// Auth middleware that validates access tokens and attaches the identity
pub async fn auth_middleware(
    State(jwt_handler): State<Arc<JwtHandler>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let claims = {
        let token = bearer_token(req.headers())?;
        jwt_handler.validate_token(token)?
    };

    if claims.token_type != TokenType::Access {
        debug!(user_id = claims.user_id, "Refresh token used as bearer");
        return Err(AuthError::InvalidToken);
    }

    let user_id = claims.user_id;
    AuthContext::from_claims(&claims).attach(req.extensions_mut());

    let mut response = next.run(req).await;
    response.extensions_mut().insert(ServedUser(user_id));
    Ok(response)
}

/// State for [`require`]: the engine plus the requirement to enforce
#[derive(Clone)]
pub struct GateState {
    pub rbac: Rbac,
    pub requirement: Arc<Requirement>,
}

impl GateState {
    pub fn new(rbac: Rbac, requirement: Requirement) -> Self {
        Self {
            rbac,
            requirement: Arc::new(requirement),
        }
    }
}

/// RBAC gate, mounted with `from_fn_with_state` after [`auth_middleware`]
pub async fn require(
    State(gate): State<GateState>,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    gate.rbac
        .check(AuthContext::current(req.extensions()), &gate.requirement)?;
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::db::AuthDb;
    use crate::auth::models::User;
    use crate::auth::role_store::RoleStore;
    use crate::auth::user_store::UserStore;
    use crate::config::JwtConfig;
    use axum::{
        body::Body,
        http::{HeaderValue, Request as HttpRequest, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    const SECRET: &str = "middleware-test-secret-at-least-32-bytes";

    fn jwt() -> Arc<JwtHandler> {
        Arc::new(JwtHandler::new(&JwtConfig::new(SECRET)).unwrap())
    }

    fn token_for(jwt: &JwtHandler, user: &User, token_type: TokenType) -> String {
        jwt.generate_token(user, vec![], token_type).unwrap()
    }

    async fn whoami(ctx: AuthContext) -> String {
        ctx.username
    }

    fn protected(jwt: Arc<JwtHandler>) -> Router {
        Router::new()
            .route("/me", get(whoami))
            .layer(from_fn_with_state(jwt, auth_middleware))
    }

    fn get_with(auth: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().uri("/me");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn sample_user(id: i64) -> User {
        User {
            id,
            email: "a@x.com".to_string(),
            username: "alice".to_string(),
            password_hash: String::new(),
            active: true,
            email_verified: true,
            email_verified_at: None,
            verification_token: None,
            verification_expires_at: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_bearer_parsing() {
        let mut headers = HeaderMap::new();
        assert!(matches!(bearer_token(&headers), Err(AuthError::MissingToken)));

        for bad in ["Basic abc", "Bearer", "Bearer ", "abc", "Bearer a b"] {
            headers.insert(header::AUTHORIZATION, HeaderValue::from_static(bad));
            assert!(
                matches!(bearer_token(&headers), Err(AuthError::MalformedAuthHeader)),
                "{bad:?}"
            );
        }

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[tokio::test]
    async fn test_middleware_admits_access_token() {
        let jwt = jwt();
        let token = token_for(&jwt, &sample_user(1), TokenType::Access);

        let response = protected(jwt)
            .oneshot(get_with(Some(&format!("Bearer {token}"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.extensions().get::<ServedUser>(), Some(&ServedUser(1)));
    }

    #[tokio::test]
    async fn test_middleware_rejections() {
        let jwt = jwt();
        let refresh = token_for(&jwt, &sample_user(1), TokenType::Refresh);

        for auth in [
            None,
            Some("Token abc".to_string()),
            Some("Bearer not-a-jwt".to_string()),
            Some(format!("Bearer {refresh}")),
        ] {
            let response = protected(jwt.clone())
                .oneshot(get_with(auth.as_deref()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn test_gate_returns_403_for_missing_permission() {
        let db = Arc::new(AuthDb::open_in_memory().unwrap());
        let users = UserStore::new(db.clone());
        let rbac = Rbac::new(RoleStore::new(db), users.clone());
        let user = users.create_user("a@x.com", "alice", "hash").unwrap();

        let jwt = jwt();
        let token = token_for(&jwt, &user, TokenType::Access);
        let gate = GateState::new(rbac.clone(), Requirement::permission("reports:read"));

        let app = Router::new()
            .route("/me", get(whoami))
            .layer(from_fn_with_state(gate, require))
            .layer(from_fn_with_state(jwt, auth_middleware));

        let bearer = format!("Bearer {token}");
        let denied = app.clone().oneshot(get_with(Some(&bearer))).await.unwrap();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let role = rbac.create_role("analyst", "").unwrap();
        let perm = rbac.create_permission("reports:read", "").unwrap();
        rbac.grant_permission(role.id, perm.id).unwrap();
        rbac.assign_role(user.id, role.id).unwrap();

        // Same token, no re-login: the gate sees the new membership.
        let allowed = app.oneshot(get_with(Some(&bearer))).await.unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_gate_without_identity_is_401() {
        let db = Arc::new(AuthDb::open_in_memory().unwrap());
        let rbac = Rbac::new(RoleStore::new(db.clone()), UserStore::new(db));
        let app = Router::new()
            .route("/me", get(|| async { "ok" }))
            .layer(from_fn_with_state(
                GateState::new(rbac, Requirement::role("admin")),
                require,
            ));

        let response = app.oneshot(get_with(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
