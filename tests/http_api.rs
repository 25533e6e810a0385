//! HTTP surface driven through the assembled router with `oneshot`.

use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{header, Method, Request, StatusCode},
    Router,
};
use gatekeeper_backend::auth::{AuthDb, AuthState, PasswordHasher};
use gatekeeper_backend::config::JwtConfig;
use gatekeeper_backend::middleware::{RateLimitConfig, RateLimiter};
use gatekeeper_backend::{app, build_state};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const SECRET: &str = "http-test-secret-that-is-at-least-32-bytes";

fn state() -> AuthState {
    let db = Arc::new(AuthDb::open_in_memory().unwrap());
    build_state(db, &JwtConfig::new(SECRET), PasswordHasher::new(4)).unwrap()
}

fn router(state: AuthState, auth_limit: usize) -> Router {
    app(
        state,
        RateLimiter::new("auth", RateLimitConfig::new(auth_limit, Duration::from_secs(60))),
        RateLimiter::new("api", RateLimitConfig::api()),
    )
}

fn request(method: Method, uri: &str, bearer: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let mut req = builder.body(body).unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
    req
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn login(app: &Router, email: &str, password: &str) -> String {
    let (status, body) = send(
        app,
        request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": email, "password": password })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["access_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_is_public() {
    let app = router(state(), 5);
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn register_login_and_me() {
    let app = router(state(), 10);

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "email": "a@x.com", "username": "alice", "password": "P@ssw0rd!" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["email"], "a@x.com");
    assert!(body.get("password_hash").is_none());

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "a@x.com", "password": "wrong" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_credentials");

    let token = login(&app, "a@x.com", "P@ssw0rd!").await;
    let (status, body) = send(&app, request(Method::GET, "/api/auth/me", Some(&token), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["roles"], json!([]));
}

#[tokio::test]
async fn missing_and_malformed_bearer_are_distinct() {
    let app = router(state(), 5);

    let (status, body) = send(&app, request(Method::GET, "/api/auth/me", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "missing_token");

    let mut req = request(Method::GET, "/api/auth/me", None, None);
    req.headers_mut()
        .insert(header::AUTHORIZATION, "Basic YTpi".parse().unwrap());
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "malformed_auth_header");
}

#[tokio::test]
async fn admin_routes_distinguish_401_and_403() {
    let state = state();
    state
        .service
        .bootstrap_admin("root@x.com", "AdminP@ss1")
        .unwrap();
    state
        .service
        .register("a@x.com", "alice", "P@ssw0rd!")
        .unwrap();
    let app = router(state, 10);

    let (status, _) = send(&app, request(Method::GET, "/api/admin/roles", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let user_token = login(&app, "a@x.com", "P@ssw0rd!").await;
    let (status, body) = send(
        &app,
        request(Method::GET, "/api/admin/roles", Some(&user_token), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let admin_token = login(&app, "root@x.com", "AdminP@ss1").await;
    let (status, body) = send(
        &app,
        request(Method::GET, "/api/admin/roles", Some(&admin_token), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "admin");
}

#[tokio::test]
async fn admin_manages_roles_and_memberships() {
    let state = state();
    state
        .service
        .bootstrap_admin("root@x.com", "AdminP@ss1")
        .unwrap();
    let alice = state
        .service
        .register("a@x.com", "alice", "P@ssw0rd!")
        .unwrap()
        .user;
    let app = router(state, 10);
    let admin = login(&app, "root@x.com", "AdminP@ss1").await;

    let (status, role) = send(
        &app,
        request(
            Method::POST,
            "/api/admin/roles",
            Some(&admin),
            Some(json!({ "name": "support", "description": "Help desk" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let role_id = role["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/admin/roles",
            Some(&admin),
            Some(json!({ "name": "support" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "duplicate_name");

    let membership = format!("/api/admin/users/{}/roles/{}", alice.id, role_id);
    let (status, _) = send(&app, request(Method::POST, &membership, Some(&admin), None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Support may now list users with an existing token: gates read live membership.
    let alice_token = login(&app, "a@x.com", "P@ssw0rd!").await;
    let (status, users) = send(
        &app,
        request(Method::GET, "/api/admin/users", Some(&alice_token), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(users.as_array().unwrap().len(), 2);

    let role_uri = format!("/api/admin/roles/{role_id}");
    let (status, body) = send(&app, request(Method::DELETE, &role_uri, Some(&admin), None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "role_in_use");

    let (status, _) = send(&app, request(Method::DELETE, &membership, Some(&admin), None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = send(&app, request(Method::DELETE, &membership, Some(&admin), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_assigned");

    let (status, _) = send(&app, request(Method::DELETE, &role_uri, Some(&admin), None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn auth_limiter_answers_429_with_retry_after() {
    let app = router(state(), 2);
    let body = json!({ "email": "nobody@x.com", "password": "whatever1" });

    for _ in 0..2 {
        let (status, _) = send(
            &app,
            request(Method::POST, "/api/auth/login", None, Some(body.clone())),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let response = app
        .clone()
        .oneshot(request(Method::POST, "/api/auth/login", None, Some(body)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
}

#[tokio::test]
async fn refresh_and_verification_over_http() {
    let state = state();
    let reg = state
        .service
        .register("a@x.com", "alice", "P@ssw0rd!")
        .unwrap();
    let app = router(state, 20);

    let (_, tokens) = send(
        &app,
        request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "a@x.com", "password": "P@ssw0rd!" })),
        ),
    )
    .await;
    let refresh = tokens["refresh_token"].as_str().unwrap();

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/auth/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["access_token"].as_str().is_some());

    // A refresh token is not a bearer credential.
    let (status, _) = send(&app, request(Method::GET, "/api/auth/me", Some(refresh), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let verify = json!({ "token": reg.verification_token });
    let (status, body) = send(
        &app,
        request(Method::POST, "/api/auth/verify-email", None, Some(verify.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email_verified"], true);

    let (status, body) = send(
        &app,
        request(Method::POST, "/api/auth/verify-email", None, Some(verify)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_verified");
}

#[tokio::test]
async fn users_manage_cannot_grant_the_admin_role() {
    let state = state();
    let admin = state
        .service
        .bootstrap_admin("root@x.com", "AdminP@ss1")
        .unwrap();
    let helper = state
        .service
        .register("h@x.com", "helper", "P@ssw0rd!")
        .unwrap()
        .user;
    let rbac = state.service.rbac();
    let helpdesk = rbac.create_role("helpdesk", "").unwrap();
    let manage = rbac.permission_by_name("users:manage").unwrap().unwrap();
    rbac.grant_permission(helpdesk.id, manage.id).unwrap();
    rbac.assign_role(helper.id, helpdesk.id).unwrap();
    let viewer = rbac.create_role("viewer", "").unwrap();
    let admin_role = rbac.role_by_name("admin").unwrap().unwrap();
    let app = router(state, 10);
    let token = login(&app, "h@x.com", "P@ssw0rd!").await;

    let ordinary = format!("/api/admin/users/{}/roles/{}", helper.id, viewer.id);
    let (status, _) = send(&app, request(Method::POST, &ordinary, Some(&token), None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let escalate = format!("/api/admin/users/{}/roles/{}", helper.id, admin_role.id);
    let (status, body) = send(&app, request(Method::POST, &escalate, Some(&token), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let demote = format!("/api/admin/users/{}/roles/{}", admin.id, admin_role.id);
    let (status, _) = send(&app, request(Method::DELETE, &demote, Some(&token), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, request(Method::GET, "/api/auth/me", Some(&token), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["roles"]
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r == "admin"));
}
