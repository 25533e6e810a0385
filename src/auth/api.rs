//! Authentication API Endpoints
//! Mission: Expose login, verification and RBAC administration over HTTP

use crate::auth::{
    context::AuthContext,
    error::AuthError,
    jwt::JwtHandler,
    middleware::{auth_middleware, require, GateState},
    models::{
        AccessTokenResponse, ChangePasswordRequest, LoginRequest, LoginResponse, MeResponse,
        NamedEntityRequest, Permission, RefreshRequest, RegisterRequest,
        ResendVerificationRequest, Role, SetActiveRequest, UserResponse, VerifyEmailRequest,
    },
    rbac::{Rbac, Requirement},
    service::{AuthService, ADMIN_ROLE, ROLES_MANAGE, USERS_MANAGE},
};
use crate::middleware::rate_limit::{rate_limit_middleware, RateLimiter};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub service: AuthService,
}

impl AuthState {
    pub fn new(service: AuthService) -> Self {
        Self { service }
    }

    fn rbac(&self) -> &Rbac {
        self.service.rbac()
    }

    fn jwt(&self) -> &Arc<JwtHandler> {
        self.service.jwt()
    }
}

type ApiResult<T> = Result<T, AuthError>;

// ---- public authentication surface ----

/// POST /api/auth/register
pub async fn register(
    State(state): State<AuthState>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<UserResponse>)> {
    let registration =
        state
            .service
            .register(&payload.email, &payload.username, &payload.password)?;

    // Delivery is external; the token value never reaches the log.
    debug!(
        user_id = registration.user.id,
        "Verification token ready for delivery"
    );

    Ok((
        StatusCode::CREATED,
        Json(UserResponse::from_user(&registration.user)),
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let outcome = state.service.authenticate(&payload.email, &payload.password)?;

    Ok(Json(LoginResponse {
        tokens: outcome.tokens,
        user: UserResponse::from_user(&outcome.user),
        roles: outcome.roles,
    }))
}

/// POST /api/auth/refresh
pub async fn refresh(
    State(state): State<AuthState>,
    Json(payload): Json<RefreshRequest>,
) -> ApiResult<Json<AccessTokenResponse>> {
    let access_token = state.service.refresh_access_token(&payload.refresh_token)?;

    Ok(Json(AccessTokenResponse {
        access_token,
        token_type: "Bearer",
        expires_in: state.jwt().access_ttl_secs(),
    }))
}

/// POST /api/auth/verify-email
pub async fn verify_email(
    State(state): State<AuthState>,
    Json(payload): Json<VerifyEmailRequest>,
) -> ApiResult<Json<UserResponse>> {
    let user = state.service.verify_email(&payload.token)?;
    Ok(Json(UserResponse::from_user(&user)))
}

/// POST /api/auth/resend-verification
pub async fn resend_verification(
    State(state): State<AuthState>,
    Json(payload): Json<ResendVerificationRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    state.service.resend_verification(&payload.email)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Verification email queued" })),
    ))
}

// ---- authenticated account surface ----

/// GET /api/auth/me
///
/// Roles and permissions are read live, not from the token snapshot.
pub async fn me(
    State(state): State<AuthState>,
    ctx: AuthContext,
) -> ApiResult<Json<MeResponse>> {
    let user = state.service.get_user(ctx.user_id)?;
    let roles = state.rbac().user_role_names(user.id)?;
    let permissions = state
        .rbac()
        .user_permissions(user.id)?
        .into_iter()
        .map(|p| p.name)
        .collect();

    Ok(Json(MeResponse {
        id: user.id,
        email: user.email,
        username: user.username,
        roles,
        permissions,
    }))
}

/// POST /api/auth/change-password
pub async fn change_password(
    State(state): State<AuthState>,
    ctx: AuthContext,
    Json(payload): Json<ChangePasswordRequest>,
) -> ApiResult<StatusCode> {
    state.service.change_password(
        ctx.user_id,
        &payload.current_password,
        &payload.new_password,
    )?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- roles ----

/// GET /api/admin/roles
pub async fn list_roles(State(state): State<AuthState>) -> ApiResult<Json<Vec<Role>>> {
    Ok(Json(state.rbac().list_roles()?))
}

/// POST /api/admin/roles
pub async fn create_role(
    State(state): State<AuthState>,
    ctx: AuthContext,
    Json(payload): Json<NamedEntityRequest>,
) -> ApiResult<(StatusCode, Json<Role>)> {
    let role = state.rbac().create_role(&payload.name, &payload.description)?;
    info!(actor = ctx.user_id, role_id = role.id, "Admin created role");
    Ok((StatusCode::CREATED, Json(role)))
}

/// PUT /api/admin/roles/:id
pub async fn update_role(
    State(state): State<AuthState>,
    Path(role_id): Path<i64>,
    Json(payload): Json<NamedEntityRequest>,
) -> ApiResult<Json<Role>> {
    Ok(Json(state.rbac().update_role(
        role_id,
        &payload.name,
        &payload.description,
    )?))
}

/// DELETE /api/admin/roles/:id
pub async fn delete_role(
    State(state): State<AuthState>,
    ctx: AuthContext,
    Path(role_id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.rbac().delete_role(role_id)?;
    info!(actor = ctx.user_id, role_id, "Admin deleted role");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/admin/roles/:id/permissions
pub async fn role_permissions(
    State(state): State<AuthState>,
    Path(role_id): Path<i64>,
) -> ApiResult<Json<Vec<Permission>>> {
    Ok(Json(state.rbac().role_permissions(role_id)?))
}

/// POST /api/admin/roles/:id/permissions/:perm_id
pub async fn grant_permission(
    State(state): State<AuthState>,
    Path((role_id, permission_id)): Path<(i64, i64)>,
) -> ApiResult<StatusCode> {
    state.rbac().grant_permission(role_id, permission_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/admin/roles/:id/permissions/:perm_id
pub async fn revoke_permission(
    State(state): State<AuthState>,
    Path((role_id, permission_id)): Path<(i64, i64)>,
) -> ApiResult<StatusCode> {
    state.rbac().revoke_permission(role_id, permission_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- permissions ----

/// GET /api/admin/permissions
pub async fn list_permissions(
    State(state): State<AuthState>,
) -> ApiResult<Json<Vec<Permission>>> {
    Ok(Json(state.rbac().list_permissions()?))
}

/// POST /api/admin/permissions
pub async fn create_permission(
    State(state): State<AuthState>,
    Json(payload): Json<NamedEntityRequest>,
) -> ApiResult<(StatusCode, Json<Permission>)> {
    let permission = state
        .rbac()
        .create_permission(&payload.name, &payload.description)?;
    Ok((StatusCode::CREATED, Json(permission)))
}

/// PUT /api/admin/permissions/:id
pub async fn update_permission(
    State(state): State<AuthState>,
    Path(permission_id): Path<i64>,
    Json(payload): Json<NamedEntityRequest>,
) -> ApiResult<Json<Permission>> {
    Ok(Json(state.rbac().update_permission(
        permission_id,
        &payload.name,
        &payload.description,
    )?))
}

/// DELETE /api/admin/permissions/:id
pub async fn delete_permission(
    State(state): State<AuthState>,
    Path(permission_id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.rbac().delete_permission(permission_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- users ----

/// GET /api/admin/users
pub async fn list_users(State(state): State<AuthState>) -> ApiResult<Json<Vec<UserResponse>>> {
    let users = state.service.list_users()?;
    Ok(Json(users.iter().map(UserResponse::from_user).collect()))
}

/// GET /api/admin/users/:id/roles
pub async fn user_roles(
    State(state): State<AuthState>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Vec<Role>>> {
    Ok(Json(state.service.user_roles(user_id)?))
}

/// GET /api/admin/users/:id/permissions
pub async fn user_permissions(
    State(state): State<AuthState>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Vec<Permission>>> {
    Ok(Json(state.service.user_permissions(user_id)?))
}

/// `users:manage` alone cannot hand out or take away the admin role
fn guard_admin_membership(state: &AuthState, ctx: &AuthContext, role_id: i64) -> ApiResult<()> {
    let is_admin_role = state
        .rbac()
        .role_by_name(ADMIN_ROLE)?
        .is_some_and(|role| role.id == role_id);
    if is_admin_role {
        state.rbac().require_role(Some(ctx), ADMIN_ROLE)?;
    }
    Ok(())
}

/// POST /api/admin/users/:id/roles/:role_id
pub async fn assign_role(
    State(state): State<AuthState>,
    ctx: AuthContext,
    Path((user_id, role_id)): Path<(i64, i64)>,
) -> ApiResult<StatusCode> {
    guard_admin_membership(&state, &ctx, role_id)?;
    state.rbac().assign_role(user_id, role_id)?;
    info!(actor = ctx.user_id, user_id, role_id, "Admin assigned role");
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/admin/users/:id/roles/:role_id
pub async fn remove_role(
    State(state): State<AuthState>,
    ctx: AuthContext,
    Path((user_id, role_id)): Path<(i64, i64)>,
) -> ApiResult<StatusCode> {
    guard_admin_membership(&state, &ctx, role_id)?;
    state.rbac().remove_role(user_id, role_id)?;
    info!(actor = ctx.user_id, user_id, role_id, "Admin removed role");
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/admin/users/:id/active
pub async fn set_active(
    State(state): State<AuthState>,
    ctx: AuthContext,
    Path(user_id): Path<i64>,
    Json(payload): Json<SetActiveRequest>,
) -> ApiResult<StatusCode> {
    if user_id == ctx.user_id && !payload.active {
        return Err(AuthError::InvalidInput("cannot deactivate your own account"));
    }
    state.service.set_active(user_id, payload.active)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- router ----

fn gated(routes: Router<AuthState>, rbac: &Rbac, requirement: Requirement) -> Router<AuthState> {
    routes.route_layer(from_fn_with_state(
        GateState::new(rbac.clone(), requirement),
        require,
    ))
}

/// All authentication and administration routes.
///
/// Layer order per group (outermost first): rate limiter, bearer
/// validation, RBAC gate.
pub fn router(state: AuthState, auth_limiter: RateLimiter, api_limiter: RateLimiter) -> Router {
    let jwt = state.jwt().clone();
    let rbac = state.rbac().clone();

    let public = Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/verify-email", post(verify_email))
        .route("/api/auth/resend-verification", post(resend_verification))
        .route_layer(from_fn_with_state(auth_limiter, rate_limit_middleware));

    let account = Router::new()
        .route("/api/auth/me", get(me))
        .route("/api/auth/change-password", post(change_password));

    let role_admin = gated(
        Router::new()
            .route("/api/admin/roles", get(list_roles).post(create_role))
            .route("/api/admin/roles/:id", put(update_role).delete(delete_role))
            .route("/api/admin/roles/:id/permissions", get(role_permissions))
            .route(
                "/api/admin/roles/:id/permissions/:perm_id",
                post(grant_permission).delete(revoke_permission),
            )
            .route(
                "/api/admin/permissions",
                get(list_permissions).post(create_permission),
            )
            .route(
                "/api/admin/permissions/:id",
                put(update_permission).delete(delete_permission),
            ),
        &rbac,
        Requirement::permission(ROLES_MANAGE),
    );

    let user_admin = gated(
        Router::new()
            .route(
                "/api/admin/users/:id/roles/:role_id",
                post(assign_role).delete(remove_role),
            )
            .route("/api/admin/users/:id/active", put(set_active)),
        &rbac,
        Requirement::AnyOf(vec![
            Requirement::role(ADMIN_ROLE),
            Requirement::permission(USERS_MANAGE),
        ]),
    );

    let user_read = gated(
        Router::new()
            .route("/api/admin/users", get(list_users))
            .route("/api/admin/users/:id/roles", get(user_roles))
            .route("/api/admin/users/:id/permissions", get(user_permissions)),
        &rbac,
        Requirement::any_role([ADMIN_ROLE, "support"]),
    );

    let protected = account
        .merge(role_admin)
        .merge(user_admin)
        .merge(user_read)
        .route_layer(from_fn_with_state(jwt, auth_middleware))
        .route_layer(from_fn_with_state(api_limiter, rate_limit_middleware));

    public.merge(protected).with_state(state)
}
