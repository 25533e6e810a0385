//! Authentication Module
//! Mission: Secure API access with JWT tokens, RBAC, and rate limiting

pub mod api;
pub mod context;
pub mod db;
pub mod error;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod rbac;
pub mod role_store;
pub mod service;
pub mod user_store;

pub use api::AuthState;
pub use context::AuthContext;
pub use db::AuthDb;
pub use error::{AuthError, AuthResult};
pub use jwt::JwtHandler;
pub use middleware::auth_middleware;
pub use password::PasswordHasher;
pub use rbac::{Rbac, Requirement};
pub use role_store::RoleStore;
pub use service::AuthService;
pub use user_store::UserStore;
