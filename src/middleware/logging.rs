//! Request logging middleware.
//!
//! Logs every HTTP request with method, path, status code, latency and,
//! for authenticated routes, the user id that was served.

use crate::auth::context::ServedUser;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::Request,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{field, info, info_span, warn, Instrument};

/// Middleware that logs HTTP requests with timing information.
///
/// INFO for 2xx-4xx, WARN for 5xx. `/health` is skipped to reduce noise.
/// Client address is recorded when the server was started with connect info.
pub async fn request_logging(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if path == "/health" {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let client_ip = connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let span = info_span!(
        "http_request",
        method = %method,
        path = %path,
        client_ip = %client_ip,
        user_id = field::Empty,
    );

    let start = Instant::now();
    let response = next.run(request).instrument(span.clone()).await;
    let latency_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    let user_id = response.extensions().get::<ServedUser>().map(|u| u.0);
    if let Some(id) = user_id {
        span.record("user_id", id);
    }

    span.in_scope(|| {
        if status >= 500 {
            warn!(status, latency_ms, ?user_id, "Request failed (5xx)");
        } else {
            info!(status, latency_ms, ?user_id, "Request completed");
        }
    });

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::StatusCode, middleware::from_fn, response::IntoResponse, routing::get, Router,
    };
    use tower::ServiceExt;

    async fn served() -> Response {
        let mut response = "ok".into_response();
        response.extensions_mut().insert(ServedUser(5));
        response
    }

    #[tokio::test]
    async fn test_logging_passes_response_through() {
        let app = Router::new()
            .route("/served", get(served))
            .route("/health", get(|| async { StatusCode::NO_CONTENT }))
            .layer(from_fn(request_logging));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/served").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.extensions().get::<ServedUser>(), Some(&ServedUser(5)));

        let health = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::NO_CONTENT);
    }
}
