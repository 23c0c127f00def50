use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use super::AppState;
use crate::config::ServerConfig;

/// Trusted-host middleware.
///
/// Rejects requests whose `Host` header is not one of `server.allowed_hosts`,
/// unless the list contains `*`.
pub async fn trusted_host(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let server = &state.settings.server;
    if server.allows_any_host() {
        return next.run(req).await;
    }

    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(strip_port);

    match host {
        Some(host) if is_allowed_host(server, host) => next.run(req).await,
        other => {
            tracing::warn!(host = ?other, "Rejected request for untrusted host");
            let body = json!({
                "error": {
                    "code": "INVALID_HOST",
                    "message": "Invalid host header"
                }
            });
            (StatusCode::BAD_REQUEST, Json(body)).into_response()
        }
    }
}

/// Build the CORS layer from the allowed host list
pub fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if server.allows_any_host() {
        return layer.allow_origin(Any);
    }

    let allowed = server.allowed_hosts.clone();
    layer.allow_origin(AllowOrigin::predicate(move |origin, _| {
        origin
            .to_str()
            .ok()
            .and_then(|o| o.split_once("://").map(|(_, rest)| strip_port(rest)))
            .map(|host| allowed.iter().any(|a| host_matches(a, host)))
            .unwrap_or(false)
    }))
}

fn is_allowed_host(server: &ServerConfig, host: &str) -> bool {
    server.allowed_hosts.iter().any(|a| host_matches(a, host))
}

/// `*.example.com` matches any subdomain of example.com
fn host_matches(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(domain) => {
            let Some(split) = host.len().checked_sub(domain.len()) else {
                return false;
            };
            match (host.get(..split), host.get(split..)) {
                (Some(sub), Some(suffix)) => {
                    suffix.eq_ignore_ascii_case(domain) && sub.ends_with('.') && sub.len() > 1
                }
                _ => false,
            }
        }
        None => pattern.eq_ignore_ascii_case(host),
    }
}

fn strip_port(host: &str) -> &str {
    // IPv6 literals keep their brackets
    if let Some(end) = host.find(']') {
        return &host[..=end];
    }
    host.split(':').next().unwrap_or(host)
}
