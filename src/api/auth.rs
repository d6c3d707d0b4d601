use axum::{extract::Request, middleware::Next, response::Response};
use subtle::ConstantTimeEq;

use super::error::ApiError;

/// Extract a Bearer token from the Authorization header.
fn extract_bearer(req: &Request) -> Option<String> {
    if let Some(auth_header) = req.headers().get("authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    None
}

/// Extract a `?token=` value from the query string.
fn extract_query_token(req: &Request) -> Option<String> {
    req.uri().query().and_then(|query| {
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("token=").map(|v| v.to_string()))
    })
}

/// Check if this request is a WebSocket upgrade.
fn is_ws_upgrade(req: &Request) -> bool {
    req.headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

fn token_matches(candidate: &str, expected: &str) -> bool {
    candidate.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Auth middleware function.
///
/// Authentication flow:
/// 1. Try Bearer token from Authorization header
/// 2. If absent AND the request is a WebSocket upgrade, try the `?token=`
///    query parameter (browsers cannot set headers on a WebSocket handshake)
/// 3. Otherwise reject
pub async fn require_auth(
    expected_token: String,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(ref token) = extract_bearer(&req) {
        if token_matches(token, &expected_token) {
            return Ok(next.run(req).await);
        }
        return Err(ApiError::AuthInvalid);
    }

    if is_ws_upgrade(&req) {
        if let Some(ref token) = extract_query_token(&req) {
            if token_matches(token, &expected_token) {
                return Ok(next.run(req).await);
            }
            return Err(ApiError::AuthInvalid);
        }
    }

    Err(ApiError::AuthRequired)
}
