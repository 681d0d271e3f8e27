//! # Authentication
//!
//! Bearer-token check for the control surface. Enabled by setting
//! `QUARRY_API_KEY`; `/health` stays open so supervisors can probe the
//! daemon without the key.
//!
//! ```text
//! Authorization: Bearer <key>
//! ```

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

/// The configured key, if any. An empty value disables authentication.
pub fn get_api_key_from_env() -> Option<String> {
    std::env::var("QUARRY_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}

/// Compare two keys without leaking where they differ. Both sides are
/// padded to the same length so the comparison always covers the same
/// number of bytes.
fn keys_match(provided: &[u8], expected: &[u8]) -> bool {
    let len = provided.len().max(expected.len());
    let mut a = vec![0u8; len];
    let mut b = vec![0u8; len];
    a[..provided.len()].copy_from_slice(provided);
    b[..expected.len()].copy_from_slice(expected);
    let same: bool = a.ct_eq(&b).into();
    same && provided.len() == expected.len()
}

fn reject(reason: &'static str) -> (StatusCode, &'static str) {
    tracing::warn!(event = "auth_failure", reason, "Rejected request");
    (StatusCode::UNAUTHORIZED, "Unauthorized")
}

/// Require the configured key on every request except `/health`. Both
/// `Bearer <key>` and a bare `<key>` are accepted.
pub async fn api_key_auth_middleware(
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    let Some(expected) = get_api_key_from_env() else {
        return Ok(next.run(request).await);
    };
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v));

    match provided {
        None => Err(reject("missing_authorization_header")),
        Some(key) if keys_match(key.as_bytes(), expected.as_bytes()) => {
            Ok(next.run(request).await)
        }
        Some(_) => Err(reject("invalid_api_key")),
    }
}
