use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Constant-time token comparison via HMAC tags, so admin token checks
/// cannot be timed.
fn tokens_match(expected: &str, presented: &str) -> bool {
    let mut expected_mac =
        HmacSha256::new_from_slice(b"binfresh-admin").expect("HMAC can take key of any size");
    expected_mac.update(expected.as_bytes());

    let mut presented_mac =
        HmacSha256::new_from_slice(b"binfresh-admin").expect("HMAC can take key of any size");
    presented_mac.update(presented.as_bytes());

    let tag = presented_mac.finalize().into_bytes();
    expected_mac.verify_slice(&tag).is_ok()
}

/// Validate `Authorization: Bearer <token>` against the configured admin
/// token. Token issuance lives outside this service.
pub fn is_admin(auth_header: Option<&str>, admin_token: &str) -> bool {
    if admin_token.is_empty() {
        return false;
    }
    auth_header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|presented| tokens_match(admin_token, presented))
        .unwrap_or(false)
}

/// Axum middleware guarding the admin route group.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if !is_admin(auth_header, &state.admin_token) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_bearer_token() {
        assert!(is_admin(Some("Bearer s3cret"), "s3cret"));
    }

    #[test]
    fn test_wrong_token_rejected() {
        assert!(!is_admin(Some("Bearer nope"), "s3cret"));
    }

    #[test]
    fn test_missing_header_rejected() {
        assert!(!is_admin(None, "s3cret"));
    }

    #[test]
    fn test_missing_bearer_prefix_rejected() {
        assert!(!is_admin(Some("s3cret"), "s3cret"));
    }

    #[test]
    fn test_empty_configured_token_rejects_everything() {
        assert!(!is_admin(Some("Bearer "), ""));
        assert!(!is_admin(Some("Bearer x"), ""));
    }
}
