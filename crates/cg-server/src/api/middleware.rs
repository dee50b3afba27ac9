//! Bearer-token guard for the internal routes.
//!
//! Handlers take [`InternalCaller`] as an extractor argument; the request is
//! rejected with 401 before the handler runs when the token is missing or
//! wrong.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use hmac::digest::CtOutput;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::internal::InternalState;
use cg_common::AppError;

pub struct InternalCaller;

impl FromRequestParts<Arc<InternalState>> for InternalCaller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<InternalState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("Invalid authorization format".into()))?;

        if !tokens_match(token, &state.token) {
            tracing::debug!("Internal token mismatch");
            return Err(AppError::Unauthorized("Invalid token".into()));
        }

        Ok(InternalCaller)
    }
}

/// Compare through a keyed digest so the check runs in constant time.
fn tokens_match(given: &str, expected: &str) -> bool {
    fn digest(token: &str) -> Option<CtOutput<Hmac<Sha256>>> {
        let mut mac = Hmac::<Sha256>::new_from_slice(b"internal-token").ok()?;
        mac.update(token.as_bytes());
        Some(mac.finalize())
    }

    match (digest(given), digest(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_tokens() {
        assert!(tokens_match("secret", "secret"));
        assert!(!tokens_match("secret", "Secret"));
        assert!(!tokens_match("", "secret"));
    }
}
