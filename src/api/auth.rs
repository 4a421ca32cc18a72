//! API key authentication for write endpoints (spec.md §4.9 "Auth").
//! Comparison is constant-time to avoid leaking the key through timing.

use super::dto::ApiError;
use super::state::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

const API_KEY_HEADER: &str = "x-api-key";

pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.api_key.as_ref() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if keys_match(expected, provided) {
        Ok(next.run(request).await)
    } else {
        Err(ApiError::Unauthorized)
    }
}

fn keys_match(expected: &str, provided: &str) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_keys_match() {
        assert!(keys_match("super-secret", "super-secret"));
    }

    #[test]
    fn different_keys_do_not_match() {
        assert!(!keys_match("super-secret", "wrong-key-wrong"));
    }

    #[test]
    fn different_lengths_do_not_match() {
        assert!(!keys_match("short", "a-much-longer-key"));
    }
}
