//! Authentication middleware: every route requires a bearer token equal to
//! the configured `TRADING_API_KEY`.
//!
//! Adapted from the teacher's JWT-claims `auth_middleware` down to a single
//! shared-secret comparison (constant-time, to avoid timing side-channels
//! on the token compare); the `AuthError: IntoResponse` shape is unchanged.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// Constant-time equality: always walks the full length of `expected` so
/// token comparison time doesn't leak how many leading bytes matched.
fn tokens_match(given: &str, expected: &str) -> bool {
    let (given, expected) = (given.as_bytes(), expected.as_bytes());
    if given.len() != expected.len() {
        return false;
    }
    given
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

pub async fn auth_middleware(
    State(expected_key): State<Arc<String>>,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or(AuthError::MissingToken)?;

    if !tokens_match(token, &expected_key) {
        return Err(AuthError::InvalidToken);
    }

    Ok(next.run(req).await)
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing authorization token"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token"),
        };
        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_error_responses_are_unauthorized() {
        assert_eq!(
            AuthError::MissingToken.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::InvalidToken.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn matching_tokens_compare_equal() {
        assert!(tokens_match("secret-key", "secret-key"));
        assert!(!tokens_match("wrong-key", "secret-key"));
        assert!(!tokens_match("secret-ke", "secret-key"));
    }
}
