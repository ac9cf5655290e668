//! Bearer API key authentication for the job service.
//!
//! - One shared key, supplied through configuration
//! - Compared in constant time
//! - When no key is configured, every request is let through

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

/// Shared API key check. Cheap to clone.
#[derive(Clone, Default)]
pub struct ApiKeyAuth {
    key: Option<Arc<SecretString>>,
}

impl ApiKeyAuth {
    /// Require `key` on every authenticated route.
    pub fn new(key: SecretString) -> Self {
        Self {
            key: Some(Arc::new(key)),
        }
    }

    /// Accept every request.
    pub fn disabled() -> Self {
        Self { key: None }
    }

    /// Build from an optional key; blank keys disable auth.
    pub fn from_optional(key: Option<SecretString>) -> Self {
        match key {
            Some(k) if !k.expose_secret().trim().is_empty() => Self::new(k),
            _ => Self::disabled(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Validate a presented token (constant-time comparison).
    pub fn validate(&self, token: &str) -> bool {
        match self.key {
            Some(ref expected) => expected
                .expose_secret()
                .as_bytes()
                .ct_eq(token.as_bytes())
                .into(),
            None => true,
        }
    }
}

/// Axum middleware that validates `Authorization: Bearer <key>`.
///
/// Wire up with `axum::middleware::from_fn_with_state(auth, api_key_middleware)`.
pub async fn api_key_middleware(
    State(auth): State<ApiKeyAuth>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !auth.is_enabled() {
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !auth.validate(token) {
        tracing::debug!(path = %request.uri().path(), "Rejected request with invalid API key");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let auth = ApiKeyAuth::new(SecretString::from("s3cret".to_string()));
        assert!(auth.is_enabled());
        assert!(auth.validate("s3cret"));
        assert!(!auth.validate("s3cret "));
        assert!(!auth.validate("wrong"));
        assert!(!auth.validate(""));
    }

    #[test]
    fn test_disabled_accepts_everything() {
        let auth = ApiKeyAuth::disabled();
        assert!(!auth.is_enabled());
        assert!(auth.validate("anything"));
    }

    #[test]
    fn test_blank_key_disables_auth() {
        assert!(!ApiKeyAuth::from_optional(None).is_enabled());
        assert!(!ApiKeyAuth::from_optional(Some(SecretString::from("  ".to_string()))).is_enabled());
        assert!(ApiKeyAuth::from_optional(Some(SecretString::from("k".to_string()))).is_enabled());
    }
}
