//! Dashboard sessions resolved from request headers.
//!
//! A session is a valid access token carried either as
//! `Authorization: Bearer <jwt>` or in the `access_token` cookie (browsers
//! cannot set headers on a WebSocket upgrade).

use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use vmwatch_core::error::CoreError;
use vmwatch_core::types::DbId;

use crate::auth::jwt::{validate_token, JwtConfig};
use crate::error::AppError;
use crate::state::AppState;

/// Cookie holding the access token.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// An authenticated dashboard user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// The user's internal database id (from `claims.sub`).
    pub user_id: DbId,
    pub role: String,
}

/// Resolve the caller's session, or `None` if no valid token is present.
pub fn session_from_headers(headers: &HeaderMap, config: &JwtConfig) -> Option<Session> {
    let token = bearer_token(headers).or_else(|| cookie_value(headers, ACCESS_TOKEN_COOKIE))?;
    let claims = validate_token(token, config).ok()?;
    Some(Session {
        user_id: claims.sub,
        role: claims.role,
    })
}

/// The token of an `Authorization: Bearer <token>` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
        .filter(|v| !v.is_empty())
}

impl FromRequestParts<AppState> for Session {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        session_from_headers(&parts.headers, &state.config.jwt).ok_or_else(|| {
            AppError::Core(CoreError::Unauthorized(
                "Missing, invalid or expired session".into(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;
    use crate::auth::jwt::generate_access_token;

    fn config() -> JwtConfig {
        JwtConfig {
            secret: "session-test-secret".to_string(),
            access_token_expiry_mins: 5,
        }
    }

    #[test]
    fn reads_bearer_header() {
        let token = generate_access_token(5, "admin", &config()).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );

        let session = session_from_headers(&headers, &config()).expect("session");
        assert_eq!(session.user_id, 5);
        assert_eq!(session.role, "admin");
    }

    #[test]
    fn reads_access_token_cookie() {
        let token = generate_access_token(9, "viewer", &config()).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("theme=dark; access_token={token}")).unwrap(),
        );

        assert_eq!(
            session_from_headers(&headers, &config()).map(|s| s.user_id),
            Some(9)
        );
    }

    #[test]
    fn garbage_or_missing_token_yields_none() {
        assert!(session_from_headers(&HeaderMap::new(), &config()).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        assert!(session_from_headers(&headers, &config()).is_none());
    }

    #[test]
    fn bearer_requires_scheme_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));
    }
}
