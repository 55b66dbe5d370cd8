//! Bearer-token guard for protected routes.
//!
//! Missing, malformed and expired credentials all collapse into one 401
//! message so the response does not reveal which check failed.

use axum::http::{header, HeaderMap, StatusCode};
use uuid::Uuid;

use super::state::AuthConfig;
use super::tokens::{self, TokenError, TokenKind};

/// The authenticated caller, as proven by an access token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: String,
}

const UNAUTHORIZED: &str = "Unauthorized";
const FORBIDDEN: &str = "Forbidden";

/// Pull the token out of an `Authorization: Bearer <token>` header.
#[must_use]
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Require a valid access token, returning the caller's identity.
pub fn require_auth(
    config: &AuthConfig,
    headers: &HeaderMap,
) -> Result<Principal, (StatusCode, String)> {
    let token = extract_bearer_token(headers)
        .ok_or((StatusCode::UNAUTHORIZED, UNAUTHORIZED.to_string()))?;

    let claims = tokens::verify_token(config, TokenKind::Access, token)
        .map_err(|_: TokenError| (StatusCode::UNAUTHORIZED, UNAUTHORIZED.to_string()))?;

    Ok(Principal {
        user_id: claims.sub,
        role: claims.role,
    })
}

/// Require the caller's role to be in the allow list.
///
/// An empty allow list denies everyone.
pub fn require_role(principal: &Principal, allowed: &[&str]) -> Result<(), (StatusCode, String)> {
    if allowed.contains(&principal.role.as_str()) {
        Ok(())
    } else {
        Err((StatusCode::FORBIDDEN, FORBIDDEN.to_string()))
    }
}

/// Shorthand for auth + role check in one step.
pub fn require_role_auth(
    config: &AuthConfig,
    headers: &HeaderMap,
    allowed: &[&str],
) -> Result<Principal, (StatusCode, String)> {
    let principal = require_auth(config, headers)?;

    require_role(&principal, allowed)?;

    Ok(principal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::state::test_support::auth_config;
    use crate::api::handlers::auth::tokens::issue_token;
    use axum::http::HeaderValue;

    fn headers_with_bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn test_extract_bearer_token() {
        let headers = headers_with_bearer("abc123");

        assert_eq!(extract_bearer_token(&headers), Some("abc123"));
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);

        let mut basic = HeaderMap::new();
        basic.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert_eq!(extract_bearer_token(&basic), None);

        let mut empty = HeaderMap::new();
        empty.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&empty), None);
    }

    #[test]
    fn test_require_auth_accepts_valid_token() {
        let config = auth_config();
        let user_id = Uuid::new_v4();
        let token = issue_token(&config, TokenKind::Access, user_id, "user").unwrap();

        let principal = require_auth(&config, &headers_with_bearer(&token)).unwrap();

        assert_eq!(principal.user_id, user_id);
        assert_eq!(principal.role, "user");
    }

    #[test]
    fn test_require_auth_rejects_missing_and_garbage() {
        let config = auth_config();

        let missing = require_auth(&config, &HeaderMap::new()).unwrap_err();
        let garbage = require_auth(&config, &headers_with_bearer("garbage")).unwrap_err();

        assert_eq!(missing.0, StatusCode::UNAUTHORIZED);
        assert_eq!(garbage.0, StatusCode::UNAUTHORIZED);
        // Same message either way
        assert_eq!(missing.1, garbage.1);
    }

    #[test]
    fn test_require_auth_rejects_refresh_token() {
        let config = auth_config();
        let token = issue_token(&config, TokenKind::Refresh, Uuid::new_v4(), "user").unwrap();

        let err = require_auth(&config, &headers_with_bearer(&token)).unwrap_err();

        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_require_auth_collapses_expired_with_invalid() {
        let config = auth_config().with_access_ttl_seconds(-120);
        let token = issue_token(&config, TokenKind::Access, Uuid::new_v4(), "user").unwrap();

        let expired = require_auth(&config, &headers_with_bearer(&token)).unwrap_err();
        let garbage = require_auth(&config, &headers_with_bearer("garbage")).unwrap_err();

        assert_eq!(expired.0, StatusCode::UNAUTHORIZED);
        // An expired token gets the same message as a bad one
        assert_eq!(expired.1, garbage.1);
    }

    #[test]
    fn test_require_role() {
        let principal = Principal {
            user_id: Uuid::new_v4(),
            role: "user".to_string(),
        };

        assert!(require_role(&principal, &["user", "admin"]).is_ok());
        assert_eq!(
            require_role(&principal, &["admin"]).unwrap_err().0,
            StatusCode::FORBIDDEN
        );
        // Empty allow list denies everyone
        assert!(require_role(&principal, &[]).is_err());
    }
}
