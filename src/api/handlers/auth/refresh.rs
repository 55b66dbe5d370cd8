//! Refresh-token exchange.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::state::AuthConfig;
use super::storage::lookup_refresh_record;
use super::tokens::{issue_token_pair, verify_token, TokenError, TokenKind, TokenPair};
use super::types::Refresh;

const INVALID_REFRESH: &str = "Invalid refresh token";

/// Exchange a refresh token for a fresh access/refresh pair.
///
/// A token issued before the account's `last_security_update` is rejected,
/// which is how password changes revoke outstanding sessions.
#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    request_body = Refresh,
    responses(
        (status = 200, description = "New token pair issued", body = TokenPair),
        (status = 401, description = "Invalid, expired or revoked refresh token", body = String)
    ),
    tag = "auth"
)]
pub async fn refresh(
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    payload: Option<Json<Refresh>>,
) -> impl IntoResponse {
    let request: Refresh = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let claims = match verify_token(&config, TokenKind::Refresh, &request.refresh_token) {
        Ok(claims) => claims,
        Err(TokenError::Expired) => {
            return (StatusCode::UNAUTHORIZED, "Refresh token expired".to_string())
                .into_response();
        }
        Err(TokenError::Invalid) => {
            return (StatusCode::UNAUTHORIZED, INVALID_REFRESH.to_string()).into_response();
        }
    };

    let record = match lookup_refresh_record(&pool, claims.sub).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            // Account deleted since the token was issued.
            return (StatusCode::UNAUTHORIZED, INVALID_REFRESH.to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to lookup refresh record: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Refresh failed".to_string(),
            )
                .into_response();
        }
    };

    if issued_before(claims.iat, record.last_security_update) {
        return (StatusCode::UNAUTHORIZED, "Refresh token revoked".to_string()).into_response();
    }

    match issue_token_pair(&config, claims.sub, &record.role) {
        Ok(pair) => (StatusCode::OK, Json(pair)).into_response(),
        Err(_) => {
            error!("Failed to issue token pair on refresh");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Refresh failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Strictly before: a token minted in the same second as the security stamp
/// stays valid.
fn issued_before(iat: i64, last_security_update: DateTime<Utc>) -> bool {
    iat < last_security_update.timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_issued_before_is_strict() {
        let stamp = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();

        assert!(issued_before(stamp.timestamp() - 1, stamp));
        assert!(!issued_before(stamp.timestamp(), stamp));
        assert!(!issued_before(stamp.timestamp() + 1, stamp));
    }
}
