//! Email verification endpoints.

use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::guard::require_auth;
use super::state::AuthConfig;
use super::storage::{
    consume_single_use_token, invalidate_tokens, issue_single_use_token, lookup_role,
    lookup_verification_state, mark_verified, TokenPurpose,
};
use super::tokens::{issue_token_pair, TokenPair};
use super::types::TokenQuery;

/// Consume the emailed verification link and log the user in.
///
/// The token is deleted and the account flagged verified in one transaction,
/// so a link can only ever be followed once.
#[utoipa::path(
    get,
    path = "/api/auth/verify-email",
    params(
        ("token" = String, Query, description = "Raw verification token from the emailed link")
    ),
    responses(
        (status = 200, description = "Email verified, token pair issued", body = TokenPair),
        (status = 400, description = "Invalid or expired token", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    query: Option<Query<TokenQuery>>,
) -> impl IntoResponse {
    let token = match query {
        Some(Query(query)) => query.token,
        None => return (StatusCode::BAD_REQUEST, "Missing token".to_string()).into_response(),
    };

    let token = token.trim();
    if token.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing token".to_string()).into_response();
    }

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start verify-email transaction: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Verification failed".to_string(),
            )
                .into_response();
        }
    };

    let user_id =
        match consume_single_use_token(&mut tx, token, TokenPurpose::EmailVerification).await {
            Ok(Some(user_id)) => user_id,
            Ok(None) => {
                let _ = tx.rollback().await;
                return (StatusCode::BAD_REQUEST, "Invalid token".to_string()).into_response();
            }
            Err(err) => {
                error!("Failed to consume verification token: {err}");
                let _ = tx.rollback().await;
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Verification failed".to_string(),
                )
                    .into_response();
            }
        };

    if let Err(err) = mark_verified(&mut tx, user_id).await {
        error!("Failed to mark user verified: {err}");
        let _ = tx.rollback().await;
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Verification failed".to_string(),
        )
            .into_response();
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit verify-email transaction: {err}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Verification failed".to_string(),
        )
            .into_response();
    }

    // Verified users are logged in right away so the link lands them in the app.
    match issue_token_pair_for(&pool, &config, user_id).await {
        Ok(pair) => (StatusCode::OK, Json(pair)).into_response(),
        Err(err) => {
            error!("Failed to issue tokens after verification: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Verification failed".to_string(),
            )
                .into_response()
        }
    }
}

async fn issue_token_pair_for(
    pool: &PgPool,
    config: &AuthConfig,
    user_id: uuid::Uuid,
) -> anyhow::Result<TokenPair> {
    let role = lookup_role(pool, user_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("user disappeared after verification"))?;

    issue_token_pair(config, user_id, &role)
        .map_err(|_| anyhow::anyhow!("failed to sign token pair"))
}

/// Resend the verification email for the authenticated account.
///
/// Previous verification links are dropped first, leaving exactly one live
/// link per account.
#[utoipa::path(
    post,
    path = "/api/auth/resend-email-verification",
    security(("bearer" = [])),
    responses(
        (status = 204, description = "Verification email queued"),
        (status = 400, description = "Account is already verified", body = String),
        (status = 401, description = "Missing or invalid access token", body = String)
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
) -> impl IntoResponse {
    let principal = match require_auth(&config, &headers) {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let (email, is_verified) = match lookup_verification_state(&pool, principal.user_id).await {
        Ok(Some(state)) => state,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, "User not found".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to lookup verification state: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Resend failed".to_string(),
            )
                .into_response();
        }
    };

    if is_verified {
        return (StatusCode::BAD_REQUEST, "Already verified".to_string()).into_response();
    }

    match resend(&pool, &config, principal.user_id, &email).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("Failed to resend verification: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Resend failed".to_string(),
            )
                .into_response()
        }
    }
}

async fn resend(
    pool: &PgPool,
    config: &AuthConfig,
    user_id: uuid::Uuid,
    email: &str,
) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    invalidate_tokens(&mut tx, user_id, TokenPurpose::EmailVerification).await?;
    let _token =
        issue_single_use_token(&mut tx, user_id, email, TokenPurpose::EmailVerification, config)
            .await?;
    tx.commit().await?;

    Ok(())
}
