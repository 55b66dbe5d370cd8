//! Password lifecycle: authenticated update, forgotten-password request and
//! token-based reset.
//!
//! Every successful change stamps `last_security_update`, which revokes all
//! refresh tokens issued before the change.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::credentials::{hash_password_blocking, verify_password_blocking};
use super::guard::require_auth;
use super::state::AuthConfig;
use super::storage::{
    consume_single_use_token, enqueue_email, invalidate_tokens, issue_single_use_token,
    lookup_credentials, lookup_email, lookup_role, update_password_hash, TokenPurpose,
};
use super::tokens::{issue_token_pair, TokenPair};
use super::types::{ForgetPassword, Message, ResetPassword, UpdatePassword};
use super::utils::{normalize_email, valid_email, valid_password};

// Forget-password always answers the same way, registered address or not.
const FORGET_ACK: &str = "If the email exists, a reset link has been sent";

/// Change the password of the authenticated user.
#[utoipa::path(
    patch,
    path = "/api/auth/update-password",
    request_body = UpdatePassword,
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Password updated", body = Message),
        (status = 400, description = "Wrong old password or invalid new password", body = String),
        (status = 401, description = "Missing or invalid access token", body = String),
        (status = 404, description = "No matching account", body = String)
    ),
    tag = "auth"
)]
pub async fn update_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    payload: Option<Json<UpdatePassword>>,
) -> impl IntoResponse {
    let principal = match require_auth(&config, &headers) {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let request: UpdatePassword = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if !valid_password(&request.new_password) {
        return (
            StatusCode::BAD_REQUEST,
            "Password must be between 6 and 150 characters".to_string(),
        )
            .into_response();
    }

    let email = normalize_email(&request.email);

    // The email must belong to the caller; anything else is reported as
    // not-found rather than forbidden.
    let record = match lookup_credentials(&pool, &email).await {
        Ok(Some(record)) if record.user_id == principal.user_id => record,
        Ok(_) => {
            return (StatusCode::NOT_FOUND, "User not found".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to lookup credentials: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Password update failed".to_string(),
            )
                .into_response();
        }
    };

    match verify_password_blocking(request.old_password, record.password_hash).await {
        Ok(true) => {}
        Ok(false) => {
            return (StatusCode::BAD_REQUEST, "Wrong old password".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to verify old password: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Password update failed".to_string(),
            )
                .into_response();
        }
    }

    let new_hash = match hash_password_blocking(request.new_password).await {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash new password: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Password update failed".to_string(),
            )
                .into_response();
        }
    };

    match apply_password_change(&pool, record.user_id, &new_hash).await {
        Ok(()) => (
            StatusCode::OK,
            Json(Message::new("Password updated")),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to update password: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Password update failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Persist a new hash inside a transaction. Shared with the user-profile
/// PATCH, which also accepts a password.
pub(crate) async fn apply_password_change(
    pool: &PgPool,
    user_id: uuid::Uuid,
    new_hash: &str,
) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    update_password_hash(&mut tx, user_id, new_hash).await?;
    tx.commit().await?;
    Ok(())
}

/// Request a password-reset link by email.
#[utoipa::path(
    post,
    path = "/api/auth/forget-password",
    request_body = ForgetPassword,
    responses(
        (status = 200, description = "Acknowledged", body = Message)
    ),
    tag = "auth"
)]
pub async fn forget_password(
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    payload: Option<Json<ForgetPassword>>,
) -> impl IntoResponse {
    let request: ForgetPassword = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::OK, Json(Message::new(FORGET_ACK))).into_response();
    }

    if let Err(err) = queue_reset(&pool, &config, &email).await {
        error!("Failed to queue password reset: {err}");
    }

    (StatusCode::OK, Json(Message::new(FORGET_ACK))).into_response()
}

async fn queue_reset(pool: &PgPool, config: &AuthConfig, email: &str) -> anyhow::Result<()> {
    let Some(record) = lookup_credentials(pool, email).await? else {
        return Ok(());
    };

    let mut tx = pool.begin().await?;
    // A new request supersedes any earlier link.
    invalidate_tokens(&mut tx, record.user_id, TokenPurpose::PasswordReset).await?;
    let _token =
        issue_single_use_token(&mut tx, record.user_id, email, TokenPurpose::PasswordReset, config)
            .await?;
    tx.commit().await?;

    Ok(())
}

/// Set a new password using a reset token, then log the user in.
#[utoipa::path(
    post,
    path = "/api/auth/reset-password",
    request_body = ResetPassword,
    responses(
        (status = 200, description = "Password reset, token pair issued", body = TokenPair),
        (status = 400, description = "Invalid token or password mismatch", body = String)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    payload: Option<Json<ResetPassword>>,
) -> impl IntoResponse {
    let request: ResetPassword = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if request.new_password != request.new_password_confirm {
        return (StatusCode::BAD_REQUEST, "Passwords do not match".to_string()).into_response();
    }

    if !valid_password(&request.new_password) {
        return (
            StatusCode::BAD_REQUEST,
            "Password must be between 6 and 150 characters".to_string(),
        )
            .into_response();
    }

    let token = request.token.trim();
    if token.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing token".to_string()).into_response();
    }

    let new_hash = match hash_password_blocking(request.new_password).await {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash new password: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Password reset failed".to_string(),
            )
                .into_response();
        }
    };

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start reset-password transaction: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Password reset failed".to_string(),
            )
                .into_response();
        }
    };

    let user_id = match consume_single_use_token(&mut tx, token, TokenPurpose::PasswordReset).await
    {
        Ok(Some(user_id)) => user_id,
        Ok(None) => {
            let _ = tx.rollback().await;
            return (StatusCode::BAD_REQUEST, "Invalid token".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to consume reset token: {err}");
            let _ = tx.rollback().await;
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Password reset failed".to_string(),
            )
                .into_response();
        }
    };

    if let Err(err) = update_password_hash(&mut tx, user_id, &new_hash).await {
        error!("Failed to update password: {err}");
        let _ = tx.rollback().await;
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Password reset failed".to_string(),
        )
            .into_response();
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit reset-password transaction: {err}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Password reset failed".to_string(),
        )
            .into_response();
    }

    if let Err(err) = queue_reset_notice(&pool, user_id).await {
        error!("Failed to queue reset notice: {err}");
    }

    match lookup_role(&pool, user_id).await {
        Ok(Some(role)) => match issue_token_pair(&config, user_id, &role) {
            Ok(pair) => (StatusCode::OK, Json(pair)).into_response(),
            Err(_) => {
                error!("Failed to issue token pair after reset");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Password reset failed".to_string(),
                )
                    .into_response()
            }
        },
        Ok(None) => (StatusCode::BAD_REQUEST, "Invalid token".to_string()).into_response(),
        Err(err) => {
            error!("Failed to lookup role after reset: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Password reset failed".to_string(),
            )
                .into_response()
        }
    }
}

async fn queue_reset_notice(pool: &PgPool, user_id: uuid::Uuid) -> anyhow::Result<()> {
    let Some(email) = lookup_email(pool, user_id).await? else {
        return Ok(());
    };

    let mut tx = pool.begin().await?;
    enqueue_email(
        &mut tx,
        &email,
        "password_changed",
        &json!({ "email": email }),
    )
    .await?;
    tx.commit().await?;

    Ok(())
}
