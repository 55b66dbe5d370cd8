//! Password login.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::credentials::verify_password_blocking;
use super::state::AuthConfig;
use super::storage::{enqueue_email, lookup_credentials};
use super::tokens::{issue_token_pair, TokenPair};
use super::types::Login;
use super::utils::normalize_email;

// One message for unknown email and wrong password, so responses do not
// reveal whether an account exists.
const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Exchange email + password for an access/refresh token pair.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = Login,
    responses(
        (status = 200, description = "Token pair issued", body = TokenPair),
        (status = 400, description = "Invalid email or password", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    payload: Option<Json<Login>>,
) -> impl IntoResponse {
    let request: Login = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);

    let record = match lookup_credentials(&pool, &email).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return (StatusCode::BAD_REQUEST, INVALID_CREDENTIALS.to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to lookup credentials: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    };

    match verify_password_blocking(request.password, record.password_hash).await {
        Ok(true) => {}
        Ok(false) => {
            return (StatusCode::BAD_REQUEST, INVALID_CREDENTIALS.to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to verify password: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    }

    let pair = match issue_token_pair(&config, record.user_id, &record.role) {
        Ok(pair) => pair,
        Err(_) => {
            error!("Failed to issue token pair");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    };

    // Sign-in notification goes through the outbox; a failure here must not
    // block the login itself.
    if let Err(err) = queue_login_notification(&pool, &email).await {
        error!("Failed to queue login notification: {err}");
    }

    (StatusCode::OK, Json(pair)).into_response()
}

async fn queue_login_notification(pool: &PgPool, email: &str) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    enqueue_email(&mut tx, email, "login_notification", &json!({ "email": email })).await?;
    tx.commit().await?;
    Ok(())
}
