//! Account registration.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::credentials::hash_password_blocking;
use super::state::AuthConfig;
use super::storage::{register_user, SignupOutcome};
use super::types::{Message, Register};
use super::utils::{normalize_email, valid_email, valid_password};

/// Create an account and queue the verification email.
///
/// The response is only an acknowledgement; tokens are handed out once the
/// email link is followed or the user logs in.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = Register,
    responses(
        (status = 201, description = "Account created", body = Message),
        (status = 400, description = "Invalid email or password", body = String),
        (status = 409, description = "Email already registered", body = String)
    ),
    tag = "auth"
)]
pub async fn register(
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    payload: Option<Json<Register>>,
) -> impl IntoResponse {
    let request: Register = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }

    if !valid_password(&request.password) {
        return (
            StatusCode::BAD_REQUEST,
            "Password must be between 6 and 150 characters".to_string(),
        )
            .into_response();
    }

    let password_hash = match hash_password_blocking(request.password).await {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash password: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response();
        }
    };

    let username = request.username.as_deref().map(str::trim).filter(|name| !name.is_empty());

    match register_user(&pool, &email, username, &password_hash, &config).await {
        Ok(SignupOutcome::Created) => (
            StatusCode::CREATED,
            Json(Message::new("Account created, please verify your email")),
        )
            .into_response(),
        Ok(SignupOutcome::Conflict) => (
            StatusCode::CONFLICT,
            "Email already registered".to_string(),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to register user: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response()
        }
    }
}
