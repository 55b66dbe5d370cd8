//! User account endpoints.

use anyhow::{Context, Result};
use axum::{
    extract::{Extension, Multipart, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{error, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::auth::guard::{require_auth, require_role, require_role_auth};
use super::auth::password::apply_password_change;
use super::auth::{hash_password_blocking, valid_password, AuthConfig};
use super::uploads::UploadsConfig;

#[derive(Debug, Serialize, ToSchema)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
    pub role: String,
    #[serde(rename = "profileImage")]
    pub profile_image: Option<String>,
    #[serde(rename = "isVerified")]
    pub is_verified: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateUser {
    pub username: Option<String>,
    pub password: Option<String>,
}

fn row_to_profile(row: &sqlx::postgres::PgRow) -> UserProfile {
    UserProfile {
        id: row.get("id"),
        email: row.get("email"),
        username: row.get("username"),
        role: row.get("role"),
        profile_image: row.get("profile_image"),
        is_verified: row.get("is_verified"),
        created_at: row.get("created_at"),
    }
}

const PROFILE_COLUMNS: &str =
    "id, email, username, role, profile_image, is_verified, created_at";

async fn fetch_profile(pool: &PgPool, user_id: Uuid) -> Result<Option<UserProfile>> {
    let query = "SELECT id, email, username, role, profile_image, is_verified, created_at FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch user profile")?;

    Ok(row.as_ref().map(row_to_profile))
}

/// Profile of the authenticated user.
#[utoipa::path(
    get,
    path = "/api/users/current-user",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Current user", body = UserProfile),
        (status = 401, description = "Missing or invalid access token", body = String),
        (status = 404, description = "Account no longer exists", body = String)
    ),
    tag = "users"
)]
pub async fn current_user(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
) -> impl IntoResponse {
    let principal = match require_auth(&config, &headers) {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match fetch_profile(&pool, principal.user_id).await {
        Ok(Some(profile)) => (StatusCode::OK, Json(profile)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "User not found".to_string()).into_response(),
        Err(err) => {
            error!("Failed to fetch current user: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Lookup failed".to_string(),
            )
                .into_response()
        }
    }
}

/// List all users, admin only.
#[utoipa::path(
    get,
    path = "/api/users",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "All users", body = [UserProfile]),
        (status = 401, description = "Missing or invalid access token", body = String),
        (status = 403, description = "Caller is not an admin", body = String)
    ),
    tag = "users"
)]
pub async fn list_users(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
) -> impl IntoResponse {
    if let Err(err) = require_role_auth(&config, &headers, &["admin"]) {
        return err.into_response();
    }

    let query = "SELECT id, email, username, role, profile_image, is_verified, created_at FROM users ORDER BY created_at DESC";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    match sqlx::query(query).fetch_all(&pool.0).instrument(span).await {
        Ok(rows) => {
            let users: Vec<UserProfile> = rows.iter().map(row_to_profile).collect();
            (StatusCode::OK, Json(users)).into_response()
        }
        Err(err) => {
            error!("Failed to list users: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Lookup failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Update the authenticated user's own profile fields.
///
/// A password in the payload goes through the same transactional hash +
/// security-stamp update as the dedicated password routes, so it revokes
/// outstanding refresh tokens too.
#[utoipa::path(
    patch,
    path = "/api/users",
    request_body = UpdateUser,
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Updated profile", body = UserProfile),
        (status = 400, description = "Invalid username or password", body = String),
        (status = 401, description = "Missing or invalid access token", body = String)
    ),
    tag = "users"
)]
pub async fn update_user(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    payload: Option<Json<UpdateUser>>,
) -> impl IntoResponse {
    let principal = match require_auth(&config, &headers) {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let request: UpdateUser = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let username = match request.username.as_deref().map(str::trim) {
        Some("") => {
            return (StatusCode::BAD_REQUEST, "Username must not be empty".to_string())
                .into_response();
        }
        Some(name) if name.chars().count() > 100 => {
            return (
                StatusCode::BAD_REQUEST,
                "Username must be at most 100 characters".to_string(),
            )
                .into_response();
        }
        other => other,
    };

    if let Some(password) = request.password {
        if !valid_password(&password) {
            return (
                StatusCode::BAD_REQUEST,
                "Password must be between 6 and 150 characters".to_string(),
            )
                .into_response();
        }

        let new_hash = match hash_password_blocking(password).await {
            Ok(hash) => hash,
            Err(err) => {
                error!("Failed to hash new password: {err}");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Update failed".to_string(),
                )
                    .into_response();
            }
        };

        if let Err(err) = apply_password_change(&pool.0, principal.user_id, &new_hash).await {
            error!("Failed to update password: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Update failed".to_string(),
            )
                .into_response();
        }
    }

    let query = format!(
        "UPDATE users SET username = COALESCE($2, username), updated_at = NOW() WHERE id = $1 RETURNING {PROFILE_COLUMNS}"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query.as_str()
    );
    match sqlx::query(&query)
        .bind(principal.user_id)
        .bind(username)
        .fetch_optional(&pool.0)
        .instrument(span)
        .await
    {
        Ok(Some(row)) => (StatusCode::OK, Json(row_to_profile(&row))).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "User not found".to_string()).into_response(),
        Err(err) => {
            error!("Failed to update user: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Update failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Delete an account. Users may delete themselves; admins may delete anyone.
#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    security(("bearer" = [])),
    responses(
        (status = 204, description = "Account deleted"),
        (status = 401, description = "Missing or invalid access token", body = String),
        (status = 403, description = "Not the owner and not an admin", body = String),
        (status = 404, description = "No such user", body = String)
    ),
    tag = "users"
)]
pub async fn delete_user(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let principal = match require_auth(&config, &headers) {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    if principal.user_id != id {
        if let Err(err) = require_role(&principal, &["admin"]) {
            return err.into_response();
        }
    }

    let query = "DELETE FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    match sqlx::query(query)
        .bind(id)
        .execute(&pool.0)
        .instrument(span)
        .await
    {
        Ok(result) if result.rows_affected() > 0 => StatusCode::NO_CONTENT.into_response(),
        Ok(_) => (StatusCode::NOT_FOUND, "User not found".to_string()).into_response(),
        Err(err) => {
            error!("Failed to delete user: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Delete failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Upload a profile image for the authenticated user.
#[utoipa::path(
    post,
    path = "/api/users/profile-image",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Updated profile", body = UserProfile),
        (status = 400, description = "Missing or invalid file", body = String),
        (status = 401, description = "Missing or invalid access token", body = String)
    ),
    tag = "users"
)]
pub async fn upload_profile_image(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    uploads: Extension<Arc<UploadsConfig>>,
    multipart: Multipart,
) -> impl IntoResponse {
    let principal = match require_auth(&config, &headers) {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let stored = match uploads.save_first_file(multipart).await {
        Ok(Some(name)) => name,
        Ok(None) => {
            return (StatusCode::BAD_REQUEST, "Missing file".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to store profile image: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Upload failed".to_string(),
            )
                .into_response();
        }
    };

    let query = format!(
        "UPDATE users SET profile_image = $2, updated_at = NOW() WHERE id = $1 RETURNING {PROFILE_COLUMNS}"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query.as_str()
    );
    match sqlx::query(&query)
        .bind(principal.user_id)
        .bind(&stored)
        .fetch_optional(&pool.0)
        .instrument(span)
        .await
    {
        Ok(Some(row)) => (StatusCode::OK, Json(row_to_profile(&row))).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "User not found".to_string()).into_response(),
        Err(err) => {
            error!("Failed to save profile image reference: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Upload failed".to_string(),
            )
                .into_response()
        }
    }
}
