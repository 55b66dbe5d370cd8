//! Product review endpoints.
//!
//! Every route requires a bearer token, reads included. Updates are owner
//! only, deletes are owner or admin.

use axum::{
    extract::{Extension, Path},
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

use super::auth::guard::require_auth;
use super::auth::AuthConfig;

#[derive(Debug, Serialize, ToSchema)]
pub struct Review {
    pub id: Uuid,
    pub rating: i32,
    pub comment: String,
    #[serde(rename = "productId")]
    pub product_id: Uuid,
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateReview {
    pub rating: i32,
    pub comment: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateReview {
    pub rating: Option<i32>,
    pub comment: Option<String>,
}

fn valid_rating(rating: i32) -> bool {
    (1..=5).contains(&rating)
}

fn row_to_review(row: &sqlx::postgres::PgRow) -> Review {
    Review {
        id: row.get("id"),
        rating: row.get("rating"),
        comment: row.get("comment"),
        product_id: row.get("product_id"),
        user_id: row.get("user_id"),
        created_at: row.get("created_at"),
    }
}

const REVIEW_COLUMNS: &str = "id, rating, comment, product_id, user_id, created_at";

/// List the reviews of one product.
#[utoipa::path(
    get,
    path = "/api/reviews/{productId}",
    params(("productId" = Uuid, Path, description = "Product id")),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Reviews for the product", body = [Review]),
        (status = 401, description = "Missing or invalid access token", body = String)
    ),
    tag = "reviews"
)]
pub async fn list_reviews(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    Path(product_id): Path<Uuid>,
) -> impl IntoResponse {
    if let Err(err) = require_auth(&config, &headers) {
        return err.into_response();
    }

    let query = "SELECT id, rating, comment, product_id, user_id, created_at FROM reviews WHERE product_id = $1 ORDER BY created_at DESC";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    match sqlx::query(query)
        .bind(product_id)
        .fetch_all(&pool.0)
        .instrument(span)
        .await
    {
        Ok(rows) => {
            let reviews: Vec<Review> = rows.iter().map(row_to_review).collect();
            (StatusCode::OK, Json(reviews)).into_response()
        }
        Err(err) => {
            error!("Failed to list reviews: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Lookup failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Review a product.
#[utoipa::path(
    post,
    path = "/api/reviews/{productId}",
    params(("productId" = Uuid, Path, description = "Product id")),
    request_body = CreateReview,
    security(("bearer" = [])),
    responses(
        (status = 201, description = "Review created", body = Review),
        (status = 400, description = "Invalid rating or comment", body = String),
        (status = 401, description = "Missing or invalid access token", body = String),
        (status = 404, description = "No such product", body = String)
    ),
    tag = "reviews"
)]
pub async fn create_review(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    Path(product_id): Path<Uuid>,
    payload: Option<Json<CreateReview>>,
) -> impl IntoResponse {
    let principal = match require_auth(&config, &headers) {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let request: CreateReview = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if !valid_rating(request.rating) {
        return (
            StatusCode::BAD_REQUEST,
            "Rating must be between 1 and 5".to_string(),
        )
            .into_response();
    }

    let comment = request.comment.trim().to_string();
    if comment.is_empty() {
        return (StatusCode::BAD_REQUEST, "Comment must not be empty".to_string()).into_response();
    }

    let query = format!(
        "INSERT INTO reviews (rating, comment, product_id, user_id) VALUES ($1, $2, $3, $4) RETURNING {REVIEW_COLUMNS}"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    match sqlx::query(&query)
        .bind(request.rating)
        .bind(&comment)
        .bind(product_id)
        .bind(principal.user_id)
        .fetch_one(&pool.0)
        .instrument(span)
        .await
    {
        Ok(row) => (StatusCode::CREATED, Json(row_to_review(&row))).into_response(),
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23503") => {
            // Foreign key violation, the product does not exist.
            (StatusCode::NOT_FOUND, "Product not found".to_string()).into_response()
        }
        Err(err) => {
            error!("Failed to create review: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Create failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Update one's own review.
#[utoipa::path(
    patch,
    path = "/api/reviews/{id}",
    params(("id" = Uuid, Path, description = "Review id")),
    request_body = UpdateReview,
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Updated review", body = Review),
        (status = 400, description = "Invalid rating or comment", body = String),
        (status = 401, description = "Missing or invalid access token", body = String),
        (status = 404, description = "No review of yours with that id", body = String)
    ),
    tag = "reviews"
)]
pub async fn update_review(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    Path(id): Path<Uuid>,
    payload: Option<Json<UpdateReview>>,
) -> impl IntoResponse {
    let principal = match require_auth(&config, &headers) {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let request: UpdateReview = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if let Some(rating) = request.rating {
        if !valid_rating(rating) {
            return (
                StatusCode::BAD_REQUEST,
                "Rating must be between 1 and 5".to_string(),
            )
                .into_response();
        }
    }

    let comment = request.comment.as_deref().map(str::trim).map(str::to_string);
    if comment.as_deref() == Some("") {
        return (StatusCode::BAD_REQUEST, "Comment must not be empty".to_string()).into_response();
    }

    // Ownership is part of the WHERE clause; someone else's review simply
    // comes back as not found.
    let query = format!(
        "UPDATE reviews SET rating = COALESCE($3, rating), comment = COALESCE($4, comment), updated_at = NOW() WHERE id = $1 AND user_id = $2 RETURNING {REVIEW_COLUMNS}"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query.as_str()
    );
    match sqlx::query(&query)
        .bind(id)
        .bind(principal.user_id)
        .bind(request.rating)
        .bind(&comment)
        .fetch_optional(&pool.0)
        .instrument(span)
        .await
    {
        Ok(Some(row)) => (StatusCode::OK, Json(row_to_review(&row))).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Review not found".to_string()).into_response(),
        Err(err) => {
            error!("Failed to update review: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Update failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Delete a review. Owners may delete their own; admins may delete any.
#[utoipa::path(
    delete,
    path = "/api/reviews/{id}",
    params(("id" = Uuid, Path, description = "Review id")),
    security(("bearer" = [])),
    responses(
        (status = 204, description = "Review deleted"),
        (status = 401, description = "Missing or invalid access token", body = String),
        (status = 404, description = "No such review", body = String)
    ),
    tag = "reviews"
)]
pub async fn delete_review(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let principal = match require_auth(&config, &headers) {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let query = if principal.role == "admin" {
        "DELETE FROM reviews WHERE id = $1"
    } else {
        "DELETE FROM reviews WHERE id = $1 AND user_id = $2"
    };
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let mut statement = sqlx::query(query).bind(id);
    if principal.role != "admin" {
        statement = statement.bind(principal.user_id);
    }

    match statement.execute(&pool.0).instrument(span).await {
        Ok(result) if result.rows_affected() > 0 => StatusCode::NO_CONTENT.into_response(),
        Ok(_) => (StatusCode::NOT_FOUND, "Review not found".to_string()).into_response(),
        Err(err) => {
            error!("Failed to delete review: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Delete failed".to_string(),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::valid_rating;

    #[test]
    fn test_rating_bounds() {
        assert!(!valid_rating(0));
        assert!(valid_rating(1));
        assert!(valid_rating(5));
        assert!(!valid_rating(6));
        assert!(!valid_rating(-1));
    }
}
