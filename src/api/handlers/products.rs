//! Product catalogue endpoints. Reads are public, writes are admin only.

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

use super::auth::guard::require_role_auth;
use super::auth::AuthConfig;

#[derive(Debug, Serialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub image: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProduct {
    pub title: String,
    pub description: String,
    pub price: f64,
    pub image: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProduct {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub image: Option<String>,
}

fn validate_title(title: &str) -> Result<(), String> {
    let len = title.chars().count();
    if (3..=100).contains(&len) {
        Ok(())
    } else {
        Err("Title must be between 3 and 100 characters".to_string())
    }
}

fn validate_description(description: &str) -> Result<(), String> {
    if description.chars().count() >= 5 {
        Ok(())
    } else {
        Err("Description must be at least 5 characters".to_string())
    }
}

fn validate_price(price: f64) -> Result<(), String> {
    if price.is_finite() && (1.0..=1000.0).contains(&price) {
        Ok(())
    } else {
        Err("Price must be between 1 and 1000".to_string())
    }
}

fn row_to_product(row: &sqlx::postgres::PgRow) -> Product {
    Product {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        price: row.get("price"),
        image: row.get("image"),
        user_id: row.get("user_id"),
        created_at: row.get("created_at"),
    }
}

const PRODUCT_COLUMNS: &str = "id, title, description, price, image, user_id, created_at";

/// List all products.
#[utoipa::path(
    get,
    path = "/api/products",
    responses(
        (status = 200, description = "All products", body = [Product])
    ),
    tag = "products"
)]
pub async fn list_products(pool: Extension<PgPool>) -> impl IntoResponse {
    let query = "SELECT id, title, description, price, image, user_id, created_at FROM products ORDER BY created_at DESC";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    match sqlx::query(query).fetch_all(&pool.0).instrument(span).await {
        Ok(rows) => {
            let products: Vec<Product> = rows.iter().map(row_to_product).collect();
            (StatusCode::OK, Json(products)).into_response()
        }
        Err(err) => {
            error!("Failed to list products: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Lookup failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Fetch one product.
#[utoipa::path(
    get,
    path = "/api/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product", body = Product),
        (status = 404, description = "No such product", body = String)
    ),
    tag = "products"
)]
pub async fn get_product(pool: Extension<PgPool>, Path(id): Path<Uuid>) -> impl IntoResponse {
    let query = "SELECT id, title, description, price, image, user_id, created_at FROM products WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    match sqlx::query(query)
        .bind(id)
        .fetch_optional(&pool.0)
        .instrument(span)
        .await
    {
        Ok(Some(row)) => (StatusCode::OK, Json(row_to_product(&row))).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Product not found".to_string()).into_response(),
        Err(err) => {
            error!("Failed to fetch product: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Lookup failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Create a product, admin only.
#[utoipa::path(
    post,
    path = "/api/products",
    request_body = CreateProduct,
    security(("bearer" = [])),
    responses(
        (status = 201, description = "Product created", body = Product),
        (status = 400, description = "Invalid fields", body = String),
        (status = 401, description = "Missing or invalid access token", body = String),
        (status = 403, description = "Caller is not an admin", body = String)
    ),
    tag = "products"
)]
pub async fn create_product(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    payload: Option<Json<CreateProduct>>,
) -> impl IntoResponse {
    let principal = match require_role_auth(&config, &headers, &["admin"]) {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let request: CreateProduct = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let title = request.title.trim().to_string();
    let description = request.description.trim().to_string();

    if let Err(message) = validate_title(&title)
        .and_then(|()| validate_description(&description))
        .and_then(|()| validate_price(request.price))
    {
        return (StatusCode::BAD_REQUEST, message).into_response();
    }

    let query = format!(
        "INSERT INTO products (title, description, price, image, user_id) VALUES ($1, $2, $3, $4, $5) RETURNING {PRODUCT_COLUMNS}"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    match sqlx::query(&query)
        .bind(&title)
        .bind(&description)
        .bind(request.price)
        .bind(&request.image)
        .bind(principal.user_id)
        .fetch_one(&pool.0)
        .instrument(span)
        .await
    {
        Ok(row) => (StatusCode::CREATED, Json(row_to_product(&row))).into_response(),
        Err(err) => {
            error!("Failed to create product: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Create failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Update a product, admin only.
#[utoipa::path(
    patch,
    path = "/api/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = UpdateProduct,
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Updated product", body = Product),
        (status = 400, description = "Invalid fields", body = String),
        (status = 401, description = "Missing or invalid access token", body = String),
        (status = 403, description = "Caller is not an admin", body = String),
        (status = 404, description = "No such product", body = String)
    ),
    tag = "products"
)]
pub async fn update_product(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    Path(id): Path<Uuid>,
    payload: Option<Json<UpdateProduct>>,
) -> impl IntoResponse {
    if let Err(err) = require_role_auth(&config, &headers, &["admin"]) {
        return err.into_response();
    }

    let request: UpdateProduct = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let title = request.title.as_deref().map(str::trim).map(str::to_string);
    let description = request
        .description
        .as_deref()
        .map(str::trim)
        .map(str::to_string);

    if let Some(title) = title.as_deref() {
        if let Err(message) = validate_title(title) {
            return (StatusCode::BAD_REQUEST, message).into_response();
        }
    }
    if let Some(description) = description.as_deref() {
        if let Err(message) = validate_description(description) {
            return (StatusCode::BAD_REQUEST, message).into_response();
        }
    }
    if let Some(price) = request.price {
        if let Err(message) = validate_price(price) {
            return (StatusCode::BAD_REQUEST, message).into_response();
        }
    }

    let query = format!(
        "UPDATE products SET title = COALESCE($2, title), description = COALESCE($3, description), price = COALESCE($4, price), image = COALESCE($5, image), updated_at = NOW() WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query.as_str()
    );
    match sqlx::query(&query)
        .bind(id)
        .bind(&title)
        .bind(&description)
        .bind(request.price)
        .bind(&request.image)
        .fetch_optional(&pool.0)
        .instrument(span)
        .await
    {
        Ok(Some(row)) => (StatusCode::OK, Json(row_to_product(&row))).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Product not found".to_string()).into_response(),
        Err(err) => {
            error!("Failed to update product: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Update failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Delete a product, admin only. Its reviews go with it.
#[utoipa::path(
    delete,
    path = "/api/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    security(("bearer" = [])),
    responses(
        (status = 204, description = "Product deleted"),
        (status = 401, description = "Missing or invalid access token", body = String),
        (status = 403, description = "Caller is not an admin", body = String),
        (status = 404, description = "No such product", body = String)
    ),
    tag = "products"
)]
pub async fn delete_product(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<AuthConfig>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    if let Err(err) = require_role_auth(&config, &headers, &["admin"]) {
        return err.into_response();
    }

    let query = "DELETE FROM products WHERE id = $1";
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
        Ok(_) => (StatusCode::NOT_FOUND, "Product not found".to_string()).into_response(),
        Err(err) => {
            error!("Failed to delete product: {err}");
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
    use super::*;

    #[test]
    fn test_title_bounds() {
        assert!(validate_title("ab").is_err());
        assert!(validate_title("abc").is_ok());
        assert!(validate_title(&"x".repeat(100)).is_ok());
        assert!(validate_title(&"x".repeat(101)).is_err());
    }

    #[test]
    fn test_description_bounds() {
        assert!(validate_description("1234").is_err());
        assert!(validate_description("12345").is_ok());
    }

    #[test]
    fn test_price_bounds() {
        assert!(validate_price(0.99).is_err());
        assert!(validate_price(1.0).is_ok());
        assert!(validate_price(1000.0).is_ok());
        assert!(validate_price(1000.01).is_err());
        assert!(validate_price(f64::NAN).is_err());
        assert!(validate_price(f64::INFINITY).is_err());
    }
}
