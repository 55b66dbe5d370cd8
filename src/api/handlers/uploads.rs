//! File upload and retrieval endpoints.
//!
//! Stored names are prefixed with a ULID so uploads never collide, and every
//! lookup goes through [`UploadsConfig::resolve`], which rejects anything
//! that could escape the uploads directory.

use anyhow::{anyhow, Context, Result};
use axum::{
    extract::{Extension, Multipart, Path},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;
use ulid::Ulid;
use utoipa::ToSchema;

use super::auth::guard::require_auth;
use super::auth::AuthConfig;

#[derive(Clone, Debug)]
pub struct UploadsConfig {
    dir: PathBuf,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StoredFile {
    pub filename: String,
}

impl UploadsConfig {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .context("failed to create uploads directory")
    }

    /// Map a client-supplied name to a path inside the uploads directory.
    ///
    /// Separators and `..` are rejected outright.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
        {
            return Err(anyhow!("invalid file name"));
        }

        Ok(self.dir.join(name))
    }

    /// Keep only the safe part of the original name for the stored suffix.
    /// Dot runs are collapsed so the result can never contain `..`.
    fn sanitize(original: &str) -> String {
        let mut cleaned = String::new();

        for c in original.chars() {
            if c == '.' {
                if !cleaned.ends_with('.') {
                    cleaned.push('.');
                }
            } else if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                cleaned.push(c);
            }
        }

        let cleaned = cleaned.trim_matches('.').to_string();
        if cleaned.is_empty() {
            "file".to_string()
        } else {
            cleaned
        }
    }

    async fn store(&self, original: &str, bytes: &[u8]) -> Result<String> {
        let stored = format!("{}-{}", Ulid::new(), Self::sanitize(original));
        let path = self.resolve(&stored)?;

        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write upload {stored}"))?;

        Ok(stored)
    }

    /// Store every file field of a multipart body, returning the stored names.
    pub async fn save_files(&self, mut multipart: Multipart) -> Result<Vec<String>> {
        let mut stored = Vec::new();

        while let Some(field) = multipart
            .next_field()
            .await
            .context("failed to read multipart field")?
        {
            let original = field
                .file_name()
                .map_or_else(|| "file".to_string(), ToString::to_string);
            let bytes = field.bytes().await.context("failed to read upload body")?;

            if bytes.is_empty() {
                continue;
            }

            stored.push(self.store(&original, &bytes).await?);
        }

        Ok(stored)
    }

    /// Store the first file field only, as used by profile images.
    pub async fn save_first_file(&self, multipart: Multipart) -> Result<Option<String>> {
        Ok(self.save_files(multipart).await?.into_iter().next())
    }
}

fn content_type_for(name: &str) -> &'static str {
    match name.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Upload a single file.
#[utoipa::path(
    post,
    path = "/api/uploads",
    security(("bearer" = [])),
    responses(
        (status = 201, description = "File stored", body = StoredFile),
        (status = 400, description = "Missing file", body = String),
        (status = 401, description = "Missing or invalid access token", body = String)
    ),
    tag = "uploads"
)]
pub async fn upload_file(
    headers: HeaderMap,
    config: Extension<Arc<AuthConfig>>,
    uploads: Extension<Arc<UploadsConfig>>,
    multipart: Multipart,
) -> impl IntoResponse {
    if let Err(err) = require_auth(&config, &headers) {
        return err.into_response();
    }

    match uploads.save_first_file(multipart).await {
        Ok(Some(filename)) => (StatusCode::CREATED, Json(StoredFile { filename })).into_response(),
        Ok(None) => (StatusCode::BAD_REQUEST, "Missing file".to_string()).into_response(),
        Err(err) => {
            error!("Failed to store upload: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Upload failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Upload several files in one request.
#[utoipa::path(
    post,
    path = "/api/uploads/multiple",
    security(("bearer" = [])),
    responses(
        (status = 201, description = "Files stored", body = [StoredFile]),
        (status = 400, description = "No files in request", body = String),
        (status = 401, description = "Missing or invalid access token", body = String)
    ),
    tag = "uploads"
)]
pub async fn upload_files(
    headers: HeaderMap,
    config: Extension<Arc<AuthConfig>>,
    uploads: Extension<Arc<UploadsConfig>>,
    multipart: Multipart,
) -> impl IntoResponse {
    if let Err(err) = require_auth(&config, &headers) {
        return err.into_response();
    }

    match uploads.save_files(multipart).await {
        Ok(stored) if stored.is_empty() => {
            (StatusCode::BAD_REQUEST, "Missing files".to_string()).into_response()
        }
        Ok(stored) => {
            let body: Vec<StoredFile> = stored
                .into_iter()
                .map(|filename| StoredFile { filename })
                .collect();
            (StatusCode::CREATED, Json(body)).into_response()
        }
        Err(err) => {
            error!("Failed to store uploads: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Upload failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Serve a stored file.
#[utoipa::path(
    get,
    path = "/api/uploads/{name}",
    params(("name" = String, Path, description = "Stored file name")),
    responses(
        (status = 200, description = "File bytes"),
        (status = 404, description = "No such file", body = String)
    ),
    tag = "uploads"
)]
pub async fn get_file(
    uploads: Extension<Arc<UploadsConfig>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let path = match uploads.resolve(&name) {
        Ok(path) => path,
        Err(_) => {
            return (StatusCode::NOT_FOUND, "File not found".to_string()).into_response();
        }
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let mut headers = HeaderMap::new();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(content_type_for(&name)),
            );
            (StatusCode::OK, headers, bytes).into_response()
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, "File not found".to_string()).into_response()
        }
        Err(err) => {
            error!("Failed to read upload {name}: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Read failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Delete a stored file.
#[utoipa::path(
    delete,
    path = "/api/uploads/{name}",
    params(("name" = String, Path, description = "Stored file name")),
    security(("bearer" = [])),
    responses(
        (status = 204, description = "File deleted"),
        (status = 401, description = "Missing or invalid access token", body = String),
        (status = 404, description = "No such file", body = String)
    ),
    tag = "uploads"
)]
pub async fn delete_file(
    headers: HeaderMap,
    config: Extension<Arc<AuthConfig>>,
    uploads: Extension<Arc<UploadsConfig>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if let Err(err) = require_auth(&config, &headers) {
        return err.into_response();
    }

    let path = match uploads.resolve(&name) {
        Ok(path) => path,
        Err(_) => {
            return (StatusCode::NOT_FOUND, "File not found".to_string()).into_response();
        }
    };

    match tokio::fs::remove_file(&path).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, "File not found".to_string()).into_response()
        }
        Err(err) => {
            error!("Failed to delete upload {name}: {err}");
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
    fn test_resolve_rejects_traversal() {
        let config = UploadsConfig::new("uploads");

        assert!(config.resolve("../etc/passwd").is_err());
        assert!(config.resolve("a/../b").is_err());
        assert!(config.resolve("a\\b").is_err());
        assert!(config.resolve("").is_err());
        assert!(config.resolve("photo.png").is_ok());
    }

    #[test]
    fn test_sanitize_keeps_safe_characters() {
        assert_eq!(UploadsConfig::sanitize("my photo (1).png"), "myphoto1.png");
        assert_eq!(UploadsConfig::sanitize("../../x"), "x");
        assert_eq!(UploadsConfig::sanitize("a..b.txt"), "a.b.txt");
        assert_eq!(UploadsConfig::sanitize("<>|"), "file");
        assert_eq!(UploadsConfig::sanitize("..."), "file");
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a.PNG"), "image/png");
        assert_eq!(content_type_for("a.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("a.bin"), "application/octet-stream");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
