//! `OpenAPI` document for the HTTP API.
//!
//! Every routed handler carries a `#[utoipa::path]` annotation; this module
//! collects them into one document for the `openapi` binary.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::openapi::{Contact, License};
use utoipa::{Modify, OpenApi};

use super::handlers::{auth, health, products, reviews, uploads, users};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::register::register,
        auth::login::login,
        auth::verification::verify_email,
        auth::verification::resend_verification,
        auth::password::update_password,
        auth::password::forget_password,
        auth::password::reset_password,
        auth::refresh::refresh,
        users::current_user,
        users::list_users,
        users::update_user,
        users::delete_user,
        users::upload_profile_image,
        products::list_products,
        products::get_product,
        products::create_product,
        products::update_product,
        products::delete_product,
        reviews::list_reviews,
        reviews::create_review,
        reviews::update_review,
        reviews::delete_review,
        uploads::upload_file,
        uploads::upload_files,
        uploads::get_file,
        uploads::delete_file,
    ),
    components(schemas(
        health::Health,
        auth::types::Register,
        auth::types::Login,
        auth::types::UpdatePassword,
        auth::types::ForgetPassword,
        auth::types::ResetPassword,
        auth::types::Refresh,
        auth::types::Message,
        auth::tokens::TokenPair,
        users::UserProfile,
        users::UpdateUser,
        products::Product,
        products::CreateProduct,
        products::UpdateProduct,
        reviews::Review,
        reviews::CreateReview,
        reviews::UpdateReview,
        uploads::StoredFile,
    )),
    modifiers(&Security),
    tags(
        (name = "health", description = "Service health"),
        (name = "auth", description = "Registration, login and token lifecycle"),
        (name = "users", description = "User accounts"),
        (name = "products", description = "Product catalogue"),
        (name = "reviews", description = "Product reviews"),
        (name = "uploads", description = "File storage")
    )
)]
struct ApiDoc;

struct Security;

impl Modify for Security {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut spec = ApiDoc::openapi();

    // Use Cargo.toml metadata instead of the derive defaults.
    spec.info.title = env!("CARGO_PKG_NAME").to_string();
    spec.info.version = env!("CARGO_PKG_VERSION").to_string();
    spec.info.description = optional_str(env!("CARGO_PKG_DESCRIPTION")).map(str::to_string);
    spec.info.contact = cargo_contact();
    spec.info.license = cargo_license();

    spec
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    if let Some(start) = author.find('<') {
        let name = author[..start].trim();
        let email = author[start + 1..].trim_end_matches('>').trim();
        let name = if name.is_empty() { None } else { Some(name) };
        let email = if email.is_empty() { None } else { Some(email) };
        (name, email)
    } else {
        let name = author.trim();
        (if name.is_empty() { None } else { Some(name) }, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let spec = openapi();
        assert_eq!(spec.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(
            spec.info.description.as_deref(),
            Some(env!("CARGO_PKG_DESCRIPTION"))
        );

        let contact = spec.info.contact;
        assert!(contact.is_some());
        if let Some(contact) = contact {
            assert_eq!(contact.name.as_deref(), Some("Team Vendejo"));
            assert_eq!(contact.email.as_deref(), Some("team@vendejo.dev"));
        }

        let license = spec.info.license;
        assert!(license.is_some());
        if let Some(license) = license {
            assert_eq!(license.name, "BSD-3-Clause");
            assert_eq!(license.identifier.as_deref(), Some("BSD-3-Clause"));
        }
    }

    #[test]
    fn openapi_documents_all_routes() {
        let spec = openapi();

        for path in [
            "/health",
            "/api/auth/register",
            "/api/auth/login",
            "/api/auth/verify-email",
            "/api/auth/resend-email-verification",
            "/api/auth/update-password",
            "/api/auth/forget-password",
            "/api/auth/reset-password",
            "/api/auth/refresh",
            "/api/users",
            "/api/users/current-user",
            "/api/users/profile-image",
            "/api/users/{id}",
            "/api/products",
            "/api/products/{id}",
            "/api/reviews/{productId}",
            "/api/reviews/{id}",
            "/api/uploads",
            "/api/uploads/multiple",
            "/api/uploads/{name}",
        ] {
            assert!(
                spec.paths.paths.contains_key(path),
                "missing path in openapi: {path}"
            );
        }
    }

    #[test]
    fn parse_author_variants() {
        assert_eq!(
            parse_author("Team Vendejo <team@vendejo.dev>"),
            (Some("Team Vendejo"), Some("team@vendejo.dev"))
        );
        assert_eq!(parse_author("Solo"), (Some("Solo"), None));
        assert_eq!(parse_author("<only@email>"), (None, Some("only@email")));
    }
}
