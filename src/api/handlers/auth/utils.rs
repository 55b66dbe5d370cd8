//! Small helpers shared by the auth flows.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Lowercase and trim an email before matching or storing it.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Minimal shape check, the mailbox is proven by the verification email.
#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

/// Passwords are 6 to 150 characters.
#[must_use]
pub fn valid_password(password: &str) -> bool {
    (6..=150).contains(&password.chars().count())
}

/// 32 random bytes, URL-safe base64 without padding.
#[must_use]
pub fn generate_single_use_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);

    URL_SAFE_NO_PAD.encode(bytes)
}

/// Single-use tokens are stored as their SHA-256 digest, never raw.
#[must_use]
pub fn hash_single_use_token(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

/// Link embedded in verification and reset emails.
#[must_use]
pub fn build_token_url(base_url: &str, route: &str, token: &str) -> String {
    format!(
        "{}/api/auth/{route}?token={token}",
        base_url.trim_end_matches('/')
    )
}

/// SQLSTATE 23505, unique constraint violation.
#[must_use]
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Ana@Example.COM "), "ana@example.com");
    }

    #[test]
    fn test_valid_email() {
        assert!(valid_email("ana@example.com"));
        assert!(valid_email("ana+tag@sub.example.com"));
        assert!(!valid_email("ana"));
        assert!(!valid_email("@example.com"));
        assert!(!valid_email("ana@"));
        assert!(!valid_email("ana@example"));
        assert!(!valid_email("ana @example.com"));
    }

    #[test]
    fn test_valid_password_bounds() {
        assert!(!valid_password("five5"));
        assert!(valid_password("sixsix"));
        assert!(valid_password(&"x".repeat(150)));
        assert!(!valid_password(&"x".repeat(151)));
    }

    #[test]
    fn test_single_use_token_shape() {
        let token = generate_single_use_token();

        // 32 bytes -> 43 base64url characters, no padding
        assert_eq!(token.len(), 43);
        assert!(!token.contains('='));
        assert_ne!(token, generate_single_use_token());
    }

    #[test]
    fn test_token_hash_is_stable() {
        let token = generate_single_use_token();

        assert_eq!(hash_single_use_token(&token), hash_single_use_token(&token));
        assert_eq!(hash_single_use_token(&token).len(), 32);
        assert_ne!(
            hash_single_use_token(&token),
            hash_single_use_token("other")
        );
    }

    #[test]
    fn test_build_token_url() {
        assert_eq!(
            build_token_url("http://localhost:8080/", "verify-email", "abc"),
            "http://localhost:8080/api/auth/verify-email?token=abc"
        );
    }
}
