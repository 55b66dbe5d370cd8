//! # Vendejo (E-commerce Backend)
//!
//! `vendejo` is a small e-commerce backend: user accounts, product listings,
//! reviews, image uploads, and transactional email notifications.
//!
//! ## Authentication
//!
//! Authentication is password-based (bcrypt) with a stateless JWT pair:
//!
//! - **Access tokens** are short-lived and checked on every guarded request.
//! - **Refresh tokens** are long-lived but revocable: every account carries a
//!   `last_security_update` timestamp that is advanced atomically with any
//!   password-hash change, and refresh tokens issued before that moment are
//!   rejected. No server-side revocation list is needed for the common
//!   "user changed password" case.
//!
//! Email verification and password reset use opaque single-use tokens
//! (256 bits of entropy, stored hashed, deleted on first use).
//!
//! ## Authorization
//!
//! Roles are `admin` and `user`. Role-gated routes call an explicit guard at
//! the top of the handler; a route that declares no allowed roles denies by
//! default.
//!
//! ## Notifications
//!
//! Emails are never sent on the request path. Flows enqueue rows into a
//! database outbox inside their own transaction; a background worker drains
//! the queue and hands messages to an SMTP (or log-only) sender. Delivery
//! failures are recorded and logged, never surfaced to the requester.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
