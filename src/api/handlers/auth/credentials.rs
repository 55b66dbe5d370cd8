//! Password hashing, bcrypt behind `spawn_blocking`.

use anyhow::{anyhow, Context, Result};

const BCRYPT_COST: u32 = 10;

/// Hash a plaintext password, rejects empty input.
pub fn hash_password(password: &str) -> Result<String> {
    if password.is_empty() {
        return Err(anyhow!("password must not be empty"));
    }

    bcrypt::hash(password, BCRYPT_COST).context("failed to hash password")
}

/// Verify a plaintext password against a stored bcrypt hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    if password.is_empty() || hash.is_empty() {
        return Ok(false);
    }

    bcrypt::verify(password, hash).context("failed to verify password")
}

/// Async wrapper, bcrypt at cost 10 takes tens of milliseconds.
pub async fn hash_password_blocking(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("password hashing task failed")?
}

/// Async wrapper around [`verify_password`].
pub async fn verify_password_blocking(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .context("password verification task failed")?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_round_trip() {
        let hash = hash_password("s3cr3t-password").unwrap();

        assert!(hash.starts_with("$2"));
        assert!(verify_password("s3cr3t-password", &hash).unwrap());
        assert!(!verify_password("wrong-password", &hash).unwrap());
    }

    #[test]
    fn test_hash_is_salted() {
        let first = hash_password("same-input").unwrap();
        let second = hash_password("same-input").unwrap();

        assert_ne!(first, second);
        assert!(verify_password("same-input", &first).unwrap());
        assert!(verify_password("same-input", &second).unwrap());
    }

    #[test]
    fn test_empty_password_rejected() {
        assert!(hash_password("").is_err());
    }

    #[test]
    fn test_verify_empty_inputs() {
        let hash = hash_password("anything").unwrap();

        assert!(!verify_password("", &hash).unwrap());
        assert!(!verify_password("anything", "").unwrap());
    }

    #[tokio::test]
    async fn test_blocking_wrappers() {
        let hash = hash_password_blocking("wrapped".to_string()).await.unwrap();

        assert!(
            verify_password_blocking("wrapped".to_string(), hash)
                .await
                .unwrap()
        );
    }
}
