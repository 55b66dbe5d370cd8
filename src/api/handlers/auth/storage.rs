//! Database helpers for accounts, single-use tokens and security state.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::state::AuthConfig;
use super::utils::{
    build_token_url, generate_single_use_token, hash_single_use_token, is_unique_violation,
};

/// Outcome when attempting to create a new user + verification record.
#[derive(Debug)]
pub(super) enum SignupOutcome {
    Created,
    Conflict,
}

/// What a single-use token is good for. Stored as text next to the hash so a
/// reset token can never be replayed as a verification token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TokenPurpose {
    EmailVerification,
    PasswordReset,
}

impl TokenPurpose {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::EmailVerification => "email_verification",
            Self::PasswordReset => "password_reset",
        }
    }

    const fn template(self) -> &'static str {
        match self {
            Self::EmailVerification => "verify_email",
            Self::PasswordReset => "reset_password",
        }
    }

    const fn route(self) -> &'static str {
        match self {
            Self::EmailVerification => "verify-email",
            Self::PasswordReset => "reset-password",
        }
    }
}

/// Fields needed to check a password login.
pub(super) struct CredentialRecord {
    pub(super) user_id: Uuid,
    pub(super) role: String,
    pub(super) password_hash: String,
}

/// Fields needed to validate a refresh token against current account state.
pub(super) struct RefreshRecord {
    pub(super) role: String,
    pub(super) last_security_update: DateTime<Utc>,
}

/// Look up login data by normalized email.
pub(super) async fn lookup_credentials(
    pool: &PgPool,
    email: &str,
) -> Result<Option<CredentialRecord>> {
    let query = "SELECT id, role, password_hash FROM users WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup credentials")?;

    Ok(row.map(|row| CredentialRecord {
        user_id: row.get("id"),
        role: row.get("role"),
        password_hash: row.get("password_hash"),
    }))
}

pub(super) async fn register_user(
    pool: &PgPool,
    email: &str,
    username: Option<&str>,
    password_hash: &str,
    config: &AuthConfig,
) -> Result<SignupOutcome> {
    // Transaction keeps the new account, its verification token and the
    // outbox row consistent if anything fails mid-way.
    let mut tx = pool.begin().await.context("begin signup transaction")?;

    let query = r"
        INSERT INTO users
            (email, username, password_hash)
        VALUES ($1, $2, $3)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(username)
        .bind(password_hash)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await;

    let user_id: Uuid = match row {
        Ok(row) => row.get("id"),
        Err(err) => {
            if is_unique_violation(&err) {
                let _ = tx.rollback().await;
                return Ok(SignupOutcome::Conflict);
            }
            return Err(err).context("failed to insert user");
        }
    };

    let _token =
        issue_single_use_token(&mut tx, user_id, email, TokenPurpose::EmailVerification, config)
            .await?;

    tx.commit().await.context("commit signup transaction")?;

    Ok(SignupOutcome::Created)
}

/// Insert a fresh single-use token and queue the matching email.
///
/// Only the SHA-256 hash of the token is stored; the raw value lives in the
/// emailed link and is returned for logging in development setups.
pub(super) async fn issue_single_use_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    email: &str,
    purpose: TokenPurpose,
    config: &AuthConfig,
) -> Result<String> {
    let token = generate_single_use_token();
    let token_hash = hash_single_use_token(&token);

    let query = r"
        INSERT INTO user_tokens
            (token_hash, purpose, user_id, expires_at)
        VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(&token_hash)
        .bind(purpose.as_str())
        .bind(user_id)
        .bind(config.token_ttl_seconds())
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert single-use token")?;

    let link = build_token_url(config.base_url(), purpose.route(), &token);
    enqueue_email(
        tx,
        email,
        purpose.template(),
        &json!({ "email": email, "link": link }),
    )
    .await?;

    Ok(token)
}

/// Drop all outstanding tokens of one purpose for a user, so a resend or a
/// new reset request leaves exactly one live link.
pub(super) async fn invalidate_tokens(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    purpose: TokenPurpose,
) -> Result<()> {
    let query = "DELETE FROM user_tokens WHERE user_id = $1 AND purpose = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(purpose.as_str())
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to invalidate tokens")?;
    Ok(())
}

/// Atomically consume a single-use token: the row is deleted and its owner
/// returned in one statement, so a token can never be redeemed twice.
pub(super) async fn consume_single_use_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    raw_token: &str,
    purpose: TokenPurpose,
) -> Result<Option<Uuid>> {
    let token_hash = hash_single_use_token(raw_token);

    let query = r"
        DELETE FROM user_tokens
        WHERE token_hash = $1
          AND purpose = $2
          AND expires_at > NOW()
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(&token_hash)
        .bind(purpose.as_str())
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to consume single-use token")?;

    Ok(row.map(|row| row.get("user_id")))
}

pub(super) async fn mark_verified(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET is_verified = TRUE,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to mark user verified")?;
    Ok(())
}

/// Replace the password hash and stamp `last_security_update` in the same
/// statement, so every refresh token issued before this moment dies with it.
pub(super) async fn update_password_hash(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET password_hash = $2,
            last_security_update = NOW(),
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to update password hash")?;
    Ok(())
}

/// Email and verification flag for a user id, used by resend.
pub(super) async fn lookup_verification_state(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<(String, bool)>> {
    let query = "SELECT email, is_verified FROM users WHERE id = $1";
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
        .context("failed to lookup verification state")?;

    Ok(row.map(|row| (row.get("email"), row.get("is_verified"))))
}

/// Email address for a user id.
pub(super) async fn lookup_email(pool: &PgPool, user_id: Uuid) -> Result<Option<String>> {
    let query = "SELECT email FROM users WHERE id = $1";
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
        .context("failed to lookup user email")?;

    Ok(row.map(|row| row.get("email")))
}

/// Role for a user id, used when issuing tokens outside of login.
pub(super) async fn lookup_role(pool: &PgPool, user_id: Uuid) -> Result<Option<String>> {
    let query = "SELECT role FROM users WHERE id = $1";
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
        .context("failed to lookup user role")?;

    Ok(row.map(|row| row.get("role")))
}

/// Current role and security stamp, checked on every refresh.
pub(super) async fn lookup_refresh_record(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<RefreshRecord>> {
    let query = "SELECT role, last_security_update FROM users WHERE id = $1";
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
        .context("failed to lookup refresh record")?;

    Ok(row.map(|row| RefreshRecord {
        role: row.get("role"),
        last_security_update: row.get("last_security_update"),
    }))
}

/// Queue a transactional email; the outbox worker picks it up out of band.
pub(crate) async fn enqueue_email(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    to_email: &str,
    template: &str,
    payload: &serde_json::Value,
) -> Result<()> {
    let payload_text = serde_json::to_string(payload).context("failed to serialize email payload")?;

    let query = r"
        INSERT INTO email_outbox (to_email, template, payload_json)
        VALUES ($1, $2, $3::jsonb)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(to_email)
        .bind(template)
        .bind(payload_text)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert email outbox row")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::state::test_support::auth_config;

    #[test]
    fn signup_outcome_debug_names() {
        assert_eq!(format!("{:?}", SignupOutcome::Created), "Created");
        assert_eq!(format!("{:?}", SignupOutcome::Conflict), "Conflict");
    }

    #[test]
    fn token_purpose_strings() {
        assert_eq!(
            TokenPurpose::EmailVerification.as_str(),
            "email_verification"
        );
        assert_eq!(TokenPurpose::PasswordReset.as_str(), "password_reset");
        assert_eq!(TokenPurpose::EmailVerification.template(), "verify_email");
        assert_eq!(TokenPurpose::PasswordReset.route(), "reset-password");
    }

    const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

    // Database-backed tests run only when VENDEJO_TEST_DSN points at a
    // Postgres instance. The schema is (re)applied on connect; every
    // statement is IF NOT EXISTS so this is idempotent.
    async fn test_pool() -> Option<PgPool> {
        let dsn = std::env::var("VENDEJO_TEST_DSN").ok()?;
        let pool = PgPool::connect(&dsn).await.ok()?;

        for statement in split_sql_statements(SCHEMA_SQL) {
            sqlx::query(&statement).execute(&pool).await.ok()?;
        }

        Some(pool)
    }

    fn split_sql_statements(sql: &str) -> Vec<String> {
        let mut statements = Vec::new();
        let mut current = String::new();

        for line in sql.lines() {
            current.push_str(line);
            current.push('\n');

            if line.trim().ends_with(';') {
                let statement = current.trim();
                if !statement.is_empty() {
                    statements.push(statement.to_string());
                }
                current.clear();
            }
        }

        let leftover = current.trim();
        if !leftover.is_empty() {
            statements.push(leftover.to_string());
        }

        statements
    }

    // Fresh email per call so reruns never hit the unique constraint.
    async fn insert_test_user(pool: &PgPool, prefix: &str) -> (Uuid, String) {
        let email = format!("{prefix}-{}@test.invalid", Uuid::new_v4());
        let id = sqlx::query(
            "INSERT INTO users (email, password_hash) VALUES ($1, 'x') RETURNING id",
        )
        .bind(&email)
        .fetch_one(pool)
        .await
        .unwrap()
        .get("id");
        (id, email)
    }

    #[tokio::test]
    async fn test_register_twice_is_conflict() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let config = auth_config();
        let email = format!("duplicate-{}@test.invalid", Uuid::new_v4());

        let first = register_user(&pool, &email, None, "hash", &config)
            .await
            .unwrap();
        let second = register_user(&pool, &email, Some("dup"), "hash", &config)
            .await
            .unwrap();

        assert!(matches!(first, SignupOutcome::Created));
        assert!(matches!(second, SignupOutcome::Conflict));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = $1")
            .bind(&email)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        sqlx::query("DELETE FROM users WHERE email = $1")
            .bind(&email)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM email_outbox WHERE to_email = $1")
            .bind(&email)
            .execute(&pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_consume_token_is_single_use() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let config = auth_config();
        let (user_id, email) = insert_test_user(&pool, "single-use").await;

        let mut tx = pool.begin().await.unwrap();
        let token = issue_single_use_token(
            &mut tx,
            user_id,
            &email,
            TokenPurpose::EmailVerification,
            &config,
        )
        .await
        .unwrap();

        let first = consume_single_use_token(&mut tx, &token, TokenPurpose::EmailVerification)
            .await
            .unwrap();
        let second = consume_single_use_token(&mut tx, &token, TokenPurpose::EmailVerification)
            .await
            .unwrap();

        assert_eq!(first, Some(user_id));
        assert_eq!(second, None);

        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_consume_rejects_wrong_purpose() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let config = auth_config();
        let (user_id, email) = insert_test_user(&pool, "purpose").await;

        let mut tx = pool.begin().await.unwrap();
        let token = issue_single_use_token(
            &mut tx,
            user_id,
            &email,
            TokenPurpose::EmailVerification,
            &config,
        )
        .await
        .unwrap();

        let as_reset = consume_single_use_token(&mut tx, &token, TokenPurpose::PasswordReset)
            .await
            .unwrap();

        assert_eq!(as_reset, None);

        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalidate_drops_outstanding_tokens() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let config = auth_config();
        let (user_id, email) = insert_test_user(&pool, "invalidate").await;

        let mut tx = pool.begin().await.unwrap();
        let old = issue_single_use_token(
            &mut tx,
            user_id,
            &email,
            TokenPurpose::EmailVerification,
            &config,
        )
        .await
        .unwrap();

        invalidate_tokens(&mut tx, user_id, TokenPurpose::EmailVerification)
            .await
            .unwrap();
        let fresh = issue_single_use_token(
            &mut tx,
            user_id,
            &email,
            TokenPurpose::EmailVerification,
            &config,
        )
        .await
        .unwrap();

        let stale = consume_single_use_token(&mut tx, &old, TokenPurpose::EmailVerification)
            .await
            .unwrap();
        let live = consume_single_use_token(&mut tx, &fresh, TokenPurpose::EmailVerification)
            .await
            .unwrap();

        assert_eq!(stale, None);
        assert_eq!(live, Some(user_id));

        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_password_update_stamps_security_state() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let (user_id, _email) = insert_test_user(&pool, "stamp").await;

        let before = lookup_refresh_record(&pool, user_id)
            .await
            .unwrap()
            .unwrap();

        let mut tx = pool.begin().await.unwrap();
        update_password_hash(&mut tx, user_id, "new-hash")
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let after = lookup_refresh_record(&pool, user_id)
            .await
            .unwrap()
            .unwrap();

        assert!(after.last_security_update > before.last_security_update);

        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&pool)
            .await
            .unwrap();
    }
}
