//! Transactional email delivery.
//!
//! Handlers never talk to SMTP directly; they enqueue a row in
//! `email_outbox` inside their own transaction and the worker spawned here
//! drains pending rows with `FOR UPDATE SKIP LOCKED`, so multiple instances
//! can run side by side without double-sending.

use anyhow::{anyhow, Context, Result};
use lettre::{
    message::header::ContentType,
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload_json: String,
}

/// A rendered email, ready for whatever transport is configured.
struct RenderedEmail {
    subject: String,
    body: String,
}

pub trait EmailSender: Send + Sync {
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Development sender, logs instead of delivering.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        let rendered = render(message)?;
        info!(
            to_email = %message.to_email,
            template = %message.template,
            subject = %rendered.subject,
            "email outbox send stub"
        );
        Ok(())
    }
}

/// SMTP sender used when the server is started with SMTP settings.
pub struct SmtpEmailSender {
    transport: SmtpTransport,
    from: String,
}

impl SmtpEmailSender {
    pub fn new(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&SecretString>,
        from: String,
    ) -> Result<Self> {
        let mut builder = SmtpTransport::relay(host)
            .context("failed to configure SMTP relay")?
            .port(port);

        if let (Some(username), Some(password)) = (username, password) {
            builder = builder.credentials(Credentials::new(
                username.to_string(),
                password.expose_secret().to_string(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

impl EmailSender for SmtpEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        let rendered = render(message)?;

        let email = Message::builder()
            .from(self.from.parse().context("invalid from address")?)
            .to(message
                .to_email
                .parse()
                .context("invalid recipient address")?)
            .subject(rendered.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(rendered.body)
            .context("failed to build email")?;

        self.transport.send(&email).context("failed to send email")?;

        Ok(())
    }
}

/// Turn an outbox row into subject and body.
fn render(message: &EmailMessage) -> Result<RenderedEmail> {
    let payload: serde_json::Value = serde_json::from_str(&message.payload_json)
        .context("invalid email payload json")?;
    let link = payload.get("link").and_then(|v| v.as_str()).unwrap_or("");

    let rendered = match message.template.as_str() {
        "verify_email" => RenderedEmail {
            subject: "Verify your email".to_string(),
            body: format!(
                "Welcome!\n\nPlease confirm your email address by opening this link:\n\n{link}\n\nThe link expires shortly and can only be used once."
            ),
        },
        "reset_password" => RenderedEmail {
            subject: "Reset your password".to_string(),
            body: format!(
                "A password reset was requested for your account.\n\nOpen this link to choose a new password:\n\n{link}\n\nIf you did not ask for this, you can ignore this email."
            ),
        },
        "login_notification" => RenderedEmail {
            subject: "New sign-in to your account".to_string(),
            body: "Your account was just signed in to. If this was not you, please reset your password.".to_string(),
        },
        "password_changed" => RenderedEmail {
            subject: "Your password was changed".to_string(),
            body: "Your password was just changed. All other sessions have been signed out.\n\nIf this was not you, please reset your password immediately.".to_string(),
        },
        other => return Err(anyhow!("unknown email template: {other}")),
    };

    Ok(rendered)
}

#[derive(Clone, Copy, Debug)]
pub struct EmailWorkerConfig {
    poll_interval: Duration,
    batch_size: usize,
}

impl EmailWorkerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch_size: 10,
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl Default for EmailWorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub fn spawn_outbox_worker(
    pool: PgPool,
    sender: Arc<dyn EmailSender>,
    config: EmailWorkerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut poll_interval = config.poll_interval();
        if poll_interval.is_zero() {
            poll_interval = Duration::from_secs(1);
        }

        loop {
            let batch_result = process_outbox_batch(&pool, &sender, config.batch_size()).await;
            if let Err(err) = batch_result {
                error!("email outbox batch failed: {err}");
            }

            sleep(poll_interval).await;
        }
    })
}

async fn process_outbox_batch(
    pool: &PgPool,
    sender: &Arc<dyn EmailSender>,
    batch_size: usize,
) -> Result<usize> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start email outbox transaction")?;

    let query = r"
        SELECT id, to_email, template, payload_json::text AS payload_json
        FROM email_outbox
        WHERE status = 'pending'
        ORDER BY created_at ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(i64::try_from(batch_size).unwrap_or(0))
        .fetch_all(&mut *tx)
        .instrument(span)
        .await
        .context("failed to load email outbox batch")?;

    if rows.is_empty() {
        tx.commit()
            .await
            .context("failed to commit empty outbox batch")?;
        return Ok(0);
    }

    let row_count = rows.len();
    for row in rows {
        let id: Uuid = row.get("id");
        let message = EmailMessage {
            to_email: row.get("to_email"),
            template: row.get("template"),
            payload_json: row.get("payload_json"),
        };

        // SMTP delivery blocks on the network; keep it off the async worker
        // thread while the batch transaction is open.
        let task_sender = Arc::clone(sender);
        let send_result = tokio::task::spawn_blocking(move || task_sender.send(&message))
            .await
            .context("email send task panicked")?;
        update_outbox_status(&mut tx, id, send_result).await?;
    }

    tx.commit()
        .await
        .context("failed to commit email outbox batch")?;

    Ok(row_count)
}

async fn update_outbox_status(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    send_result: Result<()>,
) -> Result<()> {
    match send_result {
        Ok(()) => {
            let query = r"
                UPDATE email_outbox
                SET status = 'sent',
                    attempts = attempts + 1,
                    last_error = NULL,
                    sent_at = NOW()
                WHERE id = $1
            ";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(id)
                .execute(&mut **tx)
                .instrument(span)
                .await
                .context("failed to update outbox status to sent")?;
        }
        Err(err) => {
            let query = r"
                UPDATE email_outbox
                SET status = 'failed',
                    attempts = attempts + 1,
                    last_error = $2
                WHERE id = $1
            ";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(id)
                .bind(err.to_string())
                .execute(&mut **tx)
                .instrument(span)
                .await
                .context("failed to update outbox status to failed")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(template: &str, payload: &str) -> EmailMessage {
        EmailMessage {
            to_email: "ana@example.com".to_string(),
            template: template.to_string(),
            payload_json: payload.to_string(),
        }
    }

    #[test]
    fn test_render_verify_email_includes_link() {
        let rendered = render(&message(
            "verify_email",
            r#"{"email":"ana@example.com","link":"http://localhost/api/auth/verify-email?token=abc"}"#,
        ))
        .unwrap();

        assert_eq!(rendered.subject, "Verify your email");
        assert!(rendered.body.contains("verify-email?token=abc"));
    }

    #[test]
    fn test_render_reset_password_includes_link() {
        let rendered = render(&message(
            "reset_password",
            r#"{"email":"ana@example.com","link":"http://localhost/api/auth/reset-password?token=xyz"}"#,
        ))
        .unwrap();

        assert!(rendered.body.contains("reset-password?token=xyz"));
    }

    #[test]
    fn test_render_notifications_need_no_link() {
        assert!(render(&message("login_notification", r#"{"email":"a@b.co"}"#)).is_ok());
        assert!(render(&message("password_changed", r#"{"email":"a@b.co"}"#)).is_ok());
    }

    #[test]
    fn test_render_rejects_unknown_template() {
        assert!(render(&message("welcome", "{}")).is_err());
    }

    #[test]
    fn test_render_rejects_bad_payload() {
        assert!(render(&message("verify_email", "not-json")).is_err());
    }

    #[test]
    fn test_log_sender_accepts_known_templates() {
        let sender = LogEmailSender;

        assert!(sender
            .send(&message("verify_email", r#"{"link":"http://x"}"#))
            .is_ok());
        assert!(sender.send(&message("bogus", "{}")).is_err());
    }

    const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

    // Runs only when VENDEJO_TEST_DSN points at a Postgres instance.
    async fn test_pool() -> Option<PgPool> {
        let dsn = std::env::var("VENDEJO_TEST_DSN").ok()?;
        let pool = PgPool::connect(&dsn).await.ok()?;

        let mut statement = String::new();
        for line in SCHEMA_SQL.lines() {
            statement.push_str(line);
            statement.push('\n');
            if line.trim().ends_with(';') {
                sqlx::query(statement.trim()).execute(&pool).await.ok()?;
                statement.clear();
            }
        }

        Some(pool)
    }

    #[tokio::test]
    async fn test_outbox_batch_marks_rows_sent() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let to_email = format!("outbox-{}@test.invalid", Uuid::new_v4());

        sqlx::query(
            "INSERT INTO email_outbox (to_email, template, payload_json) \
             VALUES ($1, 'login_notification', $2::jsonb)",
        )
        .bind(&to_email)
        .bind(format!(r#"{{"email":"{to_email}"}}"#))
        .execute(&pool)
        .await
        .unwrap();

        let sender: Arc<dyn EmailSender> = Arc::new(LogEmailSender);
        let processed = process_outbox_batch(&pool, &sender, 50).await.unwrap();
        assert!(processed >= 1);

        let row = sqlx::query("SELECT status, attempts FROM email_outbox WHERE to_email = $1")
            .bind(&to_email)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("status"), "sent");
        assert_eq!(row.get::<i32, _>("attempts"), 1);

        sqlx::query("DELETE FROM email_outbox WHERE to_email = $1")
            .bind(&to_email)
            .execute(&pool)
            .await
            .unwrap();
    }
}
