use crate::api;
use crate::cli::actions::Action;
use anyhow::Result;
use secrecy::SecretString;

/// Everything the server needs, assembled from CLI matches.
#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub base_url: String,
    pub access_secret: SecretString,
    pub refresh_secret: SecretString,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    pub token_ttl_seconds: i64,
    pub uploads_dir: String,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<SecretString>,
    pub email_from: String,
}

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server(args) => api::new(*args).await,
    }
}
