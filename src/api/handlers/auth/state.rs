//! Shared auth configuration carried as an `Extension`.

use secrecy::SecretString;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    base_url: String,
    access_secret: SecretString,
    refresh_secret: SecretString,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    token_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(base_url: String, access_secret: SecretString, refresh_secret: SecretString) -> Self {
        Self {
            base_url,
            access_secret,
            refresh_secret,
            access_ttl_seconds: 900,
            refresh_ttl_seconds: 604_800,
            token_ttl_seconds: 600,
        }
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn access_secret(&self) -> &SecretString {
        &self.access_secret
    }

    #[must_use]
    pub fn refresh_secret(&self) -> &SecretString {
        &self.refresh_secret
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    #[must_use]
    pub fn token_ttl_seconds(&self) -> i64 {
        self.token_ttl_seconds
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::AuthConfig;
    use secrecy::SecretString;

    pub(crate) fn auth_config() -> AuthConfig {
        AuthConfig::new(
            "http://localhost:8080".to_string(),
            SecretString::from("access-secret".to_string()),
            SecretString::from("refresh-secret".to_string()),
        )
        .with_access_ttl_seconds(300)
        .with_refresh_ttl_seconds(3600)
        .with_token_ttl_seconds(60)
    }
}
