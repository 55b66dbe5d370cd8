//! JWT access and refresh tokens.
//!
//! Both token kinds are HS256 and carry the same claim shape; the `kind`
//! claim plus a per-kind secret keeps one from being replayed as the other.

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::AuthConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: String,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TokenError {
    Expired,
    Invalid,
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct TokenPair {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

fn secret_for(config: &AuthConfig, kind: TokenKind) -> &[u8] {
    match kind {
        TokenKind::Access => config.access_secret().expose_secret().as_bytes(),
        TokenKind::Refresh => config.refresh_secret().expose_secret().as_bytes(),
    }
}

fn ttl_for(config: &AuthConfig, kind: TokenKind) -> i64 {
    match kind {
        TokenKind::Access => config.access_ttl_seconds(),
        TokenKind::Refresh => config.refresh_ttl_seconds(),
    }
}

/// Issue one token of the given kind for the user.
pub fn issue_token(
    config: &AuthConfig,
    kind: TokenKind,
    user_id: Uuid,
    role: &str,
) -> Result<String, TokenError> {
    let now = Utc::now().timestamp();

    let claims = Claims {
        sub: user_id,
        role: role.to_string(),
        kind,
        iat: now,
        exp: now + ttl_for(config, kind),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret_for(config, kind)),
    )
    .map_err(|_| TokenError::Invalid)
}

/// Issue the access + refresh pair returned by login, verify and reset.
pub fn issue_token_pair(
    config: &AuthConfig,
    user_id: Uuid,
    role: &str,
) -> Result<TokenPair, TokenError> {
    Ok(TokenPair {
        access_token: issue_token(config, TokenKind::Access, user_id, role)?,
        refresh_token: issue_token(config, TokenKind::Refresh, user_id, role)?,
    })
}

/// Verify signature, expiry and kind, returning the claims.
pub fn verify_token(config: &AuthConfig, kind: TokenKind, token: &str) -> Result<Claims, TokenError> {
    let mut validation = Validation::default();
    validation.leeway = 0;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret_for(config, kind)),
        &validation,
    )
    .map_err(|err| match err.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Invalid,
    })?;

    if data.claims.kind != kind {
        return Err(TokenError::Invalid);
    }

    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::state::test_support::auth_config;

    #[test]
    fn test_issue_and_verify_round_trip() {
        let config = auth_config();
        let user_id = Uuid::new_v4();

        let token = issue_token(&config, TokenKind::Access, user_id, "user").unwrap();
        let claims = verify_token(&config, TokenKind::Access, &token).unwrap();

        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, "user");
        assert_eq!(claims.kind, TokenKind::Access);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let config = auth_config();
        let user_id = Uuid::new_v4();

        let access = issue_token(&config, TokenKind::Access, user_id, "user").unwrap();
        let refresh = issue_token(&config, TokenKind::Refresh, user_id, "user").unwrap();

        assert_eq!(
            verify_token(&config, TokenKind::Refresh, &access),
            Err(TokenError::Invalid)
        );
        assert_eq!(
            verify_token(&config, TokenKind::Access, &refresh),
            Err(TokenError::Invalid)
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let config = auth_config();
        let other = auth_config_with_secrets("another-access", "another-refresh");

        let token = issue_token(&config, TokenKind::Access, Uuid::new_v4(), "user").unwrap();

        assert_eq!(
            verify_token(&other, TokenKind::Access, &token),
            Err(TokenError::Invalid)
        );
    }

    #[test]
    fn test_expired_token_rejected() {
        let config = auth_config().with_access_ttl_seconds(-120);

        let token = issue_token(&config, TokenKind::Access, Uuid::new_v4(), "user").unwrap();

        assert_eq!(
            verify_token(&config, TokenKind::Access, &token),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_garbage_token_rejected() {
        let config = auth_config();

        assert_eq!(
            verify_token(&config, TokenKind::Access, "not-a-jwt"),
            Err(TokenError::Invalid)
        );
    }

    #[test]
    fn test_pair_carries_both_kinds() {
        let config = auth_config();
        let user_id = Uuid::new_v4();

        let pair = issue_token_pair(&config, user_id, "admin").unwrap();

        let access = verify_token(&config, TokenKind::Access, &pair.access_token).unwrap();
        let refresh = verify_token(&config, TokenKind::Refresh, &pair.refresh_token).unwrap();

        assert_eq!(access.role, "admin");
        assert_eq!(refresh.sub, user_id);
    }

    fn auth_config_with_secrets(access: &str, refresh: &str) -> AuthConfig {
        use secrecy::SecretString;

        AuthConfig::new(
            "http://localhost:8080".to_string(),
            SecretString::from(access.to_string()),
            SecretString::from(refresh.to_string()),
        )
    }
}
