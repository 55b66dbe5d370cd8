//! Request and response bodies for the auth flows.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct Register {
    pub email: String,
    pub password: String,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct Login {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdatePassword {
    pub email: String,
    #[serde(rename = "oldPassword")]
    pub old_password: String,
    #[serde(rename = "newPassword")]
    pub new_password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ForgetPassword {
    pub email: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResetPassword {
    pub token: String,
    #[serde(rename = "newPassword")]
    pub new_password: String,
    #[serde(rename = "newPasswordConfirm")]
    pub new_password_confirm: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct Refresh {
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Message {
    pub message: String,
}

impl Message {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_password_field_names() {
        let body: UpdatePassword = serde_json::from_str(
            r#"{"email":"a@b.co","oldPassword":"old123","newPassword":"new123"}"#,
        )
        .unwrap();

        assert_eq!(body.old_password, "old123");
        assert_eq!(body.new_password, "new123");
    }

    #[test]
    fn test_reset_password_field_names() {
        let body: ResetPassword = serde_json::from_str(
            r#"{"token":"t","newPassword":"new123","newPasswordConfirm":"new123"}"#,
        )
        .unwrap();

        assert_eq!(body.new_password, body.new_password_confirm);
    }

    #[test]
    fn test_register_username_is_optional() {
        let body: Register =
            serde_json::from_str(r#"{"email":"a@b.co","password":"secret"}"#).unwrap();

        assert!(body.username.is_none());
    }
}
