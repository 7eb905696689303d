//! Session data model and API payloads

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum length accepted for a new password
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Display attributes cached next to the credential.
///
/// The cache may go stale after a profile edit; that never affects whether
/// the session is valid.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
}

impl UserProfile {
    /// Name shown in the header menu, falling back to the email.
    pub fn display_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if name.is_empty() {
            self.email.clone().unwrap_or_default()
        } else {
            name
        }
    }
}

/// The current session's tokens plus the cached profile.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserProfile,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        user: UserProfile,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            user,
        }
    }

    /// Builds the replacement credential after a successful refresh. The
    /// refresh token is only replaced when the server rotated it.
    pub fn rotated(&self, access_token: String, refresh_token: Option<String>) -> Self {
        Self {
            access_token,
            refresh_token: refresh_token.unwrap_or_else(|| self.refresh_token.clone()),
            user: self.user.clone(),
        }
    }
}

// Token material must never reach the logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

impl From<LoginResponse> for Credential {
    fn from(response: LoginResponse) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            user: response.user,
        }
    }
}

/// Login request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Login response body
#[derive(Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub user: UserProfile,
}

/// Refresh request body
#[derive(Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

/// Refresh response body. `refresh` is present when the server rotates
/// refresh tokens.
#[derive(Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Company reference embedded in an application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub name: String,
}

/// A submitted job application and its status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub company: Company,
    #[serde(default)]
    pub job_level: Option<String>,
    pub status: String,
    pub date_applied: String,
}

/// Body of `POST /apply/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSubmission {
    pub company_id: i64,
    pub age: String,
    pub birthdate: String,
    pub full_current_location: String,
    pub job_level: String,
}

/// A locally validated password change
#[derive(Clone, Serialize)]
pub struct PasswordChange {
    current_password: String,
    new_password: String,
}

impl PasswordChange {
    /// Validates the three form fields before anything is sent.
    pub fn new(current: &str, new: &str, confirm: &str) -> Result<Self, ValidationError> {
        if current.is_empty() || new.is_empty() || confirm.is_empty() {
            return Err(ValidationError::MissingPasswordFields);
        }
        if new != confirm {
            return Err(ValidationError::PasswordMismatch);
        }
        if new.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(ValidationError::PasswordTooShort {
                min: MIN_PASSWORD_LENGTH,
            });
        }

        Ok(Self {
            current_password: current.to_string(),
            new_password: new.to_string(),
        })
    }
}
