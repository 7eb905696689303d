//! Error types for the session core and the HTTP boundary
//!
//! Everything the remote API can say about a failure is normalized here, in
//! [`ClientError::from_status`], before any other component sees it.

use serde_json::Value;
use thiserror::Error;

/// Outcomes of the session lifecycle that callers must handle distinctly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The stored access token is structurally malformed
    #[error("Invalid access token: {0}")]
    Decode(String),

    /// Transport failure while talking to the API
    #[error("Network error: {0}")]
    Network(String),

    /// The refresh token was explicitly rejected by the server
    #[error("Session rejected: {0}")]
    AuthRejected(String),

    /// No credential is stored
    #[error("Not signed in")]
    Unauthenticated,
}

impl SessionError {
    /// Fatal errors clear the stored credential and force a login.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Network(_))
    }
}

/// Local form input problems. These stay in the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("All password fields must be filled to change your password.")]
    MissingPasswordFields,

    #[error("New password and confirm password do not match.")]
    PasswordMismatch,

    #[error("New password must be at least {min} characters long.")]
    PasswordTooShort { min: usize },
}

/// Persistence backend failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage IO failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage document is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Client error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Network or transport error
    #[error("Request failed: {0}")]
    Network(String),

    /// Server returned an error status
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The session could not supply a usable access token
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The credential could not be persisted locally
    #[error("Failed to save session: {0}")]
    Storage(String),
}

impl ClientError {
    /// Create error from an HTTP status code and the raw response body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = error_message(body).unwrap_or_else(|| default_message(status));
        match status {
            400 => Self::BadRequest(message),
            401 => Self::AuthenticationFailed(message),
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            _ => Self::ServerError { status, message },
        }
    }

    /// True when the server rejected the bearer credential.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed(_))
    }

    /// True when the request never produced a usable server verdict.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Serialization(_) | Self::Configuration(_)
        )
    }

    /// Maps a failed refresh exchange onto the session taxonomy.
    pub fn into_refresh_error(self) -> SessionError {
        match self {
            Self::Session(err) => err,
            err if err.is_transport() => SessionError::Network(err.to_string()),
            err => SessionError::AuthRejected(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Serialization(err.to_string())
        } else if err.is_builder() {
            Self::Configuration(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<StorageError> for ClientError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Pulls a human readable message out of `{error}`, `{detail}` or
/// `{message}` bodies, falling back to the body text itself.
fn error_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => {
            let field = ["error", "detail", "message"]
                .iter()
                .find_map(|key| map.get(*key))
                .map(value_text);
            Some(field.unwrap_or_else(|| Value::Object(map).to_string()))
        }
        Ok(Value::String(text)) => Some(text),
        Ok(other) => Some(other.to_string()),
        Err(_) => Some(body.to_string()),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn default_message(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .map_or_else(|| format!("HTTP {status}"), str::to_string)
}
