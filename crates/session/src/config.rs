//! Session configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session and API client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL of the remote API, without trailing slash
    pub api_base_url: String,

    /// Seconds between session checks while a protected view is mounted
    pub poll_interval_secs: u64,

    /// Request timeout in seconds (0 disables it; ignored in the browser)
    pub request_timeout_secs: u64,

    /// Route unauthenticated visitors are sent to
    pub login_route: String,

    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000/api".to_string(),
            poll_interval_secs: 30,
            request_timeout_secs: 30,
            login_route: "/login".to_string(),
            user_agent: concat!("jobtrack-session/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl SessionConfig {
    /// Polling interval, never shorter than one second
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Request timeout, if any
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

/// API endpoint paths, relative to [`SessionConfig::api_base_url`]
pub struct ApiPaths;

impl ApiPaths {
    pub const LOGIN: &'static str = "/login/";
    pub const TOKEN_REFRESH: &'static str = "/token/refresh/";
    pub const USER_APPLICATIONS: &'static str = "/user-applications/";
    pub const CHANGE_PASSWORD: &'static str = "/change-password/";
    pub const APPLY: &'static str = "/apply/";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.login_route, "/login");
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"poll_interval_secs": 0, "request_timeout_secs": 0}"#)
                .unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.api_base_url, "http://127.0.0.1:8000/api");
    }
}
