//! Jobtrack API client
//!
//! [`ApiClient`] talks to the public endpoints (login, token refresh) and is
//! the transport underneath [`AuthenticatedClient`], which adds the bearer
//! token and the refresh-and-retry policy for protected endpoints.

mod authenticated;

pub use authenticated::AuthenticatedClient;
pub use reqwest::Method;

use crate::config::{ApiPaths, SessionConfig};
use crate::error::ClientError;
use crate::types::{LoginRequest, LoginResponse, RefreshRequest, RefreshResponse};
use reqwest::{Client, ClientBuilder, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// A request that can be replayed, so a retry can carry a different token.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ClientError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Append a query parameter
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// A successful (2xx) response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    /// Deserialize the body
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Client for the Jobtrack API
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new client with default configuration
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::builder().base_url(base_url).build()
    }

    /// Create a client from the session configuration
    pub fn from_config(config: &SessionConfig) -> Result<Self, ClientError> {
        let mut builder = Self::builder()
            .base_url(&config.api_base_url)
            .user_agent(&config.user_agent);
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        builder.build()
    }

    /// Create a new client builder
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request, optionally with a bearer token, and normalize
    /// non-2xx responses into [`ClientError`].
    pub async fn send(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.client.request(request.method.clone(), url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        debug!(method = %request.method, path = %request.path, status = status.as_u16(), "API response");

        if status.is_success() {
            Ok(ApiResponse {
                status: status.as_u16(),
                body: response.text().await?,
            })
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::from_status(status.as_u16(), &body))
        }
    }

    /// Send a request and deserialize the response body
    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<T, ClientError> {
        self.send(request, bearer).await?.json()
    }

    /// Exchange email and password for a fresh credential
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ClientError> {
        let request = ApiRequest::post(ApiPaths::LOGIN).json(&LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        })?;
        self.execute(&request, None).await
    }

    /// Exchange a refresh token for a new access token
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshResponse, ClientError> {
        let request = ApiRequest::post(ApiPaths::TOKEN_REFRESH).json(&RefreshRequest {
            refresh: refresh_token.to_string(),
        })?;
        self.execute(&request, None).await
    }
}

/// Builder for [`ApiClient`]
#[derive(Default)]
pub struct ApiClientBuilder {
    base_url: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl ApiClientBuilder {
    /// Set the base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the client
    pub fn build(self) -> Result<ApiClient, ClientError> {
        let base_url = self
            .base_url
            .ok_or_else(|| ClientError::Configuration("base_url is required".into()))?;

        // Ensure base_url ends without a trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ClientError::Configuration("base_url is empty".into()));
        }

        let mut client_builder = ClientBuilder::new();

        #[cfg(not(target_arch = "wasm32"))]
        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        #[cfg(target_arch = "wasm32")]
        let _ = self.timeout; // Timeouts not supported on WASM

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| concat!("jobtrack-session/", env!("CARGO_PKG_VERSION")).into());
        client_builder = client_builder.user_agent(user_agent);

        let client = client_builder.build()?;

        Ok(ApiClient { client, base_url })
    }
}
