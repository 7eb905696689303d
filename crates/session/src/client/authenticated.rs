use super::{ApiRequest, ApiResponse};
use crate::config::ApiPaths;
use crate::error::{ClientError, SessionError};
use crate::session::SessionManager;
use crate::types::{Application, ApplicationSubmission, PasswordChange};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Client for protected endpoints.
///
/// Every call first makes sure the access token is fresh, then sends it as a
/// bearer token. A 401 triggers one forced refresh and one replay; the
/// replay's failure is never retried and the original error is returned.
#[derive(Clone)]
pub struct AuthenticatedClient {
    session: SessionManager,
}

impl AuthenticatedClient {
    pub fn new(session: SessionManager) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Send a request with the session's bearer token.
    pub async fn call(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        self.session.ensure_fresh().await?;

        let sent = self.access_token()?;
        let original = match self.dispatch(&request, &sent).await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_auth_failure() => e,
            Err(e) => return Err(e),
        };

        match self.session.credential() {
            // Another caller already replaced the refused token.
            Some(current) if current.access_token != sent => {
                debug!(path = %request.path(), "Access token rotated meanwhile; replaying");
            }
            _ => {
                debug!(path = %request.path(), "Access token refused; refreshing before retry");
                match self.session.refresh().await {
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => {
                        warn!(error = %e, "Refresh after 401 failed");
                        return Err(original);
                    }
                }
            }
        }

        let replacement = self.access_token()?;
        match self.dispatch(&request, &replacement).await {
            Ok(response) => Ok(response),
            Err(e) => {
                debug!(error = %e, "Retry after refresh failed");
                Err(original)
            }
        }
    }

    /// Send a request and deserialize the response body
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<T, ClientError> {
        self.call(request).await?.json()
    }

    /// Applications submitted by the signed-in user
    pub async fn list_applications(&self) -> Result<Vec<Application>, ClientError> {
        self.call_json(ApiRequest::get(ApiPaths::USER_APPLICATIONS)).await
    }

    /// Change the account password
    pub async fn change_password(&self, change: &PasswordChange) -> Result<(), ClientError> {
        self.call(ApiRequest::put(ApiPaths::CHANGE_PASSWORD).json(change)?).await?;
        info!("Password changed");
        Ok(())
    }

    /// Submit a job application; returns whatever the server echoes back
    pub async fn submit_application(
        &self,
        submission: &ApplicationSubmission,
    ) -> Result<Value, ClientError> {
        let response = self
            .call(ApiRequest::post(ApiPaths::APPLY).json(submission)?)
            .await?;
        if response.body.trim().is_empty() {
            Ok(Value::Null)
        } else {
            response.json()
        }
    }

    // Read at send time so a replay picks up the rotated token.
    fn access_token(&self) -> Result<String, ClientError> {
        let credential = self
            .session
            .credential()
            .ok_or(SessionError::Unauthenticated)?;
        Ok(credential.access_token)
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        access_token: &str,
    ) -> Result<ApiResponse, ClientError> {
        self.session.api().send(request, Some(access_token)).await
    }
}
