//! HTTP client for the remote authentication endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::AuthError;

/// Wire response of `POST /api/authenticate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    /// Endpoint-level accept/reject flag; login succeeds iff this is true.
    pub status: bool,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub refresh_token: Option<String>,

    #[serde(default)]
    pub login_count: u64,
}

/// Wire response of `POST /api/generateAccessToken`.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    token: String,
}

/// Seam over the token-issuance endpoint.
///
/// The session manager only ever talks to this trait, which keeps the
/// state machine testable without a live endpoint.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// `POST /api/authenticate` with the user's credentials.
    async fn authenticate(&self, email: &str, password: &str) -> Result<LoginResponse, AuthError>;

    /// `POST /api/generateAccessToken`, minting a new access token.
    async fn generate_access_token(&self, refresh_token: &str) -> Result<String, AuthError>;
}

/// Production implementation backed by `reqwest`.
pub struct HttpAuthClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpAuthClient {
    /// Creates a client against `base_url` using the given HTTP client.
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }
}

#[async_trait]
impl AuthApi for HttpAuthClient {
    async fn authenticate(&self, email: &str, password: &str) -> Result<LoginResponse, AuthError> {
        let url = format!("{}/api/authenticate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|err| AuthError::Network(err.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(AuthError::InvalidCredentials);
        }
        if !status.is_success() {
            return Err(AuthError::Network(format!(
                "auth endpoint returned HTTP {status}"
            )));
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|err| AuthError::Network(err.to_string()))?;
        if !body.status {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(body)
    }

    async fn generate_access_token(&self, refresh_token: &str) -> Result<String, AuthError> {
        let url = format!("{}/api/generateAccessToken", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "refreshToken": refresh_token }))
            .send()
            .await
            .map_err(|err| AuthError::Network(err.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::RefreshRejected);
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|err| AuthError::Network(err.to_string()))?;
        Ok(body.token)
    }
}
