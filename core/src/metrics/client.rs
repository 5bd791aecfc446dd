//! HTTP client for the remote data-query endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use super::filter::FilterSpec;
use super::RawRecord;

/// Failures from the data endpoint. The caller leaves its dataset
/// unchanged on either variant.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("query endpoint returned HTTP {0}")]
    Status(u16),
}

/// Per-user spend reported alongside the record list.
#[derive(Debug, Clone, Deserialize)]
pub struct UserExpense {
    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub expense: f64,
}

/// Wire response of the data-query endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub status_code: u16,

    #[serde(default)]
    pub count: u64,

    #[serde(default)]
    pub build_space: Vec<RawRecord>,

    #[serde(default)]
    pub user_expense: Vec<UserExpense>,
}

/// Seam over the data-query endpoint.
#[async_trait]
pub trait QueryApi: Send + Sync {
    /// Fetches the record collection constrained by `filter`.
    async fn fetch(
        &self,
        filter: &FilterSpec,
        access_token: &str,
    ) -> Result<QueryResponse, QueryError>;
}

/// Production implementation backed by `reqwest`.
pub struct HttpQueryClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpQueryClient {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }
}

#[async_trait]
impl QueryApi for HttpQueryClient {
    async fn fetch(
        &self,
        filter: &FilterSpec,
        access_token: &str,
    ) -> Result<QueryResponse, QueryError> {
        let url = format!("{}/api/buildSpace", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .query(&filter.query_params())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(QueryError::Status(status.as_u16()));
        }

        Ok(response.json().await?)
    }
}
