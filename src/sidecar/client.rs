//! Client side of the job service API, as seen by the polling engine.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};

use crate::error::ClientError;
use crate::job::JobStatus;
use crate::protocol::{ErrorBody, JobStatusResponse, ListJobsResponse};

/// Where the polling engine discovers jobs and fetches their status.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Every job id the registry currently knows about.
    async fn list_jobs(&self) -> Result<Vec<String>, ClientError>;

    /// Current status of one job.
    async fn get_job_status(&self, job_id: &str) -> Result<JobStatus, ClientError>;
}

/// [`JobSource`] backed by the job service's HTTP API.
pub struct HttpJobSource {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
}

impl HttpJobSource {
    /// Create a client for the service at `target`.
    ///
    /// `target` may be a bare `host:port`, in which case `http://` is assumed.
    pub fn new(target: &str, api_key: Option<SecretString>) -> Result<Self, ClientError> {
        let raw = if target.contains("://") {
            target.to_string()
        } else {
            format!("http://{}", target)
        };
        let base_url = Url::parse(&raw).map_err(|e| ClientError::RequestFailed {
            url: raw.clone(),
            reason: format!("invalid target URL: {}", e),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::RequestFailed {
                url: raw,
                reason: "target URL cannot be a base".to_string(),
            });
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ClientError::RequestFailed {
                url: raw,
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.filter(|k| !k.expose_secret().trim().is_empty()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, ClientError> {
        let mut request = self.client.get(url.clone());
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }
        request.send().await.map_err(|e| ClientError::RequestFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    async fn error_for(url: &Url, response: reqwest::Response) -> ClientError {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return ClientError::Unauthorized;
        }
        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error)
            .unwrap_or(text);
        ClientError::UnexpectedStatus {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        url: &Url,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::InvalidResponse {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl JobSource for HttpJobSource {
    async fn list_jobs(&self) -> Result<Vec<String>, ClientError> {
        let url = self.url(&["jobs"]);
        let response = self.get(url.clone()).await?;
        if !response.status().is_success() {
            return Err(Self::error_for(&url, response).await);
        }
        let body: ListJobsResponse = Self::decode(&url, response).await?;
        Ok(body.job_ids)
    }

    async fn get_job_status(&self, job_id: &str) -> Result<JobStatus, ClientError> {
        let url = self.url(&["jobs", job_id]);
        let response = self.get(url.clone()).await?;
        match response.status() {
            s if s.is_success() => {
                let body: JobStatusResponse = Self::decode(&url, response).await?;
                Ok(body.status)
            }
            StatusCode::NOT_FOUND => Err(ClientError::JobNotFound {
                job_id: job_id.to_string(),
            }),
            _ => Err(Self::error_for(&url, response).await),
        }
    }
}
