//! HTTP implementation of [`FleetClient`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{FleetError, FleetResult};
use crate::types::{ContainerStatus, CreateContainerRequest};
use crate::FleetClient;

/// Connection settings for the fleet API.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FleetConfig {
    /// Base URL, e.g. `https://fleet.internal:8080`.
    pub base_url: String,
    /// Shared bearer secret.
    pub secret: String,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            secret: String::new(),
            timeout_secs: 10,
        }
    }
}

/// Fleet client speaking JSON over HTTP with a bearer secret.
#[derive(Debug, Clone)]
pub struct HttpFleetClient {
    client: Client,
    base_url: String,
    secret: String,
}

impl HttpFleetClient {
    /// Build a client from configuration.
    pub fn new(config: &FleetConfig) -> FleetResult<Self> {
        Self::with_timeout(
            &config.base_url,
            &config.secret,
            Duration::from_secs(config.timeout_secs.max(1)),
        )
    }

    /// Build a client with an explicit timeout.
    pub fn with_timeout(base_url: &str, secret: &str, timeout: Duration) -> FleetResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| FleetError::ServiceUnavailable(format!("failed to build client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.secret)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> FleetResult<reqwest::Response> {
        let response = request
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FleetError::Unauthorized(text),
            StatusCode::NOT_FOUND => FleetError::NotFound(text),
            _ => FleetError::ServiceUnavailable(format!("fleet returned {status}: {text}")),
        })
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> FleetResult<T> {
        response
            .json()
            .await
            .map_err(|e| FleetError::InvalidResponse(e.to_string()))
    }
}

fn transport_error(e: reqwest::Error) -> FleetError {
    if e.is_timeout() {
        FleetError::ServiceUnavailable(format!("request timed out: {e}"))
    } else {
        FleetError::ServiceUnavailable(e.to_string())
    }
}

#[async_trait]
impl FleetClient for HttpFleetClient {
    async fn list_all(&self) -> FleetResult<Vec<ContainerStatus>> {
        let response = self.send(self.client.get(self.url("containers"))).await?;
        let raw: Vec<serde_json::Value> = Self::decode(response).await?;

        let total = raw.len();
        let containers: Vec<ContainerStatus> = raw
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(container) => Some(container),
                Err(e) => {
                    warn!(error = %e, "skipping undecodable container entry");
                    None
                }
            })
            .collect();
        debug!(total, decoded = containers.len(), "fleet snapshot fetched");
        Ok(containers)
    }

    async fn create(&self, request: &CreateContainerRequest) -> FleetResult<ContainerStatus> {
        let response = self
            .send(self.client.post(self.url("containers")).json(request))
            .await?;
        let status: ContainerStatus = Self::decode(response).await?;
        debug!(uuid = ?status.uuid, space = %request.space_id, mode = %request.space_mode, "container created");
        Ok(status)
    }

    async fn get(&self, uuid: &str) -> FleetResult<ContainerStatus> {
        let response = self
            .send(self.client.get(self.url(&format!("containers/{uuid}"))))
            .await?;
        Self::decode(response).await
    }

    async fn delete(&self, uuid: &str) -> FleetResult<ContainerStatus> {
        let response = self
            .send(self.client.delete(self.url(&format!("containers/{uuid}"))))
            .await?;
        debug!(%uuid, "container deleted");
        // The delete already succeeded; a body we cannot read does not undo it.
        match response.json::<ContainerStatus>().await {
            Ok(status) => Ok(status),
            Err(e) => {
                debug!(%uuid, error = %e, "delete response carried no container status");
                Ok(ContainerStatus {
                    uuid: Some(uuid.to_string()),
                    ..ContainerStatus::default()
                })
            }
        }
    }
}
