//! HTTP client for the manager API.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::CliError;

/// Deadline on every manager API call.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Error body the manager attaches to non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Client for the manager REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(host: &str, port: u16) -> Self {
        let base_url = if host.starts_with("http") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("http://{host}:{port}")
        };
        ApiClient {
            client: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET a JSON resource.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CliError> {
        let response = self.client.get(self.url(path)).send().await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        Ok(response.json().await?)
    }

    /// POST a JSON body, expecting 201 with a JSON reply.
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CliError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        if response.status() != StatusCode::CREATED {
            return Err(Self::api_error(response).await);
        }
        Ok(response.json().await?)
    }

    /// DELETE a resource, expecting 204.
    pub async fn delete(&self, path: &str) -> Result<(), CliError> {
        let response = self.client.delete(self.url(path)).send().await?;
        if response.status() != StatusCode::NO_CONTENT {
            return Err(Self::api_error(response).await);
        }
        Ok(())
    }

    async fn api_error(response: reqwest::Response) -> CliError {
        let status = response.status().as_u16();
        let message = match response.json::<ErrorBody>().await {
            Ok(body) if !body.message.is_empty() => body.message,
            _ => "request rejected".to_string(),
        };
        CliError::Api { status, message }
    }
}
