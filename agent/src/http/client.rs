//! HTTP client implementation

use std::time::Duration;

use reqwest::{header, Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::AgentError;

/// HTTP client for base communication
pub struct HttpClient {
    client: Client,
    base_url: String,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("deployd/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make a bearer-authenticated POST request.
    ///
    /// Anything but `200 OK` is an error carrying the status and body.
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        token: &str,
        body: Option<&B>,
    ) -> Result<T, AgentError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let mut request = self
            .client
            .post(&url)
            .header(header::AUTHORIZATION, format!("Bearer {}", token));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP POST {} failed: {} - {}", path, status, body);
            return Err(AgentError::SyncError(format!(
                "POST {} returned {}: {}",
                path, status, body
            )));
        }

        let body = response.json().await?;
        Ok(body)
    }
}
