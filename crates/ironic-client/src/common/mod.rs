//! Common utilities for the Ironic API client
//!
//! Provides the authenticated HTTP wrapper used by every backend call and the
//! JSON-patch builder for node updates.

pub mod update;

use crate::error::IronicError;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

/// Header that selects the API microversion
pub const MICROVERSION_HEADER: &str = "X-OpenStack-Ironic-API-Version";

/// HTTP client wrapper with authentication and microversion negotiation
pub struct HttpClient {
    client: Client,
    base_url: String,
    auth: Option<(String, String)>,
    microversion: Arc<AtomicU32>,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(
        client: Client,
        base_url: String,
        auth: Option<(String, String)>,
        microversion: Arc<AtomicU32>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            microversion,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Microversion header value, e.g. `1.81`
    pub fn microversion(&self) -> String {
        format!("1.{}", self.microversion.load(Ordering::Relaxed))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request
            .header(MICROVERSION_HEADER, self.microversion())
            .header("Accept", "application/json");
        match &self.auth {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    async fn check(method: &str, path: &str, response: Response) -> Result<Response, IronicError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = format!("{} {} failed: {} - {}", method, path, status, body);
        Err(match status {
            StatusCode::NOT_FOUND => IronicError::NotFound(detail),
            StatusCode::CONFLICT => IronicError::Conflict(detail),
            StatusCode::BAD_REQUEST => IronicError::BadRequest(detail),
            _ => IronicError::Api(detail),
        })
    }

    /// Make a GET request
    pub async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, IronicError> {
        let url = self.build_url(path);
        debug!("GET {}", url);

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(IronicError::Http)?;

        let response = Self::check("GET", path, response).await?;
        response.json().await.map_err(IronicError::Http)
    }

    /// Make a POST request
    pub async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, IronicError> {
        let url = self.build_url(path);
        debug!("POST {}", url);

        let response = self
            .authorize(self.client.post(&url))
            .json(body)
            .send()
            .await
            .map_err(IronicError::Http)?;

        let response = Self::check("POST", path, response).await?;
        response.json().await.map_err(IronicError::Http)
    }

    /// Make a PATCH request with a JSON-patch document
    pub async fn patch<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, IronicError> {
        let url = self.build_url(path);
        debug!(
            "PATCH {} with body: {}",
            url,
            serde_json::to_string(body).unwrap_or_default()
        );

        let response = self
            .authorize(self.client.patch(&url))
            .json(body)
            .send()
            .await
            .map_err(IronicError::Http)?;

        let response = Self::check("PATCH", path, response).await?;
        response.json().await.map_err(IronicError::Http)
    }

    /// Make a PUT request. State-change endpoints answer 202 with no body.
    pub async fn put(&self, path: &str, body: &serde_json::Value) -> Result<(), IronicError> {
        let url = self.build_url(path);
        debug!("PUT {} with body: {}", url, serde_json::to_string(body).unwrap_or_default());

        let response = self
            .authorize(self.client.put(&url))
            .json(body)
            .send()
            .await
            .map_err(IronicError::Http)?;

        Self::check("PUT", path, response).await?;
        Ok(())
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<(), IronicError> {
        let url = self.build_url(path);
        debug!("DELETE {}", url);

        let response = self
            .authorize(self.client.delete(&url))
            .send()
            .await
            .map_err(IronicError::Http)?;

        Self::check("DELETE", path, response).await?;
        Ok(())
    }
}
