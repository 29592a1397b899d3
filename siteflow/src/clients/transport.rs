//! Shared HTTP plumbing for the stage clients.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::ServiceError;

/// A base URL plus a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Creates a transport with a fresh client.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Creates a transport sharing `client`.
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Returns the base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Joins `path` onto the base URL.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path))
    }

    pub(crate) fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> RequestBuilder {
        self.client.post(self.url(path)).json(body)
    }

    pub(crate) fn patch<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> RequestBuilder {
        self.client.patch(self.url(path)).json(body)
    }

    pub(crate) fn delete(&self, path: &str) -> RequestBuilder {
        self.client.delete(self.url(path))
    }

    /// Sends a request and decodes a JSON body.
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ServiceError> {
        let response = check_status(request.send().await?).await?;
        response
            .json()
            .await
            .map_err(|e| ServiceError::Decode(format!("Failed to parse JSON response: {e}")))
    }

    /// Sends a request and returns the body as text.
    pub(crate) async fn send_text(&self, request: RequestBuilder) -> Result<String, ServiceError> {
        let response = check_status(request.send().await?).await?;
        response
            .text()
            .await
            .map_err(|e| ServiceError::Decode(format!("Failed to read response body: {e}")))
    }

    /// Sends a request that returns no content.
    pub(crate) async fn send_empty(&self, request: RequestBuilder) -> Result<(), ServiceError> {
        check_status(request.send().await?).await.map(|_| ())
    }
}

async fn check_status(response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    if status == StatusCode::NOT_FOUND {
        return Err(ServiceError::not_found(format!("{url}: {error_text}")));
    }
    Err(ServiceError::rejected(status.as_u16(), error_text))
}
