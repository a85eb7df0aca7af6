//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client wrapper around `reqwest`, with retry middleware
//! and a uniform response container. Non-2xx answers are not errors here:
//! they come back as an [`ApiResponse`] without `data` but with the raw
//! body, so callers can read API-level error payloads.

use std::time::Duration;

use anyhow::Context;
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;

/// A standardized container for API responses.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The deserialized body of a 2xx response.
    pub data: Option<T>,
    /// The raw body of a non-2xx response.
    pub error_body: Option<String>,
    pub status: u16,
}

/// A flexible asynchronous HTTP client.
///
/// Relative paths are joined onto `base_url`; transient failures (connect
/// errors, 5xx, 429) are retried up to three times with exponential backoff.
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
}

impl ApiClient {
    /// Creates a client with a retry policy and a request timeout.
    ///
    /// # Errors
    /// Fails if `base_url` is not an absolute URL or the HTTP client cannot
    /// be built.
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let url = Url::parse(base_url)
            .with_context(|| format!("Invalid base URL (must be absolute): {}", base_url))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("feed-hub/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner: client,
            base_url: url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs a request with query parameters and decodes a 2xx body as `T`.
    ///
    /// # Errors
    /// Returns an error if the URL cannot be joined, the request fails after
    /// all retries, or a 2xx body does not decode as `T`.
    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
    ) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
    {
        let full_url = self.base_url.join(path)?;
        let mut req = self.inner.request(method, full_url);

        if !query.is_empty() {
            req = req.query(query);
        }

        let response: reqwest::Response = req.send().await?;
        let status = response.status();

        if status.is_success() {
            let data = response.json::<T>().await?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
            })
        }
    }

    /// `GET` shorthand.
    pub async fn get<T>(&self, path: &str, query: &[(&str, &str)]) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
    {
        self.request(Method::GET, path, query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_relative_url() {
        let result = ApiClient::new("not-a-url", Duration::from_secs(1));
        assert!(result.is_err());
    }

    #[test]
    fn test_new_keeps_base_url() {
        let client =
            ApiClient::new("https://ws.audioscrobbler.com/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.base_url().join("2.0/").unwrap().as_str(),
            "https://ws.audioscrobbler.com/2.0/"
        );
    }
}
