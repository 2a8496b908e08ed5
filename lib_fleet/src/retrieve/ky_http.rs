//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client wrapper around `reqwest` with middleware for
//! exponential backoff retries and JSON response handling.

use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use crate::error::{FleetError, Result};

/// Retries for transient failures (connect errors, timeouts, 5xx, 408, 429).
const MAX_RETRIES: u32 = 3;

/// Upper bound on a single attempt, connect to last body byte.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A deserialized response plus the HTTP metadata it came with.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The deserialized body.
    pub data: T,
    /// The numeric HTTP status code.
    pub status: u16,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

/// A flexible asynchronous HTTP client.
///
/// Handles the base URL, bearer authentication and automatic retries.
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a client with a retry policy.
    ///
    /// # Arguments
    /// * `base_url` - The absolute base URL, e.g. `http://localhost:8000/`.
    ///   A missing trailing slash is added so relative paths join below it.
    /// * `auth_token` - An optional bearer token.
    ///
    /// # Errors
    /// Returns `FleetError::Url` if `base_url` is not an absolute URL.
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self> {
        Self::with_timeout(base_url, auth_token, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Like `new`, with `timeout` bounding each attempt. Retries of a timed
    /// out attempt get their own budget.
    pub fn with_timeout(base_url: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let mut url = Url::parse(base_url)?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner: client,
            base_url: url,
            auth_token,
        })
    }

    /// The base URL every path is joined to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves `path` against the base URL.
    pub fn url_for(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Performs a request and deserializes a successful JSON body.
    ///
    /// # Errors
    /// - `FleetError::Url` if `path` cannot be joined,
    /// - `FleetError::Middleware` / `FleetError::Http` for transport failures
    ///   that survived the retries,
    /// - `FleetError::Api` for a non-2xx status, carrying the body text,
    /// - `FleetError::Http` if the body does not match `T`.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let full_url = self.url_for(path)?;
        let mut req = self.inner.request(method, full_url);

        if !query.is_empty() {
            req = req.query(query);
        }

        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        if let Some(b) = body {
            let json_body = serde_json::to_string(b)?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        let response: reqwest::Response = req.send().await?;
        let status = response.status();
        let headers = response.headers().clone();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("API {} answered {}: {}", path, status.as_u16(), body);
            return Err(FleetError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let data = response.json::<T>().await?;
        Ok(ApiResponse {
            data,
            status: status.as_u16(),
            headers,
        })
    }

    /// `GET` shorthand.
    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self.request::<T, ()>(Method::GET, path, query, None).await?;
        Ok(response.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let client = ApiClient::new("http://localhost:8000/backend", None).unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:8000/backend/");
        assert_eq!(
            client.url_for("api/devices/get-device-user/").unwrap().as_str(),
            "http://localhost:8000/backend/api/devices/get-device-user/"
        );
    }

    #[test]
    fn relative_base_url_is_rejected() {
        assert!(matches!(ApiClient::new("/api", None), Err(FleetError::Url(_))));
    }
}
