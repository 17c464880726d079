//! Outbound HTTP abstraction
//!
//! Everything the server sends to the authorization server goes through an
//! [`HttpFetch`]. Production uses [`ReqwestFetch`]; tests may substitute
//! their own implementation.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{Error, Result};

/// Request handed to an [`HttpFetch`].
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute target URI
    pub url: Url,
    /// Request headers
    pub headers: HeaderMap,
    /// Request body, if any
    pub body: Option<Bytes>,
}

impl OutboundRequest {
    /// Request without headers or body.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// `GET url`
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// `POST url`
    #[must_use]
    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    /// Add or replace a header.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set a JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        self.body = Some(Bytes::from(serde_json::to_vec(body)?));
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(self)
    }

    /// Set an `application/x-www-form-urlencoded` body.
    pub fn form<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        let encoded = serde_urlencoded::to_string(body)
            .map_err(|e| Error::Internal(format!("Failed to encode form: {e}")))?;
        self.body = Some(Bytes::from(encoded));
        self.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        Ok(self)
    }
}

/// Response returned by an [`HttpFetch`].
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
}

impl FetchResponse {
    /// Parse the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

/// Performs HTTP requests.
///
/// Transport failures (connect errors, timeouts) must be reported as
/// [`Error::AuthorizationServerUnavailable`]. Any HTTP status, including
/// errors, is a successful fetch.
#[async_trait::async_trait]
pub trait HttpFetch: Send + Sync + 'static {
    /// Send `request` and collect the full response.
    async fn fetch(&self, request: OutboundRequest) -> Result<FetchResponse>;
}

/// [`HttpFetch`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    /// Client whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl HttpFetch for ReqwestFetch {
    async fn fetch(&self, request: OutboundRequest) -> Result<FetchResponse> {
        let OutboundRequest {
            method,
            url,
            headers,
            body,
        } = request;
        let endpoint = url.to_string();

        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::unavailable(&endpoint, e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::unavailable(&endpoint, e))?;

        debug!(endpoint = %endpoint, status = %status, bytes = body.len(), "Fetched");
        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}
