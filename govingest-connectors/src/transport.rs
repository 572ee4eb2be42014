//! Transport: the single outbound resource a connector owns for one run.
//!
//! [`HttpFetcher`] wraps one `reqwest::Client` configured with a fixed timeout,
//! a user agent, and the contract's credentials as default headers.
//! [`StaticFetcher`] serves canned responses for tests and offline fixtures.
//! Local files (plain paths or `file://` URLs) are read directly.

use async_trait::async_trait;
use bytes::Bytes;
use govingest_core::config::HttpConfig;
use govingest_core::contract::AuthConfig;
use govingest_core::error::ConnectionError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A single GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// URL with the query string appended, used for logging and fixture lookup.
    pub fn display_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let query: Vec<String> = self
            .query
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.url, sep, query.join("&"))
    }
}

/// Body and final location of a successful response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Final URL after redirects; relative links resolve against it.
    pub url: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl FetchResponse {
    /// Decode the body as text, honouring the `charset` of the content type
    /// and falling back to UTF-8.
    pub fn text(&self) -> String {
        let encoding = self
            .content_type
            .as_deref()
            .and_then(|ct| {
                ct.split(';')
                    .filter_map(|part| part.trim().strip_prefix("charset="))
                    .next()
            })
            .and_then(|label| encoding_rs::Encoding::for_label(label.trim_matches('"').as_bytes()))
            .unwrap_or(encoding_rs::UTF_8);
        let (text, _, _) = encoding.decode(&self.body);
        text.into_owned()
    }
}

/// Outbound transport used by connectors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ConnectionError>;
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ConnectionError> {
        (**self).fetch(request).await
    }
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for Box<F> {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ConnectionError> {
        (**self).fetch(request).await
    }
}

/// HTTP transport backed by one `reqwest::Client`.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Build a client with `timeout` per request. Credentials are installed
    /// once as default headers.
    pub fn new(
        http: &HttpConfig,
        timeout: Duration,
        auth: Option<&AuthConfig>,
    ) -> Result<Self, ConnectionError> {
        let mut headers = HeaderMap::new();
        if let Some(auth) = auth {
            let (name, value) = auth.header();
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ConnectionError::ClientBuild {
                    message: format!("invalid auth header name: {e}"),
                }
            })?;
            let mut value =
                HeaderValue::from_str(&value).map_err(|e| ConnectionError::ClientBuild {
                    message: format!("invalid auth header value: {e}"),
                })?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(http.connect_timeout())
            .user_agent(http.user_agent.clone())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| ConnectionError::ClientBuild {
                message: e.to_string(),
            })?;
        Ok(Self { client, timeout })
    }

    fn map_error(&self, url: &str, e: reqwest::Error) -> ConnectionError {
        if e.is_timeout() {
            ConnectionError::Timeout {
                url: url.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else if let Some(status) = e.status() {
            ConnectionError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            ConnectionError::Request {
                url: url.to_string(),
                message: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ConnectionError> {
        let shown = request.display_url();
        tracing::debug!(url = %shown, "GET");

        let response = self
            .client
            .get(&request.url)
            .query(&request.query)
            .send()
            .await
            .map_err(|e| self.map_error(&shown, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectionError::Status {
                url: shown,
                status: status.as_u16(),
            });
        }

        let url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_error(&shown, e))?;

        Ok(FetchResponse {
            url,
            content_type,
            body,
        })
    }
}

#[derive(Debug, Clone)]
enum Route {
    Body {
        content_type: Option<String>,
        body: Bytes,
    },
    Status(u16),
}

/// Serves canned responses keyed by [`FetchRequest::display_url`].
///
/// Unknown URLs answer with HTTP 404. Every request is recorded so tests can
/// assert on page order and query parameters.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a response body for `url`.
    pub fn with_body(self, url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.insert(
            url.into(),
            Route::Body {
                content_type: None,
                body: body.into(),
            },
        );
        self
    }

    /// Register a response body with an explicit content type.
    pub fn with_typed_body(
        self,
        url: impl Into<String>,
        content_type: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        self.insert(
            url.into(),
            Route::Body {
                content_type: Some(content_type.into()),
                body: body.into(),
            },
        );
        self
    }

    /// Register a JSON response for `url`.
    pub fn with_json(self, url: impl Into<String>, json: &serde_json::Value) -> Self {
        self.with_typed_body(url, "application/json", json.to_string())
    }

    /// Register an HTTP error status for `url`.
    pub fn with_status(self, url: impl Into<String>, status: u16) -> Self {
        self.insert(url.into(), Route::Status(status));
        self
    }

    fn insert(&self, url: String, route: Route) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(url, route);
        }
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Display URLs of requests seen so far, in order.
    pub fn requested_urls(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(FetchRequest::display_url)
            .collect()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ConnectionError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let key = request.display_url();
        let route = self
            .routes
            .lock()
            .ok()
            .and_then(|routes| routes.get(&key).cloned());
        match route {
            Some(Route::Body { content_type, body }) => Ok(FetchResponse {
                url: request.url.clone(),
                content_type,
                body,
            }),
            Some(Route::Status(status)) => Err(ConnectionError::Status { url: key, status }),
            None => Err(ConnectionError::Status {
                url: key,
                status: 404,
            }),
        }
    }
}

/// Where a file-based source lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Remote(String),
    Local(PathBuf),
}

impl Location {
    pub fn parse(endpoint: &str) -> Self {
        let trimmed = endpoint.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Location::Remote(trimmed.to_string());
        }
        if let Ok(url) = url::Url::parse(trimmed) {
            if url.scheme() == "file" {
                if let Ok(path) = url.to_file_path() {
                    return Location::Local(path);
                }
            }
        }
        Location::Local(PathBuf::from(trimmed))
    }

    /// The final path segment, used for file type detection.
    pub fn file_name(&self) -> Option<String> {
        match self {
            Location::Remote(u) => url::Url::parse(u).ok().and_then(|url| {
                url.path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_string))
            }),
            Location::Local(path) => path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string),
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Remote(u) => f.write_str(u),
            Location::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Read the raw bytes of a file-based source.
pub async fn read_location(
    fetcher: &dyn Fetcher,
    location: &Location,
) -> Result<Bytes, ConnectionError> {
    match location {
        Location::Remote(url) => Ok(fetcher.fetch(&FetchRequest::new(url.clone())).await?.body),
        Location::Local(path) => tokio::fs::read(path)
            .await
            .map(Bytes::from)
            .map_err(|e| ConnectionError::FileRead {
                path: path.clone(),
                message: e.to_string(),
            }),
    }
}
