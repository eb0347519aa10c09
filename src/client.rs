//! Resilient request client.
//!
//! Every network call in the crate goes through [`RequestClient::send`] (or
//! [`RequestClient::execute`] when query parameters are needed). The client
//! wraps a [`Transport`] and adds two things:
//!
//! - automatic retry with exponential backoff for HTTP 429 responses;
//! - uniform classification of every other failure into a
//!   [`ClassifiedError`].
//!
//! # Retry Strategy
//!
//! - HTTP 429 → retry after `base × 2^attempt` (1, 2, 4, … base units),
//!   up to [`RetryPolicy::max_attempts`] total attempts, then
//!   [`ClassifiedError::RateLimited`]
//! - HTTP 4xx (not 429) → [`ClassifiedError::Client`], no retry
//! - HTTP 5xx → [`ClassifiedError::Server`], no retry
//! - No response (connect failure, timeout) → [`ClassifiedError::Network`], no retry
//!
//! The client keeps no state across calls. The attempt counter is an
//! immutable [`RetryState`] value local to each call.

use anyhow::Result;
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ClassifiedError;

/// Where requests go and who they are sent as.
///
/// Passed explicitly into [`HttpTransport::new`]; nothing is read from
/// ambient global state at request time.
#[derive(Debug, Clone)]
pub struct ApiContext {
    pub base_url: String,
    pub bearer_token: Option<String>,
    pub timeout: Duration,
}

impl ApiContext {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.api.base_url.clone(),
            bearer_token: config.resolve_token(),
            timeout: Duration::from_secs(config.api.timeout_secs),
        }
    }
}

/// A request that can be replayed verbatim on every retry attempt.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Multipart(MultipartBody),
}

/// A multipart form with one binary part and any number of text fields.
#[derive(Debug, Clone)]
pub struct MultipartBody {
    pub file_field: String,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub fields: Vec<(String, String)>,
}

/// A received HTTP response, body fully buffered.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON. Shape mismatches become a client error.
    pub fn json<T: DeserializeOwned>(&self) -> std::result::Result<T, ClassifiedError> {
        serde_json::from_slice(&self.body).map_err(|e| ClassifiedError::malformed(self.status, e))
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.body
    }
}

/// No response was received.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// The raw network call. One request in, one response (of any status) out.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> std::result::Result<ApiResponse, TransportError>;
}

/// [`Transport`] over HTTP using `reqwest`.
pub struct HttpTransport {
    http: reqwest::Client,
    context: ApiContext,
}

impl HttpTransport {
    pub fn new(context: ApiContext) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(context.timeout)
            .build()?;
        Ok(Self { http, context })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.context.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &ApiRequest) -> std::result::Result<ApiResponse, TransportError> {
        let mut builder = self
            .http
            .request(request.method.clone(), self.url(&request.path));

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &self.context.bearer_token {
            builder = builder.bearer_auth(token);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(body) => builder.multipart(build_form(body)?),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError(format!("failed to read response body: {}", e)))?;

        Ok(ApiResponse::new(status, body.to_vec()))
    }
}

fn build_form(
    body: &MultipartBody,
) -> std::result::Result<reqwest::multipart::Form, TransportError> {
    let part = reqwest::multipart::Part::bytes(body.bytes.clone())
        .file_name(body.file_name.clone())
        .mime_str(&body.mime_type)
        .map_err(|e| TransportError(format!("invalid mime type {}: {}", body.mime_type, e)))?;

    let mut form = reqwest::multipart::Form::new().part(body.file_field.clone(), part);
    for (key, value) in &body.fields {
        form = form.text(key.clone(), value.clone());
    }
    Ok(form)
}

/// How many attempts to make and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.retry.max_attempts,
            Duration::from_millis(config.retry.base_delay_ms),
        )
    }

    /// Delay before the attempt following `state`: `base × 2^attempt`.
    pub fn delay_after(&self, state: &RetryState) -> Duration {
        self.base_delay * 2u32.saturating_pow(state.attempt.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Position within one call's retry loop. `attempt` is zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub max_attempts: u32,
}

impl RetryState {
    pub fn first(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    /// The state for the following attempt, or `None` if the cap is reached.
    pub fn next(self) -> Option<Self> {
        let attempt = self.attempt + 1;
        (attempt < self.max_attempts).then_some(Self { attempt, ..self })
    }

    /// One-based count of attempts made once this one completes.
    pub fn attempts_made(&self) -> u32 {
        self.attempt + 1
    }
}

/// Cheap to clone; all clones share the same transport.
#[derive(Clone)]
pub struct RequestClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RequestClient {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// HTTP client against the configured backend.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = HttpTransport::new(ApiContext::from_config(config))?;
        Ok(Self::new(Arc::new(transport), RetryPolicy::from_config(config)))
    }

    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody>,
    ) -> std::result::Result<ApiResponse, ClassifiedError> {
        let request = ApiRequest::new(method, path).body(body.unwrap_or(RequestBody::Empty));
        self.execute(&request).await
    }

    pub async fn execute(
        &self,
        request: &ApiRequest,
    ) -> std::result::Result<ApiResponse, ClassifiedError> {
        let mut state = RetryState::first(self.policy.max_attempts);

        loop {
            debug!(
                method = %request.method,
                path = %request.path,
                attempt = state.attempts_made(),
                "sending request"
            );

            let response = match self.transport.execute(request).await {
                Ok(response) => response,
                Err(e) => return Err(ClassifiedError::Network { detail: e.0 }),
            };

            if response.is_success() {
                return Ok(response);
            }

            if response.status != 429 {
                return Err(classify(&response));
            }

            let detail = extract_detail(&response.body);
            match state.next() {
                Some(next) => {
                    let delay = self.policy.delay_after(&state);
                    warn!(
                        path = %request.path,
                        "Rate limited (attempt {}/{}), retrying in {} ms",
                        state.attempts_made(),
                        state.max_attempts,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    state = next;
                }
                None => {
                    return Err(ClassifiedError::RateLimited {
                        detail,
                        attempts: state.attempts_made(),
                    })
                }
            }
        }
    }
}

/// Characters left as-is in a path segment (RFC 3986 unreserved).
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// `prefix` followed by `segment`, percent-encoded so that ids containing
/// `/`, `?` or `#` still address a single resource.
pub fn segment_path(prefix: &str, segment: &str) -> String {
    format!("{}{}", prefix, utf8_percent_encode(segment, PATH_SEGMENT))
}

/// Map a non-2xx, non-429 response onto the error taxonomy.
pub fn classify(response: &ApiResponse) -> ClassifiedError {
    let detail = extract_detail(&response.body);
    if response.status >= 500 {
        ClassifiedError::Server {
            status: response.status,
            detail,
        }
    } else {
        ClassifiedError::Client {
            status: response.status,
            detail,
        }
    }
}

/// The server's `detail` field, if the body is JSON and carries one.
///
/// Non-string details (e.g. validation error lists) are rendered as JSON.
/// A non-JSON body is used verbatim, truncated.
pub fn extract_detail(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(json) => match json.get("detail") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        },
        Err(_) => {
            let text = String::from_utf8_lossy(body);
            let text = text.trim();
            if text.is_empty() {
                None
            } else {
                Some(text.chars().take(200).collect())
            }
        }
    }
}
