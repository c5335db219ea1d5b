//! Authenticated HTTP transport.
//!
//! Every request gets a bearer token from the [`AuthManager`], is bounded by
//! the configured timeout, and is retried per [`RetryPolicy`] and
//! [`RetryMode`]. A 401 triggers one deduplicated re-authentication and a
//! single resend.

pub mod retry;
pub mod upload;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::auth::{AuthManager, SessionToken};
use crate::config::ClientConfig;
use crate::error::ValidationError;
use crate::util::compact_text;
use crate::{Error, Result};

use self::retry::{RetryMode, RetryPolicy};
use self::upload::AttachmentUpload;

/// Build the shared HTTP client from configuration.
pub fn build_http_client(config: &ClientConfig) -> Result<Client> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|error| Error::Configuration(format!("invalid header name '{name}': {error}")))?;
        let value = HeaderValue::from_str(value).map_err(|error| {
            Error::Configuration(format!("invalid value for header '{name}': {error}"))
        })?;
        headers.insert(name, value);
    }

    Client::builder()
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .connect_timeout(config.timeout)
        .danger_accept_invalid_certs(!config.verify_tls)
        .build()
        .map_err(|error| Error::Configuration(format!("failed to build HTTP client: {error}")))
}

/// Request payload.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Upload(AttachmentUpload),
}

/// One API call, relative to `{base_url}/api/v1`.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: RequestBody,
    retry: RetryMode,
    operation: &'static str,
    resource: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, operation: &'static str, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into().trim_start_matches('/').to_string(),
            query: Vec::new(),
            body: RequestBody::Empty,
            retry: RetryMode::Default,
            operation,
            resource: None,
        }
    }

    pub fn get(operation: &'static str, path: impl Into<String>) -> Self {
        Self::new(Method::GET, operation, path)
    }

    pub fn post(operation: &'static str, path: impl Into<String>) -> Self {
        Self::new(Method::POST, operation, path)
    }

    pub fn patch(operation: &'static str, path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, operation, path)
    }

    pub fn delete(operation: &'static str, path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, operation, path)
    }

    #[must_use]
    pub fn query(mut self, pairs: Vec<(String, String)>) -> Self {
        self.query = pairs;
        self
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    #[must_use]
    pub fn upload(mut self, upload: AttachmentUpload) -> Self {
        self.body = RequestBody::Upload(upload);
        self
    }

    #[must_use]
    pub const fn retry(mut self, mode: RetryMode) -> Self {
        self.retry = mode;
        self
    }

    #[must_use]
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub const fn operation(&self) -> &'static str {
        self.operation
    }
}

enum AttemptError {
    Unauthorized(String),
    Failed(Error),
}

impl From<Error> for AttemptError {
    fn from(error: Error) -> Self {
        Self::Failed(error)
    }
}

#[derive(Debug)]
pub struct Transport {
    http: Client,
    auth: Arc<AuthManager>,
    base_url: String,
    api_base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
    chunk_size: usize,
    max_upload_size: u64,
}

impl Transport {
    pub fn new(config: &ClientConfig, http: Client, auth: Arc<AuthManager>) -> Self {
        Self {
            http,
            auth,
            base_url: config.base_url().to_string(),
            api_base_url: config.api_base_url(),
            timeout: config.timeout,
            retry: RetryPolicy::from_config(config),
            chunk_size: config.chunk_size,
            max_upload_size: config.max_upload_size,
        }
    }

    #[must_use]
    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    /// Send `request` and decode the JSON response body.
    ///
    /// An empty body decodes to an empty JSON object.
    pub async fn request(&self, request: ApiRequest) -> Result<Value> {
        let url = format!("{}/{}", self.api_base_url, request.path);
        let retryable = request.retry.allows(&request.method);
        let mut token = self.auth.get_token().await?;
        let mut reauthenticated = false;
        let mut attempt = 1;

        loop {
            tracing::debug!(
                "{} {} ({}, attempt {})",
                request.method,
                url,
                request.operation,
                attempt
            );
            match self.send_once(&request, &url, &token).await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Unauthorized(message)) => {
                    if reauthenticated {
                        return Err(Error::Authentication {
                            operation: request.operation,
                            message,
                            status: Some(StatusCode::UNAUTHORIZED.as_u16()),
                        });
                    }
                    reauthenticated = true;
                    token = self.auth.refresh_after_rejection(&token).await?;
                }
                Err(AttemptError::Failed(error))
                    if retryable && self.retry.should_retry(attempt, &error) =>
                {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        "{} failed on attempt {}, retrying in {:?}: {}",
                        request.operation,
                        attempt,
                        delay,
                        error
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(AttemptError::Failed(error)) => return Err(error),
            }
        }
    }

    async fn send_once(
        &self,
        request: &ApiRequest,
        url: &str,
        token: &SessionToken,
    ) -> std::result::Result<Value, AttemptError> {
        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .bearer_auth(token.secret())
            .timeout(self.timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Upload(upload) => {
                builder.multipart(upload.to_form(self.chunk_size, self.max_upload_size).await?)
            }
        };

        let (status, body) = bounded(
            request.operation,
            request.resource.as_deref(),
            self.timeout,
            async {
                let response = builder.send().await?;
                let status = response.status();
                let body = response.text().await?;
                Ok::<_, reqwest::Error>((status, body))
            },
        )
        .await?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(AttemptError::Unauthorized(parse_api_error(status, &body)));
        }
        if !status.is_success() {
            return Err(AttemptError::Failed(Error::Api {
                operation: request.operation,
                resource: request.resource.clone(),
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            }));
        }
        if body.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        serde_json::from_str(&body).map_err(|error| {
            AttemptError::Failed(
                ValidationError::single(
                    format!("{} response", request.operation),
                    "$",
                    format!("invalid JSON: {error}"),
                )
                .into(),
            )
        })
    }

    /// Stream `path` (relative to the server root, e.g.
    /// `/file/attachments/1/a.png`) into `writer`, returning the number of
    /// bytes written.
    ///
    /// Failures before the first byte are retried like any GET; a failure
    /// mid-body is returned as-is since `writer` already holds partial data.
    pub async fn download<W>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        resource: &str,
        writer: &mut W,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        const OPERATION: &str = "download_attachment";
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let response = self.open_download(&url, query, resource).await?;

        let copy = async {
            let mut written = 0_u64;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|source| {
                    transport_error(OPERATION, Some(resource), self.timeout, source)
                })?;
                writer
                    .write_all(&chunk)
                    .await
                    .map_err(|error| Error::io(OPERATION, error))?;
                written += chunk.len() as u64;
            }
            writer
                .flush()
                .await
                .map_err(|error| Error::io(OPERATION, error))?;
            Ok::<u64, Error>(written)
        };

        match tokio::time::timeout(self.timeout, copy).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: OPERATION,
                resource: Some(resource.to_string()),
                timeout: self.timeout,
            }),
        }
    }

    async fn open_download(
        &self,
        url: &str,
        query: &[(&str, &str)],
        resource: &str,
    ) -> Result<Response> {
        const OPERATION: &str = "download_attachment";
        let mut token = self.auth.get_token().await?;
        let mut reauthenticated = false;
        let mut attempt = 1;

        loop {
            tracing::debug!("GET {} ({}, attempt {})", url, OPERATION, attempt);
            let builder: RequestBuilder = self
                .http
                .get(url)
                .query(query)
                .bearer_auth(token.secret())
                .timeout(self.timeout);
            let outcome = bounded(OPERATION, Some(resource), self.timeout, builder.send()).await;

            let error = match outcome {
                Ok(response) if response.status() == StatusCode::UNAUTHORIZED => {
                    let body = response.text().await.unwrap_or_default();
                    let message = parse_api_error(StatusCode::UNAUTHORIZED, &body);
                    if reauthenticated {
                        return Err(Error::Authentication {
                            operation: OPERATION,
                            message,
                            status: Some(StatusCode::UNAUTHORIZED.as_u16()),
                        });
                    }
                    reauthenticated = true;
                    token = self.auth.refresh_after_rejection(&token).await?;
                    continue;
                }
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    Error::Api {
                        operation: OPERATION,
                        resource: Some(resource.to_string()),
                        status: status.as_u16(),
                        message: parse_api_error(status, &body),
                    }
                }
                Err(error) => error,
            };

            if !self.retry.should_retry(attempt, &error) {
                return Err(error);
            }
            let delay = self.retry.delay(attempt);
            tracing::warn!(
                "{} failed on attempt {}, retrying in {:?}: {}",
                OPERATION,
                attempt,
                delay,
                error
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Run a reqwest future under a hard deadline, mapping failures into the
/// crate taxonomy.
pub(crate) async fn bounded<T, F>(
    operation: &'static str,
    resource: Option<&str>,
    timeout: Duration,
    future: F,
) -> Result<T>
where
    F: Future<Output = reqwest::Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(transport_error(operation, resource, timeout, source)),
        Err(_) => Err(Error::Timeout {
            operation,
            resource: resource.map(str::to_string),
            timeout,
        }),
    }
}

fn transport_error(
    operation: &'static str,
    resource: Option<&str>,
    timeout: Duration,
    source: reqwest::Error,
) -> Error {
    if source.is_timeout() {
        Error::Timeout {
            operation,
            resource: resource.map(str::to_string),
            timeout,
        }
    } else {
        Error::Transport {
            operation,
            resource: resource.map(str::to_string),
            source,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    message: Option<String>,
    error: Option<String>,
}

/// Server message from an error body: the `message` or `error` field of a
/// JSON body, else the compacted body text.
pub(crate) fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorResponse>(body) {
        if let Some(message) = payload
            .message
            .or(payload.error)
            .filter(|message| !message.trim().is_empty())
        {
            return compact_text(&message);
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .map_or_else(|| format!("HTTP {}", status.as_u16()), str::to_string)
    } else {
        trimmed
    }
}
