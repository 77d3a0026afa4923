//! Authenticated transport with bounded re-authentication and
//! transient-failure retry.
//!
//! Per logical request: 2xx returns, 401 triggers at most ONE
//! re-authentication followed by a single replay, 403 is terminal and never
//! re-authenticates, connect/timeout/5xx/429 retry with exponential backoff.
//! Payloads are replayable by construction; file bodies are reopened on
//! every attempt instead of re-reading a consumed stream.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use reqwest::{header, Method, StatusCode};
use tokio::sync::RwLock;
use tokio_util::io::ReaderStream;

use crate::auth::{Credentials, SessionStore};
use crate::client::response::{ApiResponse, ResponseBody};
use crate::client::retry::{is_retryable_status, RetryPolicy};
use crate::common::ApiError;

/// Authentication endpoint: POST issues a token, DELETE revokes it.
pub const AUTH_PATH: &str = "/data/JSESSION";
/// Cookie carrying the session token on every request.
pub const SESSION_COOKIE: &str = "JSESSIONID";

const BODY_SNIPPET_LIMIT: usize = 200;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub verify_ssl: bool,
    /// Applied to metadata requests only; archive transfers run unbounded.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub auto_reauth: bool,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            verify_ssl: true,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::transport(),
            auto_reauth: true,
        }
    }
}

/// Request payload. Every variant can be rebuilt for a replay attempt.
pub enum Payload {
    Empty,
    Json(serde_json::Value),
    Bytes {
        content_type: &'static str,
        data: Vec<u8>,
    },
    /// Streamed from disk; reopened on each attempt.
    File {
        content_type: &'static str,
        path: PathBuf,
    },
}

/// Connectivity probe result.
#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub url: String,
    pub version: String,
    pub latency_ms: u64,
}

pub struct ArchiveClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
    auto_reauth: bool,
    credentials: Option<Credentials>,
    store: SessionStore,
    // Read by every request, written only while re-authenticating.
    token: RwLock<Option<String>>,
}

impl ArchiveClient {
    pub fn new(
        config: ClientConfig,
        store: SessionStore,
        credentials: Option<Credentials>,
    ) -> Result<Self, ApiError> {
        let base_url = normalize_base_url(&config.base_url)?;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(ApiError::from_reqwest)?;

        // Token priority: environment > cached session for this server.
        let token = store.session_token(Some(&base_url));

        Ok(Self {
            http,
            base_url,
            timeout: config.timeout,
            retry: config.retry,
            auto_reauth: config.auto_reauth,
            credentials,
            store,
            token: RwLock::new(token),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn has_token(&self) -> bool {
        self.token.read().await.is_some()
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        query: &[(&str, String)],
        payload: &Payload,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut request = self.http.request(method.clone(), self.url_for(path));

        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        if let Some(token) = self.token.read().await.as_deref() {
            request = request.header(header::COOKIE, format!("{SESSION_COOKIE}={token}"));
        }

        request = match payload {
            Payload::Empty => request,
            Payload::Json(value) => request.json(value),
            Payload::Bytes { content_type, data } => request
                .header(header::CONTENT_TYPE, *content_type)
                .body(data.clone()),
            Payload::File { content_type, path } => {
                let file = tokio::fs::File::open(path).await?;
                request
                    .header(header::CONTENT_TYPE, *content_type)
                    .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            }
        };

        request.send().await.map_err(ApiError::from_reqwest)
    }

    /// Full request state machine. Returns the raw successful response;
    /// callers resolve or stream the body.
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        payload: Payload,
        retry: &RetryPolicy,
    ) -> Result<reqwest::Response, ApiError> {
        // Archive bodies can legitimately take hours; only metadata
        // requests get the configured timeout.
        let timeout = match payload {
            Payload::File { .. } => None,
            _ => Some(self.timeout),
        };
        self.execute_with_timeout(method, path, query, payload, retry, timeout)
            .await
    }

    async fn execute_with_timeout(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        payload: Payload,
        retry: &RetryPolicy,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut attempt: u32 = 0;
        let mut reauthenticated = false;

        loop {
            tracing::debug!(%method, path, attempt, "sending request");
            let transient = match self
                .send_once(&method, path, query, &payload, timeout)
                .await
            {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    match status {
                        StatusCode::UNAUTHORIZED => {
                            if !reauthenticated
                                && self.auto_reauth
                                && self.credentials.is_some()
                            {
                                tracing::info!(path, "session rejected, re-authenticating once");
                                self.authenticate().await?;
                                reauthenticated = true;
                                // Replay the original request exactly once.
                                continue;
                            }
                            return Err(ApiError::SessionExpired);
                        }
                        StatusCode::FORBIDDEN => return Err(ApiError::PermissionDenied),
                        StatusCode::NOT_FOUND => return Err(ApiError::NotFound(path.to_string())),
                        status if is_retryable_status(status) => {
                            ApiError::Transient(format!("HTTP {}", status.as_u16()))
                        }
                        status => {
                            let body = resp.text().await.unwrap_or_default();
                            return Err(ApiError::Http {
                                status: status.as_u16(),
                                body: snippet(&body),
                            });
                        }
                    }
                }
                Err(err) if err.is_transient() => err,
                Err(err) => return Err(err),
            };

            if attempt >= retry.max_retries {
                return Err(transient);
            }
            let delay = retry.delay_for(attempt);
            tracing::warn!(
                path,
                attempt = attempt + 1,
                max_attempts = retry.max_retries + 1,
                delay_ms = delay.as_millis() as u64,
                error = %transient,
                "transient failure, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Authenticate with username/password and install the fresh token.
    /// Holds the token write lock for the whole exchange so concurrent
    /// requests never observe a half-replaced session.
    pub async fn authenticate(&self) -> Result<String, ApiError> {
        let creds = self
            .credentials
            .clone()
            .ok_or(ApiError::SessionExpired)?;

        let mut guard = self.token.write().await;
        *guard = None;

        let token = self.request_new_token(&creds).await?;
        if let Err(err) = self.store.save(&token, &self.base_url, &creds.username) {
            tracing::warn!(error = %err, "failed to persist session cache");
        }
        *guard = Some(token.clone());

        Ok(token)
    }

    async fn request_new_token(&self, creds: &Credentials) -> Result<String, ApiError> {
        let resp = self
            .http
            .post(self.url_for(AUTH_PATH))
            .basic_auth(&creds.username, Some(&creds.password))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::AuthFailed(format!("HTTP {}", status.as_u16())));
        }

        let body = resp.text().await.map_err(ApiError::from_reqwest)?;
        // Some deployments answer bad credentials with a 200 login page.
        if body.to_ascii_lowercase().contains("<html") {
            return Err(ApiError::AuthFailed(
                "invalid credentials or expired password".to_string(),
            ));
        }

        Ok(body.trim().to_string())
    }

    /// Revoke the session server-side (best effort) and drop local state.
    pub async fn logout(&self) -> bool {
        let token = self.token.write().await.take();
        if let Some(token) = token {
            let result = self
                .http
                .delete(self.url_for(AUTH_PATH))
                .header(header::COOKIE, format!("{SESSION_COOKIE}={token}"))
                .timeout(self.timeout)
                .send()
                .await;
            if let Err(err) = result {
                tracing::debug!(error = %err, "logout request failed");
            }
        }
        self.store.clear()
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        payload: Payload,
    ) -> Result<ApiResponse, ApiError> {
        let retry = self.retry;
        let resp = self.execute(method, path, query, payload, &retry).await?;
        let status = resp.status().as_u16();
        let body = ResponseBody::resolve(resp).await?;
        Ok(ApiResponse { status, body })
    }

    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<ApiResponse, ApiError> {
        self.request(Method::GET, path, query, Payload::Empty).await
    }

    pub async fn post(
        &self,
        path: &str,
        query: &[(&str, String)],
        payload: Payload,
    ) -> Result<ApiResponse, ApiError> {
        self.request(Method::POST, path, query, payload).await
    }

    pub async fn put(
        &self,
        path: &str,
        query: &[(&str, String)],
        payload: Payload,
    ) -> Result<ApiResponse, ApiError> {
        self.request(Method::PUT, path, query, payload).await
    }

    pub async fn delete(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<ApiResponse, ApiError> {
        self.request(Method::DELETE, path, query, Payload::Empty)
            .await
    }

    /// GET forcing `format=json` and a resolved JSON body.
    pub async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, ApiError> {
        let mut query: Vec<(&str, String)> = query.to_vec();
        if !query.iter().any(|(k, _)| *k == "format") {
            query.push(("format", "json".to_string()));
        }
        let resp = self.get(path, &query).await?;
        resp.body.into_json()
    }

    /// GET returning the unconsumed response for chunked body streaming.
    /// No overall timeout: large archives stream for as long as they need.
    pub async fn get_stream(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, ApiError> {
        let retry = self.retry;
        self.execute_with_timeout(Method::GET, path, query, Payload::Empty, &retry, None)
            .await
    }

    /// Check server connectivity and measure round-trip latency.
    pub async fn ping(&self) -> Result<ServerStatus, ApiError> {
        let started = Instant::now();
        let resp = self.get("/data/version", &[]).await?;
        let version = resp.body.into_text()?.trim().to_string();

        Ok(ServerStatus {
            url: self.base_url.clone(),
            version,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Current username according to the server.
    pub async fn whoami(&self) -> Result<String, ApiError> {
        let resp = self.get("/data/user", &[]).await?;
        match resp.body {
            ResponseBody::Text(text) => Ok(text.trim().to_string()),
            ResponseBody::Json(value) => extract_login(&value).ok_or_else(|| {
                ApiError::Validation("unrecognized user payload from server".to_string())
            }),
            ResponseBody::Binary(_) => Err(ApiError::Validation(
                "unexpected binary body from user endpoint".to_string(),
            )),
        }
    }
}

fn extract_login(value: &serde_json::Value) -> Option<String> {
    let direct = value.get("login").and_then(|v| v.as_str());
    let nested = value
        .get("ResultSet")
        .and_then(|r| r.get("Result"))
        .and_then(|r| r.get(0))
        .and_then(|r| r.get("login"))
        .and_then(|v| v.as_str());

    direct
        .or(nested)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn normalize_base_url(url: &str) -> Result<String, ApiError> {
    let trimmed = url.trim().trim_end_matches('/');
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(ApiError::Validation(format!(
            "server URL must start with http:// or https://: {url}"
        )));
    }
    Ok(trimmed.to_string())
}

fn snippet(body: &str) -> String {
    if body.len() <= BODY_SNIPPET_LIMIT {
        return body.to_string();
    }
    let mut end = BODY_SNIPPET_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
