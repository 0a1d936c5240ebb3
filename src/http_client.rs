// Authenticated HTTP transport
// Correlation ids, bearer credentials, 401 renewal replay and 429 backoff replay

use anyhow::Context;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, COOKIE, USER_AGENT};
use reqwest::{Client, Method, Request, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth::{RefreshCoordinator, TokenKind, TokenStore};
use crate::config::{join_url, Config};
use crate::error::{AuthError, ClientError, Result};
use crate::metrics::TransportMetrics;

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Reset values above this are absolute Unix timestamps, not durations
const EPOCH_THRESHOLD: i64 = 1_000_000_000;

/// Build the shared reqwest client with the configured timeout and default headers
pub fn build_http_client(config: &Config) -> anyhow::Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("octane-client/", env!("CARGO_PKG_VERSION"))),
    );

    Client::builder()
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .default_headers(headers)
        .build()
        .context("Failed to create HTTP client")
}

/// Short correlation id (8 hex chars)
pub fn generate_request_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// HTTP client for the remote API with credential handling
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    base_url: String,

    store: Arc<TokenStore>,

    coordinator: Arc<RefreshCoordinator>,

    metrics: Arc<TransportMetrics>,

    /// Delay before replaying a 429 that carries no usable header
    default_rate_limit_delay: Duration,
}

impl ApiClient {
    pub fn new(
        client: Client,
        config: &Config,
        store: Arc<TokenStore>,
        coordinator: Arc<RefreshCoordinator>,
        metrics: Arc<TransportMetrics>,
    ) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            store,
            coordinator,
            metrics,
            default_rate_limit_delay: Duration::from_millis(config.rate_limit_default_delay_ms),
        }
    }

    pub fn metrics(&self) -> &Arc<TransportMetrics> {
        &self.metrics
    }

    pub fn token_store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Absolute URL for a path or URL returned by the endpoint registry
    pub fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// Start a request against `path`; finish it with [`ApiClient::send`]
    pub fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client.request(method, self.url(path))
    }

    pub async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Response> {
        let request = builder.build()?;
        self.execute(request).await
    }

    /// Execute a request through the credential and rate-limit handling
    ///
    /// - 401: renews the access token once and replays
    /// - 429: waits for the advertised delay and replays, with no cap
    /// - other non-2xx: returned as `ClientError::Api`
    pub async fn execute(&self, mut request: Request) -> Result<Response> {
        let managed_cookie = self.prepare(&mut request);

        let method = request.method().clone();
        let url = request.url().clone();
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        tracing::debug!(
            method = %method,
            url = %url,
            request_id = %request_id,
            "Sending HTTP request"
        );

        let mut retried = false;

        loop {
            // Replays resend the identical method, URL, headers and body
            let req = request.try_clone().ok_or_else(|| {
                ClientError::Internal(anyhow::anyhow!("Request body is not cloneable"))
            })?;

            let started = Instant::now();
            let result = self.client.execute(req).await;
            self.metrics
                .record_request(started.elapsed().as_secs_f64() * 1000.0);

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    let error_kind = if e.is_timeout() {
                        "timeout"
                    } else if e.is_connect() {
                        "connection_failed"
                    } else if e.is_request() {
                        "request_error"
                    } else if e.is_body() {
                        "body_error"
                    } else {
                        "unknown"
                    };

                    tracing::warn!(
                        error_kind = error_kind,
                        error = %e,
                        url = %url,
                        request_id = %request_id,
                        "HTTP request error"
                    );
                    self.metrics.record_error(error_kind);
                    return Err(ClientError::Http(e));
                }
            };

            let status = response.status();
            tracing::debug!(status = %status, request_id = %request_id, "Received HTTP response");

            if status.is_success() {
                self.observe_rate_limit(response.headers());
                return Ok(response);
            }

            match status.as_u16() {
                401 => {
                    if retried {
                        tracing::warn!(
                            url = %url,
                            request_id = %request_id,
                            "Still unauthorized after token renewal"
                        );
                        self.metrics.record_error("unauthorized");
                        return Err(AuthError::StillUnauthorized.into());
                    }
                    retried = true;

                    tracing::warn!(request_id = %request_id, "Received 401, renewing access token...");
                    let token = match self.coordinator.refresh().await {
                        Ok(token) => token,
                        Err(e) => {
                            self.metrics.record_error("auth_expired");
                            return Err(ClientError::AuthenticationExpired(e));
                        }
                    };

                    let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
                        .map_err(|e| {
                            ClientError::Internal(anyhow::anyhow!("Invalid access token: {}", e))
                        })?;
                    request.headers_mut().insert(AUTHORIZATION, bearer);
                    if managed_cookie {
                        match self.stored_cookie(&url) {
                            Some(cookie) => request.headers_mut().insert(COOKIE, cookie),
                            None => request.headers_mut().remove(COOKIE),
                        };
                    }
                    self.metrics.record_auth_replay();
                    continue;
                }

                429 => {
                    let delay = rate_limit_delay(response.headers(), self.default_rate_limit_delay);
                    tracing::warn!(
                        url = %url,
                        request_id = %request_id,
                        "Rate limited, replaying after {}ms",
                        delay.as_millis()
                    );
                    self.metrics.record_rate_limited();
                    tokio::time::sleep(delay).await;
                    continue;
                }

                _ => {}
            }

            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                status = status.as_u16(),
                url = %url,
                request_id = %request_id,
                response_body = %error_text,
                "HTTP request failed with error response"
            );
            self.metrics.record_error(&format!("http_{}", status.as_u16()));
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }
    }

    /// Attach correlation id and credentials unless the caller already did
    ///
    /// Returns true when the cookie header came from the token store.
    fn prepare(&self, request: &mut Request) -> bool {
        let url = request.url().clone();
        let headers = request.headers_mut();

        if !headers.contains_key(REQUEST_ID_HEADER) {
            if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
                headers.insert(REQUEST_ID_HEADER, value);
            }
        }

        if !headers.contains_key(AUTHORIZATION) {
            if let Some(token) = self.store.get(TokenKind::Access) {
                match HeaderValue::from_str(&format!("Bearer {}", token)) {
                    Ok(value) => {
                        headers.insert(AUTHORIZATION, value);
                    }
                    Err(_) => tracing::warn!("Stored access token is not a valid header value"),
                }
            }
        }

        if headers.contains_key(COOKIE) {
            return false;
        }
        if let Some(cookie) = self.stored_cookie(&url) {
            headers.insert(COOKIE, cookie);
        }
        true
    }

    fn stored_cookie(&self, url: &reqwest::Url) -> Option<HeaderValue> {
        let cookie = self.store.cookie_header(url)?;
        HeaderValue::from_str(&cookie).ok()
    }

    /// Log and record rate-limit headers when all three are present
    fn observe_rate_limit(&self, headers: &HeaderMap) {
        let limit = header_value::<u64>(headers, "x-ratelimit-limit");
        let remaining = header_value::<u64>(headers, "x-ratelimit-remaining");
        let reset = header_value::<i64>(headers, "x-ratelimit-reset");

        let (Some(limit), Some(remaining), Some(reset)) = (limit, remaining, reset) else {
            return;
        };

        let seconds_until_reset = seconds_until(reset);
        let reset_time = Utc::now() + chrono::Duration::seconds(seconds_until_reset);

        tracing::debug!(
            limit = limit,
            remaining = remaining,
            reset_time = %reset_time.to_rfc3339(),
            seconds_until_reset = seconds_until_reset,
            "Rate limit status"
        );
        self.metrics.record_rate_limit_status(limit, remaining, reset);
    }

    /// Send a JSON request and decode the JSON response
    pub async fn send_json<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut builder = self.request(method, path);
        if let Some(body) = body {
            let bytes = Bytes::from(
                serde_json::to_vec(body).context("Failed to serialize request body")?,
            );
            builder = builder.body(bytes);
        }

        let response = self.send(builder).await?;
        decode_json(response).await
    }

    /// GET with URL query parameters
    pub async fn get_query<Q, T>(&self, path: &str, query: &Q) -> Result<T>
    where
        Q: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let builder = self.request(Method::GET, path).query(query);
        let response = self.send(builder).await?;
        decode_json(response).await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json::<(), T>(Method::GET, path, None).await
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(Method::POST, path, Some(body)).await
    }

    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(Method::PUT, path, Some(body)).await
    }

    pub async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json::<(), T>(Method::DELETE, path, None).await
    }
}

/// Decode a JSON body; an empty body decodes as `null`
async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    let payload: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
    let data = serde_json::from_slice(payload).context("Failed to parse response body")?;
    Ok(data)
}

fn header_value<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Seconds until `reset`, which is either a duration or an epoch timestamp
fn seconds_until(reset: i64) -> i64 {
    if reset > EPOCH_THRESHOLD {
        match Utc.timestamp_opt(reset, 0).single() {
            Some(at) => (at - Utc::now()).num_seconds().max(0),
            None => 0,
        }
    } else {
        reset.max(0)
    }
}

/// How long to wait before replaying a 429
///
/// `retry-after` wins, then `x-ratelimit-reset`, then `default`.
pub fn rate_limit_delay(headers: &HeaderMap, default: Duration) -> Duration {
    if let Some(secs) = header_value::<u64>(headers, "retry-after") {
        return Duration::from_secs(secs);
    }
    if let Some(reset) = header_value::<i64>(headers, "x-ratelimit-reset") {
        return Duration::from_secs(seconds_until(reset) as u64);
    }
    default
}
