// Endpoint registry
// Cache first, then remote fetch with backoff, always backed by the fallback tree

use anyhow::Context;
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use super::cache::EndpointCache;
use super::fallback::fallback_endpoints;
use super::tree::{fill_template, EndpointTree};
use crate::config::{join_url, Config};
use crate::error::{ClientError, Result};
use crate::storage::ClientStorage;

/// Fixed timeout for the registry fetch
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
struct EndpointsResponse {
    endpoints: Option<EndpointTree>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

type LoadFuture = Shared<BoxFuture<'static, ()>>;

struct Inner {
    client: Client,
    base_url: String,
    endpoints_path: String,
    retry_attempts: u32,
    retry_delay: Duration,
    fallback: EndpointTree,
    live: RwLock<Arc<EndpointTree>>,
    ready: AtomicBool,
    cache: EndpointCache,
    load: Mutex<Option<LoadFuture>>,
}

/// Logical endpoint name → URL lookup
///
/// Cheap to clone; clones share the same tree and cache.
#[derive(Clone)]
pub struct EndpointRegistry {
    inner: Arc<Inner>,
}

impl EndpointRegistry {
    pub fn new(config: &Config, client: Client, storage: Option<Arc<ClientStorage>>) -> Self {
        let fallback = fallback_endpoints();
        let cache = EndpointCache::new(
            storage,
            config.endpoints_cache_key.clone(),
            config.endpoints_cache_ttl_ms,
        );

        Self {
            inner: Arc::new(Inner {
                client,
                base_url: config.base_url.clone(),
                endpoints_path: config.endpoints_path.clone(),
                retry_attempts: config.endpoints_retry_attempts.max(1),
                retry_delay: Duration::from_millis(config.endpoints_retry_delay_ms),
                live: RwLock::new(Arc::new(fallback.clone())),
                fallback,
                ready: AtomicBool::new(false),
                cache,
                load: Mutex::new(None),
            }),
        }
    }

    /// Load endpoints once; concurrent and repeated calls share the same load
    pub async fn initialize(&self) {
        let load = {
            let mut slot = self.inner.load.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(load) => load.clone(),
                None => {
                    let registry = self.clone();
                    let load = async move { registry.load().await }.boxed().shared();
                    *slot = Some(load.clone());
                    load
                }
            }
        };

        load.await
    }

    /// Drop the cached snapshot and load again
    pub async fn refresh(&self) {
        tracing::info!("Refreshing endpoints...");
        self.inner.cache.clear();
        self.inner.ready.store(false, Ordering::Release);
        {
            let mut slot = self.inner.load.lock().unwrap_or_else(|e| e.into_inner());
            *slot = None;
        }
        self.initialize().await;
    }

    async fn load(&self) {
        if let Some(snapshot) = self.inner.cache.read() {
            tracing::info!(
                version = %snapshot.version,
                age_ms = self.inner.cache.age_ms(&snapshot),
                "Loaded endpoints from cache"
            );
            self.apply(&snapshot.endpoints);

            if self.inner.cache.is_expiring(&snapshot) {
                tracing::debug!("Endpoint cache past half its TTL, refreshing in background");
                let registry = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = registry.fetch_and_store().await {
                        tracing::warn!("Background endpoint refresh failed: {}", e);
                    }
                });
            }
            return;
        }

        if let Err(e) = self.fetch_with_retry().await {
            tracing::warn!(
                attempts = self.inner.retry_attempts,
                "Failed to load endpoints, using fallback: {}",
                e
            );
            self.inner.ready.store(true, Ordering::Release);
        }
    }

    async fn fetch_with_retry(&self) -> Result<()> {
        let attempts = self.inner.retry_attempts;
        let mut attempt = 1;

        loop {
            match self.fetch_and_store().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        "Endpoint fetch failed: {}, retrying after {}ms (attempt {}/{})",
                        e,
                        delay.as_millis(),
                        attempt,
                        attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// retry_delay * 2^(attempt - 1)
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.inner.retry_delay.saturating_mul(factor)
    }

    async fn fetch_and_store(&self) -> Result<()> {
        let data = self.fetch_from_api().await?;
        let endpoints = data.endpoints.ok_or_else(|| {
            ClientError::Internal(anyhow::anyhow!("Endpoints response does not contain endpoints"))
        })?;

        let version = data.version.unwrap_or_default();
        let timestamp = data.timestamp.unwrap_or_default();

        self.apply(&endpoints);
        self.inner.cache.write(&endpoints, &version, &timestamp);

        tracing::info!(version = %version, groups = endpoints.len(), "Endpoints loaded from API");
        Ok(())
    }

    async fn fetch_from_api(&self) -> Result<EndpointsResponse> {
        let url = join_url(&self.inner.base_url, &self.inner.endpoints_path);
        tracing::debug!(url = %url, "Fetching endpoints");

        let response = self
            .inner
            .client
            .get(&url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let body = response.text().await?;
        let data = serde_json::from_str::<EndpointsResponse>(&body)
            .context("Failed to parse endpoints response")?;
        Ok(data)
    }

    fn apply(&self, fetched: &EndpointTree) {
        let merged = Arc::new(self.inner.fallback.overlay(fetched));
        {
            let mut live = self.inner.live.write().unwrap_or_else(|e| e.into_inner());
            *live = merged;
        }
        self.inner.ready.store(true, Ordering::Release);
    }

    fn live(&self) -> Arc<EndpointTree> {
        let live = self.inner.live.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&live)
    }

    /// URL for a dot-separated endpoint path
    pub fn resolve(&self, path: &str) -> Result<String> {
        if !self.is_ready() {
            tracing::warn!(path = %path, "Endpoints not loaded yet, resolving against fallback");
        }
        self.live().resolve(path).map(str::to_string)
    }

    /// URL for `path` with `:name` / `{name}` parameters filled in
    pub fn resolve_with_params<I, K, V>(&self, path: &str, params: I) -> Result<String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let template = self.resolve(path)?;
        Ok(fill_template(&template, params))
    }

    /// Current merged tree
    pub fn all(&self) -> EndpointTree {
        self.live().as_ref().clone()
    }

    pub fn has(&self, path: &str) -> bool {
        self.live().has(path)
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    pub fn fallback(&self) -> &EndpointTree {
        &self.inner.fallback
    }
}
