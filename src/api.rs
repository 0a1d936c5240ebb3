// Application API facade
// Wires storage, credentials, transport and endpoint registry together

use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::{LoggingRedirect, LoginRedirect, RefreshCoordinator, TokenStore};
use crate::config::Config;
use crate::endpoints::EndpointRegistry;
use crate::error::Result;
use crate::http_client::{build_http_client, ApiClient};
use crate::metrics::TransportMetrics;
use crate::storage::ClientStorage;

/// Client for the remote API
///
/// Every call resolves its URL through the endpoint registry and goes
/// through the authenticated transport.
pub struct OctaneApi {
    config: Config,
    storage: Option<Arc<ClientStorage>>,
    tokens: Arc<TokenStore>,
    client: ApiClient,
    endpoints: EndpointRegistry,
}

impl OctaneApi {
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        Self::with_redirect(config, Arc::new(LoggingRedirect))
    }

    /// Build with a custom login navigation hook
    pub fn with_redirect(config: Config, redirect: Arc<dyn LoginRedirect>) -> anyhow::Result<Self> {
        let storage = open_storage(&config);
        let http = build_http_client(&config)?;
        let metrics = Arc::new(TransportMetrics::new());

        let tokens = Arc::new(TokenStore::from_config(&config, storage.clone()));
        let coordinator = Arc::new(RefreshCoordinator::new(
            http.clone(),
            config.base_url.clone(),
            config.refresh_endpoint.clone(),
            config.login_redirect.clone(),
            tokens.clone(),
            redirect,
            metrics.clone(),
        ));
        let client = ApiClient::new(http.clone(), &config, tokens.clone(), coordinator, metrics);
        let endpoints = EndpointRegistry::new(&config, http, storage.clone());

        Ok(Self {
            config,
            storage,
            tokens,
            client,
            endpoints,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> Option<&Arc<ClientStorage>> {
        self.storage.as_ref()
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn endpoints(&self) -> &EndpointRegistry {
        &self.endpoints
    }

    pub fn metrics(&self) -> &Arc<TransportMetrics> {
        self.client.metrics()
    }

    /// Load the endpoint registry
    pub async fn initialize(&self) {
        self.endpoints.initialize().await;
    }

    pub async fn health(&self) -> Result<Value> {
        let url = self.endpoints.resolve("system.health")?;
        self.client.get(&url).await
    }

    /// Provider auth status; failures read as "disabled" instead of erroring
    pub async fn auth_status(&self) -> Value {
        let result = match self.endpoints.resolve("auth.google.status") {
            Ok(url) => self.client.get::<Value>(&url).await,
            Err(e) => Err(e),
        };

        result.unwrap_or_else(|e| {
            tracing::error!("Auth status check failed: {}", e);
            json!({"success": false, "data": {"enabled": false}})
        })
    }

    pub async fn current_user(&self) -> Result<Value> {
        let url = self.endpoints.resolve("v1.users.me")?;
        self.client.get(&url).await
    }

    pub async fn create_brand(&self, brand: &Value) -> Result<Value> {
        let url = self.endpoints.resolve("v1.brands.base")?;
        self.client.post(&url, brand).await
    }

    pub async fn list_brands(&self, filters: &[(String, String)]) -> Result<Value> {
        let url = self.endpoints.resolve("v1.brands.base")?;
        self.client.get_query(&url, filters).await
    }

    pub async fn get_brand(&self, brand_id: &str) -> Result<Value> {
        let url = self
            .endpoints
            .resolve_with_params("v1.brands.single", [("id", brand_id)])?;
        self.client.get(&url).await
    }

    pub async fn update_brand(&self, brand_id: &str, updates: &Value) -> Result<Value> {
        let url = self
            .endpoints
            .resolve_with_params("v1.brands.single", [("id", brand_id)])?;
        self.client.put(&url, updates).await
    }

    pub async fn delete_brand(&self, brand_id: &str) -> Result<()> {
        let url = self
            .endpoints
            .resolve_with_params("v1.brands.single", [("id", brand_id)])?;
        self.client.delete::<Value>(&url).await?;
        Ok(())
    }

    pub async fn create_icp(&self, icp: &Value) -> Result<Value> {
        let url = self.endpoints.resolve("v1.icps.base")?;
        self.client.post(&url, icp).await
    }

    pub async fn list_icps(&self, filters: &[(String, String)]) -> Result<Value> {
        let url = self.endpoints.resolve("v1.icps.base")?;
        self.client.get_query(&url, filters).await
    }

    pub async fn get_icp(&self, icp_id: &str) -> Result<Value> {
        let url = self
            .endpoints
            .resolve_with_params("v1.icps.single", [("id", icp_id)])?;
        self.client.get(&url).await
    }

    pub async fn associate_brand_icp(
        &self,
        brand_id: &str,
        icp_id: &str,
        options: &Value,
    ) -> Result<Value> {
        let url = self.endpoints.resolve_with_params(
            "v1.brands.icps",
            [("brandId", brand_id), ("icpId", icp_id)],
        )?;
        self.client.post(&url, options).await
    }

    pub async fn remove_brand_icp(&self, brand_id: &str, icp_id: &str) -> Result<()> {
        let url = self.endpoints.resolve_with_params(
            "v1.brands.icps",
            [("brandId", brand_id), ("icpId", icp_id)],
        )?;
        self.client.delete::<Value>(&url).await?;
        Ok(())
    }
}

/// Open client storage; `None` when it cannot be opened
fn open_storage(config: &Config) -> Option<Arc<ClientStorage>> {
    let result = match &config.storage_file {
        Some(path) => ClientStorage::open(path),
        None => ClientStorage::in_memory(),
    };

    match result {
        Ok(storage) => Some(Arc::new(storage)),
        Err(e) => {
            tracing::warn!("Client storage unavailable, credentials will not persist: {:#}", e);
            None
        }
    }
}
