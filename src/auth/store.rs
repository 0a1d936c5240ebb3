// Credential storage strategies

use chrono::Utc;
use std::sync::Arc;

use super::types::{CredentialPair, TokenKind};
use crate::config::{Config, SameSite, TokenStorageType};
use crate::storage::{ClientStorage, StoredCookie};

/// Where a credential pair physically lives
pub trait TokenBackend: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;

    /// `max_age_secs` only matters to backends that expire entries
    fn write(&self, key: &str, value: &str, max_age_secs: u64);

    fn remove(&self, key: &str);

    /// Header value to send alongside requests to `url`, if any
    fn cookie_header(&self, _url: &reqwest::Url) -> Option<String> {
        None
    }
}

/// Plain key/value storage
///
/// Without client storage every read is absent and every write is dropped.
pub struct LocalStorageBackend {
    storage: Option<Arc<ClientStorage>>,
}

impl LocalStorageBackend {
    pub fn new(storage: Option<Arc<ClientStorage>>) -> Self {
        Self { storage }
    }
}

impl TokenBackend for LocalStorageBackend {
    fn read(&self, key: &str) -> Option<String> {
        let storage = self.storage.as_ref()?;
        match storage.get(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %key, "Token read failed: {:#}", e);
                None
            }
        }
    }

    fn write(&self, key: &str, value: &str, _max_age_secs: u64) {
        let Some(storage) = self.storage.as_ref() else {
            return;
        };
        if let Err(e) = storage.set(key, value) {
            tracing::warn!(key = %key, "Token write failed: {:#}", e);
        }
    }

    fn remove(&self, key: &str) {
        let Some(storage) = self.storage.as_ref() else {
            return;
        };
        if let Err(e) = storage.remove(key) {
            tracing::warn!(key = %key, "Token removal failed: {:#}", e);
        }
    }
}

/// Cookie records with secure, SameSite and Max-Age attributes
pub struct CookieBackend {
    storage: Option<Arc<ClientStorage>>,
    secure: bool,
    same_site: SameSite,
}

impl CookieBackend {
    pub fn new(storage: Option<Arc<ClientStorage>>, secure: bool, same_site: SameSite) -> Self {
        Self {
            storage,
            secure,
            same_site,
        }
    }
}

impl TokenBackend for CookieBackend {
    fn read(&self, key: &str) -> Option<String> {
        let storage = self.storage.as_ref()?;
        let cookie = match storage.cookie(key) {
            Ok(cookie) => cookie?,
            Err(e) => {
                tracing::warn!(cookie = %key, "Cookie read failed: {:#}", e);
                return None;
            }
        };

        if cookie.is_expired(Utc::now().timestamp()) {
            tracing::debug!(cookie = %key, "Cookie expired, purging");
            if let Err(e) = storage.remove_cookie(key) {
                tracing::warn!(cookie = %key, "Cookie purge failed: {:#}", e);
            }
            return None;
        }

        Some(cookie.value)
    }

    fn write(&self, key: &str, value: &str, max_age_secs: u64) {
        let Some(storage) = self.storage.as_ref() else {
            return;
        };
        let cookie = StoredCookie {
            name: key.to_string(),
            value: value.to_string(),
            secure: self.secure,
            same_site: self.same_site.as_str().to_string(),
            expires_at: Utc::now().timestamp() + max_age_secs as i64,
        };
        if let Err(e) = storage.put_cookie(&cookie) {
            tracing::warn!(cookie = %key, "Cookie write failed: {:#}", e);
        }
    }

    fn remove(&self, key: &str) {
        let Some(storage) = self.storage.as_ref() else {
            return;
        };
        if let Err(e) = storage.remove_cookie(key) {
            tracing::warn!(cookie = %key, "Cookie removal failed: {:#}", e);
        }
    }

    fn cookie_header(&self, url: &reqwest::Url) -> Option<String> {
        let storage = self.storage.as_ref()?;
        let cookies = match storage.cookies() {
            Ok(cookies) => cookies,
            Err(e) => {
                tracing::warn!("Cookie listing failed: {:#}", e);
                return None;
            }
        };

        let now = Utc::now().timestamp();
        let https = url.scheme() == "https";
        let pairs: Vec<String> = cookies
            .into_iter()
            .filter(|c| !c.is_expired(now))
            .filter(|c| https || !c.secure)
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}

/// Reads, writes and clears the credential pair
pub struct TokenStore {
    backend: Box<dyn TokenBackend>,
    access_key: String,
    refresh_key: String,
    access_expiry: u64,
    refresh_expiry: u64,
}

impl TokenStore {
    pub fn new(backend: Box<dyn TokenBackend>, config: &Config) -> Self {
        Self {
            backend,
            access_key: config.access_token_key.clone(),
            refresh_key: config.refresh_token_key.clone(),
            access_expiry: config.access_token_expiry,
            refresh_expiry: config.refresh_token_expiry,
        }
    }

    /// Pick the backend named by `config.token_storage`
    pub fn from_config(config: &Config, storage: Option<Arc<ClientStorage>>) -> Self {
        let backend: Box<dyn TokenBackend> = match config.token_storage {
            TokenStorageType::Local => Box::new(LocalStorageBackend::new(storage)),
            TokenStorageType::Cookie => Box::new(CookieBackend::new(
                storage,
                config.cookie_secure,
                config.cookie_same_site,
            )),
        };
        Self::new(backend, config)
    }

    fn key(&self, kind: TokenKind) -> &str {
        match kind {
            TokenKind::Access => &self.access_key,
            TokenKind::Refresh => &self.refresh_key,
        }
    }

    pub fn get(&self, kind: TokenKind) -> Option<String> {
        self.backend
            .read(self.key(kind))
            .filter(|value| !value.is_empty())
    }

    /// Write the members of `pair` that are present and non-empty
    pub fn set(&self, pair: &CredentialPair) {
        if let Some(access) = pair.access_token.as_deref().filter(|t| !t.is_empty()) {
            self.backend
                .write(&self.access_key, access, self.access_expiry);
        }
        if let Some(refresh) = pair.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            self.backend
                .write(&self.refresh_key, refresh, self.refresh_expiry);
        }
    }

    pub fn clear(&self) {
        self.backend.remove(&self.access_key);
        self.backend.remove(&self.refresh_key);
    }

    pub fn is_authenticated(&self) -> bool {
        self.get(TokenKind::Access).is_some()
    }

    /// Cookie header for a request to `url`, when the backend keeps cookies
    pub(crate) fn cookie_header(&self, url: &reqwest::Url) -> Option<String> {
        self.backend.cookie_header(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> Arc<ClientStorage> {
        Arc::new(ClientStorage::in_memory().unwrap())
    }

    fn cookie_config() -> Config {
        Config {
            token_storage: TokenStorageType::Cookie,
            ..Config::default()
        }
    }

    #[test]
    fn test_local_set_get_clear() {
        let store = TokenStore::from_config(&Config::default(), Some(storage()));
        assert!(!store.is_authenticated());

        store.set(&CredentialPair::new("a1", "r1"));
        assert!(store.is_authenticated());
        assert_eq!(store.get(TokenKind::Access), Some("a1".to_string()));
        assert_eq!(store.get(TokenKind::Refresh), Some("r1".to_string()));

        store.clear();
        assert!(!store.is_authenticated());
        assert_eq!(store.get(TokenKind::Refresh), None);
    }

    #[test]
    fn test_set_writes_only_present_members() {
        let store = TokenStore::from_config(&Config::default(), Some(storage()));
        store.set(&CredentialPair::new("a1", "r1"));

        store.set(&CredentialPair::access_only("a2"));
        assert_eq!(store.get(TokenKind::Access), Some("a2".to_string()));
        assert_eq!(store.get(TokenKind::Refresh), Some("r1".to_string()));

        store.set(&CredentialPair {
            access_token: Some(String::new()),
            refresh_token: None,
        });
        assert_eq!(store.get(TokenKind::Access), Some("a2".to_string()));
    }

    #[test]
    fn test_local_uses_configured_keys() {
        let shared = storage();
        let config = Config {
            access_token_key: "at".to_string(),
            refresh_token_key: "rt".to_string(),
            ..Config::default()
        };
        let store = TokenStore::from_config(&config, Some(shared.clone()));
        store.set(&CredentialPair::new("a1", "r1"));

        assert_eq!(shared.get("at").unwrap(), Some("a1".to_string()));
        assert_eq!(shared.get("rt").unwrap(), Some("r1".to_string()));
    }

    #[test]
    fn test_without_storage_is_noop() {
        let store = TokenStore::from_config(&Config::default(), None);
        store.set(&CredentialPair::new("a1", "r1"));
        assert_eq!(store.get(TokenKind::Access), None);
        store.clear();
        assert!(!store.is_authenticated());

        let store = TokenStore::from_config(&cookie_config(), None);
        store.set(&CredentialPair::new("a1", "r1"));
        assert_eq!(store.get(TokenKind::Access), None);
    }

    #[test]
    fn test_cookie_attributes() {
        let shared = storage();
        let config = Config {
            cookie_secure: true,
            cookie_same_site: SameSite::Lax,
            ..cookie_config()
        };
        let store = TokenStore::from_config(&config, Some(shared.clone()));
        let before = Utc::now().timestamp();
        store.set(&CredentialPair::new("a1", "r1"));

        let access = shared.cookie("accessToken").unwrap().unwrap();
        assert!(access.secure);
        assert_eq!(access.same_site, "Lax");
        assert!(access.expires_at >= before + 900);
        assert!(access.expires_at <= Utc::now().timestamp() + 900);

        let refresh = shared.cookie("refreshToken").unwrap().unwrap();
        assert!(refresh.expires_at >= before + 2_592_000);
    }

    #[test]
    fn test_expired_cookie_reads_absent_and_is_purged() {
        let shared = storage();
        shared
            .put_cookie(&StoredCookie {
                name: "accessToken".to_string(),
                value: "old".to_string(),
                secure: false,
                same_site: "Strict".to_string(),
                expires_at: Utc::now().timestamp() - 10,
            })
            .unwrap();

        let store = TokenStore::from_config(&cookie_config(), Some(shared.clone()));
        assert_eq!(store.get(TokenKind::Access), None);
        assert!(shared.cookie("accessToken").unwrap().is_none());
    }

    #[test]
    fn test_cookie_clear_removes_both() {
        let shared = storage();
        let store = TokenStore::from_config(&cookie_config(), Some(shared.clone()));
        store.set(&CredentialPair::new("a1", "r1"));
        store.clear();
        assert!(shared.cookies().unwrap().is_empty());
    }

    #[test]
    fn test_cookie_header_respects_secure_flag() {
        let shared = storage();
        let config = Config {
            cookie_secure: true,
            ..cookie_config()
        };
        let store = TokenStore::from_config(&config, Some(shared));
        store.set(&CredentialPair::new("a1", "r1"));

        let https = reqwest::Url::parse("https://api.example.com/x").unwrap();
        assert_eq!(
            store.cookie_header(&https),
            Some("accessToken=a1; refreshToken=r1".to_string())
        );

        let http = reqwest::Url::parse("http://api.example.com/x").unwrap();
        assert_eq!(store.cookie_header(&http), None);
    }

    #[test]
    fn test_local_backend_has_no_cookie_header() {
        let store = TokenStore::from_config(&Config::default(), Some(storage()));
        store.set(&CredentialPair::new("a1", "r1"));
        let url = reqwest::Url::parse("http://localhost:8000/").unwrap();
        assert_eq!(store.cookie_header(&url), None);
    }
}
