use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

/// Default values shared by the CLI and library callers
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_REFRESH_ENDPOINT: &str = "/api/auth/refresh";
pub const DEFAULT_LOGIN_REDIRECT: &str = "/auth/login";
pub const DEFAULT_ENDPOINTS_PATH: &str = "/api/endpoints";
pub const DEFAULT_ENDPOINTS_CACHE_KEY: &str = "api_endpoints";
pub const DEFAULT_ENDPOINTS_CACHE_TTL_MS: u64 = 15 * 60 * 1000;
pub const DEFAULT_RATE_LIMIT_DELAY_MS: u64 = 60_000;

/// Connection and storage options shared by every command
#[derive(Args, Debug, Clone)]
pub struct CliArgs {
    /// Base URL of the remote API
    #[arg(short = 'u', long, env = "API_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Request timeout in milliseconds
    #[arg(short = 't', long = "timeout", env = "API_TIMEOUT", default_value = "10000")]
    pub timeout_ms: u64,

    /// Where credentials are kept (local, cookie)
    #[arg(long, env = "TOKEN_STORAGE_TYPE", default_value = "local")]
    pub token_storage: String,

    /// Path to the client storage database
    #[arg(short = 's', long, env = "CLIENT_STORAGE_FILE")]
    pub storage_file: Option<String>,

    /// Keep all client state in memory for this run only
    #[arg(long, default_value = "false")]
    pub ephemeral: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Endpoint registry retry attempts
    #[arg(long, env = "ENDPOINTS_RETRY_ATTEMPTS", default_value = "3")]
    pub endpoints_retries: u32,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Transport
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub rate_limit_default_delay_ms: u64,

    // Credentials
    pub token_storage: TokenStorageType,
    pub cookie_secure: bool,
    pub cookie_same_site: SameSite,
    pub refresh_endpoint: String,
    pub login_redirect: String,
    pub access_token_key: String,
    pub refresh_token_key: String,
    pub access_token_expiry: u64,
    pub refresh_token_expiry: u64,

    // Endpoint registry
    pub endpoints_path: String,
    pub endpoints_cache_key: String,
    pub endpoints_cache_ttl_ms: u64,
    pub endpoints_retry_attempts: u32,
    pub endpoints_retry_delay_ms: u64,

    // Client storage (None keeps everything in memory)
    pub storage_file: Option<PathBuf>,

    // Logging
    pub log_level: String,
    pub log_json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStorageType {
    Local,
    Cookie,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            rate_limit_default_delay_ms: DEFAULT_RATE_LIMIT_DELAY_MS,
            token_storage: TokenStorageType::Local,
            cookie_secure: false,
            cookie_same_site: SameSite::Strict,
            refresh_endpoint: DEFAULT_REFRESH_ENDPOINT.to_string(),
            login_redirect: DEFAULT_LOGIN_REDIRECT.to_string(),
            access_token_key: "accessToken".to_string(),
            refresh_token_key: "refreshToken".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 2_592_000,
            endpoints_path: DEFAULT_ENDPOINTS_PATH.to_string(),
            endpoints_cache_key: DEFAULT_ENDPOINTS_CACHE_KEY.to_string(),
            endpoints_cache_ttl_ms: DEFAULT_ENDPOINTS_CACHE_TTL_MS,
            endpoints_retry_attempts: 3,
            endpoints_retry_delay_ms: 1000,
            storage_file: None,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl Config {
    /// Build configuration with priority: CLI > ENV > defaults
    ///
    /// The caller is expected to have loaded `.env` before parsing `args`.
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let storage_file = if args.ephemeral {
            None
        } else {
            Some(
                args.storage_file
                    .map(|s| expand_tilde(&s))
                    .or_else(default_storage_file)
                    .context("Could not determine a data directory (use --storage-file or --ephemeral)")?,
            )
        };

        let config = Config {
            base_url: args.base_url,
            request_timeout_ms: args.timeout_ms,

            rate_limit_default_delay_ms: env_parse("RATE_LIMIT_DEFAULT_DELAY")
                .unwrap_or(DEFAULT_RATE_LIMIT_DELAY_MS),

            token_storage: parse_token_storage(&args.token_storage),

            cookie_secure: env_parse("COOKIE_SECURE").unwrap_or(false),

            cookie_same_site: parse_same_site(
                &std::env::var("COOKIE_SAME_SITE").unwrap_or_default(),
            ),

            refresh_endpoint: std::env::var("REFRESH_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_REFRESH_ENDPOINT.to_string()),

            login_redirect: std::env::var("LOGIN_REDIRECT")
                .unwrap_or_else(|_| DEFAULT_LOGIN_REDIRECT.to_string()),

            access_token_key: std::env::var("ACCESS_TOKEN_KEY")
                .unwrap_or_else(|_| "accessToken".to_string()),

            refresh_token_key: std::env::var("REFRESH_TOKEN_KEY")
                .unwrap_or_else(|_| "refreshToken".to_string()),

            // 15 minutes
            access_token_expiry: env_parse("ACCESS_TOKEN_EXPIRY").unwrap_or(900),

            // 30 days
            refresh_token_expiry: env_parse("REFRESH_TOKEN_EXPIRY").unwrap_or(2_592_000),

            endpoints_path: std::env::var("ENDPOINTS_PATH")
                .unwrap_or_else(|_| DEFAULT_ENDPOINTS_PATH.to_string()),

            endpoints_cache_key: std::env::var("ENDPOINTS_CACHE_KEY")
                .unwrap_or_else(|_| DEFAULT_ENDPOINTS_CACHE_KEY.to_string()),

            endpoints_cache_ttl_ms: env_parse("ENDPOINTS_CACHE_TTL")
                .unwrap_or(DEFAULT_ENDPOINTS_CACHE_TTL_MS),

            endpoints_retry_attempts: args.endpoints_retries,

            endpoints_retry_delay_ms: env_parse("ENDPOINTS_RETRY_DELAY").unwrap_or(1000),

            storage_file,

            log_level: args.log_level,
            log_json: args.log_json,
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("API_BASE_URL is not a valid URL: {}", self.base_url))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            anyhow::bail!("API_BASE_URL must use http or https: {}", self.base_url);
        }

        if self.endpoints_retry_attempts == 0 {
            anyhow::bail!("ENDPOINTS_RETRY_ATTEMPTS must be at least 1");
        }

        if self.endpoints_cache_ttl_ms == 0 {
            anyhow::bail!("ENDPOINTS_CACHE_TTL must be greater than zero");
        }

        if self.token_storage == TokenStorageType::Cookie
            && self.cookie_same_site == SameSite::None
            && !self.cookie_secure
        {
            tracing::warn!("SameSite=None cookies without the secure flag are rejected by browsers");
        }

        Ok(())
    }
}

/// Join a base URL and a path; absolute URLs pass through untouched
pub fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn default_storage_file() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("octane-client").join("storage.sqlite3"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse token storage type from string
fn parse_token_storage(s: &str) -> TokenStorageType {
    match s.trim().to_lowercase().as_str() {
        "cookie" | "cookies" => TokenStorageType::Cookie,
        _ => TokenStorageType::Local,
    }
}

/// Parse SameSite policy from string
fn parse_same_site(s: &str) -> SameSite {
    match s.trim().to_lowercase().as_str() {
        "lax" => SameSite::Lax,
        "none" => SameSite::None,
        _ => SameSite::Strict,
    }
}
