// Integration tests for octane-client
//
// Stateful scenarios (token renewal, rate limiting) run against small axum
// servers; fixed-response scenarios (endpoint registry) use mockito.

use axum::{
    extract::State,
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use octane_client::{
    auth::{CredentialPair, LoginRedirect, TokenKind},
    config::{Config, TokenStorageType},
    endpoints::{CachedEndpoints, EndpointRegistry, EndpointTree},
    storage::ClientStorage,
    AuthError, ClientError, OctaneApi,
};

// ==================================================================================================
// Test Helpers
// ==================================================================================================

/// Spawn a router on an ephemeral port and return its base URL
async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind failed");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server failed");
    });
    format!("http://{}", addr)
}

#[derive(Default)]
struct RecordingRedirect {
    targets: Mutex<Vec<String>>,
}

impl LoginRedirect for RecordingRedirect {
    fn redirect(&self, target: &str) {
        self.targets.lock().unwrap().push(target.to_string());
    }
}

fn test_config(base_url: &str) -> Config {
    Config {
        base_url: base_url.to_string(),
        endpoints_retry_delay_ms: 10,
        rate_limit_default_delay_ms: 50,
        ..Config::default()
    }
}

fn api_with_tokens(base_url: &str, pair: Option<CredentialPair>) -> OctaneApi {
    let api = OctaneApi::from_config(test_config(base_url)).expect("Failed to build client");
    if let Some(pair) = pair {
        api.tokens().set(&pair);
    }
    api
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Shared state for the renewal server
#[derive(Default)]
struct RenewalState {
    /// Requests answered with 401
    unauthorized: AtomicUsize,
    /// Calls to the renewal endpoint
    renewals: AtomicUsize,
    /// Renewal waits until this many 401s were served
    expected_unauthorized: usize,
    /// Renewal answers 401 instead of a token
    reject_renewal: bool,
}

async fn me_handler(State(state): State<Arc<RenewalState>>, headers: HeaderMap) -> Response {
    if bearer(&headers).as_deref() == Some("Bearer fresh") {
        return Json(json!({"id": "u1"})).into_response();
    }
    state.unauthorized.fetch_add(1, Ordering::SeqCst);
    StatusCode::UNAUTHORIZED.into_response()
}

async fn refresh_handler(State(state): State<Arc<RenewalState>>, body: String) -> Response {
    state.renewals.fetch_add(1, Ordering::SeqCst);

    // Hold the renewal open until every caller has seen its 401
    let deadline = Instant::now() + Duration::from_secs(5);
    while state.unauthorized.load(Ordering::SeqCst) < state.expected_unauthorized
        && Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    // Let the last caller reach the queue
    tokio::time::sleep(Duration::from_millis(200)).await;

    let body: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    if state.reject_renewal || body["refreshToken"] != "r1" {
        return (StatusCode::UNAUTHORIZED, "refresh token revoked").into_response();
    }
    Json(json!({"accessToken": "fresh"})).into_response()
}

fn renewal_router(state: Arc<RenewalState>) -> Router {
    Router::new()
        .route("/api/v1/users/me", get(me_handler))
        .route("/api/auth/refresh", post(refresh_handler))
        .with_state(state)
}

// ==================================================================================================
// Token renewal
// ==================================================================================================

#[tokio::test]
async fn test_concurrent_401s_share_one_renewal() {
    const CALLERS: usize = 5;
    let state = Arc::new(RenewalState {
        expected_unauthorized: CALLERS,
        ..Default::default()
    });
    let base_url = spawn_server(renewal_router(state.clone())).await;
    let api = api_with_tokens(&base_url, Some(CredentialPair::new("stale", "r1")));

    let results = futures::future::join_all((0..CALLERS).map(|_| api.current_user())).await;

    for result in results {
        assert_eq!(result.unwrap()["id"], "u1");
    }
    assert_eq!(state.renewals.load(Ordering::SeqCst), 1);
    assert_eq!(state.unauthorized.load(Ordering::SeqCst), CALLERS);
    assert_eq!(api.tokens().get(TokenKind::Access), Some("fresh".to_string()));
    assert_eq!(api.tokens().get(TokenKind::Refresh), Some("r1".to_string()));
    assert_eq!(api.metrics().renewals(), 1);
}

#[tokio::test]
async fn test_failed_renewal_fails_every_caller() {
    const CALLERS: usize = 3;
    let state = Arc::new(RenewalState {
        expected_unauthorized: CALLERS,
        reject_renewal: true,
        ..Default::default()
    });
    let base_url = spawn_server(renewal_router(state.clone())).await;

    let redirect = Arc::new(RecordingRedirect::default());
    let api = OctaneApi::with_redirect(test_config(&base_url), redirect.clone()).unwrap();
    api.tokens().set(&CredentialPair::new("stale", "r1"));

    let results = futures::future::join_all((0..CALLERS).map(|_| api.current_user())).await;

    let expected = AuthError::RenewalRejected {
        status: 401,
        message: "refresh token revoked".to_string(),
    };
    for result in results {
        match result.unwrap_err() {
            ClientError::AuthenticationExpired(err) => assert_eq!(err, expected),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(state.renewals.load(Ordering::SeqCst), 1);
    assert!(!api.tokens().is_authenticated());
    assert_eq!(api.tokens().get(TokenKind::Refresh), None);
    assert_eq!(
        *redirect.targets.lock().unwrap(),
        vec!["/auth/login".to_string()]
    );
}

#[tokio::test]
async fn test_second_401_does_not_renew_again() {
    let unauthorized = Arc::new(AtomicUsize::new(0));
    let renewals = Arc::new(AtomicUsize::new(0));

    let router = Router::new()
        .route(
            "/api/v1/users/me",
            get({
                let unauthorized = unauthorized.clone();
                move || async move {
                    unauthorized.fetch_add(1, Ordering::SeqCst);
                    StatusCode::UNAUTHORIZED
                }
            }),
        )
        .route(
            "/api/auth/refresh",
            post({
                let renewals = renewals.clone();
                move || async move {
                    renewals.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"accessToken": "fresh", "refreshToken": "r2"}))
                }
            }),
        );
    let base_url = spawn_server(router).await;
    let api = api_with_tokens(&base_url, Some(CredentialPair::new("stale", "r1")));

    let err = api.current_user().await.unwrap_err();
    match err {
        ClientError::AuthenticationExpired(AuthError::StillUnauthorized) => {}
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(unauthorized.load(Ordering::SeqCst), 2);
    assert_eq!(renewals.load(Ordering::SeqCst), 1);
    // The renewal itself succeeded, so the new pair stays stored
    assert_eq!(api.tokens().get(TokenKind::Refresh), Some("r2".to_string()));
}

#[tokio::test]
async fn test_cleared_tokens_send_no_authorization() {
    let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));

    let router = Router::new().route(
        "/health",
        get({
            let seen = seen.clone();
            move |headers: HeaderMap| async move {
                seen.lock().unwrap().push(bearer(&headers));
                Json(json!({"status": "ok"}))
            }
        }),
    );
    let base_url = spawn_server(router).await;
    let api = api_with_tokens(&base_url, Some(CredentialPair::new("a1", "r1")));

    api.health().await.unwrap();
    api.tokens().clear();
    api.health().await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![Some("Bearer a1".to_string()), None]
    );
}

#[tokio::test]
async fn test_cookie_strategy_replays_renewed_cookie() {
    let cookies: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let router = Router::new()
        .route(
            "/api/v1/users/me",
            get({
                let cookies = cookies.clone();
                move |headers: HeaderMap| async move {
                    let cookie = headers
                        .get("cookie")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    let fresh = cookie.contains("accessToken=fresh");
                    cookies.lock().unwrap().push(cookie);
                    // Authenticates by cookie only
                    if fresh {
                        Json(json!({"id": "u1"})).into_response()
                    } else {
                        StatusCode::UNAUTHORIZED.into_response()
                    }
                }
            }),
        )
        .route(
            "/api/auth/refresh",
            post(|| async { Json(json!({"accessToken": "fresh"})) }),
        );
    let base_url = spawn_server(router).await;

    let config = Config {
        token_storage: TokenStorageType::Cookie,
        ..test_config(&base_url)
    };
    let api = OctaneApi::from_config(config).unwrap();
    api.tokens().set(&CredentialPair::new("stale", "r1"));

    assert_eq!(api.current_user().await.unwrap()["id"], "u1");

    let cookies = cookies.lock().unwrap();
    assert_eq!(cookies.len(), 2);
    assert!(cookies[0].contains("accessToken=stale"));
    assert!(cookies[1].contains("accessToken=fresh"));
    assert!(cookies[1].contains("refreshToken=r1"));
    assert!(!cookies[1].contains("stale"));
}

// ==================================================================================================
// Rate limiting
// ==================================================================================================

#[derive(Debug, Clone, PartialEq)]
struct Recorded {
    method: Method,
    body: String,
    request_id: Option<String>,
    authorization: Option<String>,
}

#[tokio::test]
async fn test_429_replays_identical_request_after_retry_after() {
    let recorded: Arc<Mutex<Vec<Recorded>>> = Arc::new(Mutex::new(Vec::new()));

    let router = Router::new().route(
        "/api/v1/brands",
        post({
            let recorded = recorded.clone();
            move |method: Method, headers: HeaderMap, body: String| async move {
                let count = {
                    let mut recorded = recorded.lock().unwrap();
                    recorded.push(Recorded {
                        method,
                        body,
                        request_id: headers
                            .get("x-request-id")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string),
                        authorization: bearer(&headers),
                    });
                    recorded.len()
                };
                if count == 1 {
                    (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "1")], "slow down")
                        .into_response()
                } else {
                    (StatusCode::CREATED, Json(json!({"id": "b1"}))).into_response()
                }
            }
        }),
    );
    let base_url = spawn_server(router).await;
    let api = api_with_tokens(&base_url, Some(CredentialPair::new("a1", "r1")));

    let started = Instant::now();
    let created = api.create_brand(&json!({"name": "Acme"})).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(created["id"], "b1");
    assert!(elapsed >= Duration::from_secs(1), "replayed too early: {elapsed:?}");

    let recorded = recorded.lock().unwrap();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0], recorded[1]);
    assert_eq!(recorded[0].method, Method::POST);
    assert_eq!(recorded[0].body, r#"{"name":"Acme"}"#);
    assert_eq!(recorded[0].authorization.as_deref(), Some("Bearer a1"));
    assert_eq!(recorded[0].request_id.as_ref().map(String::len), Some(8));
    assert_eq!(api.metrics().snapshot().rate_limited_replays, 1);
}

#[tokio::test]
async fn test_429_without_headers_uses_default_delay() {
    let hits = Arc::new(AtomicUsize::new(0));

    let router = Router::new().route(
        "/health",
        get({
            let hits = hits.clone();
            move || async move {
                // Two rate-limited answers, then success
                if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                    StatusCode::TOO_MANY_REQUESTS.into_response()
                } else {
                    Json(json!({"status": "ok"})).into_response()
                }
            }
        }),
    );
    let base_url = spawn_server(router).await;
    let api = api_with_tokens(&base_url, None);

    let started = Instant::now();
    let health = api.health().await.unwrap();

    assert_eq!(health["status"], "ok");
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    // Configured default is 50ms per replay
    assert!(started.elapsed() >= Duration::from_millis(100));
}

// ==================================================================================================
// Endpoint registry
// ==================================================================================================

fn registry_for(base_url: &str, storage: Arc<ClientStorage>, attempts: u32) -> EndpointRegistry {
    let config = Config {
        base_url: base_url.to_string(),
        endpoints_retry_attempts: attempts,
        endpoints_retry_delay_ms: 20,
        ..Config::default()
    };
    EndpointRegistry::new(&config, reqwest::Client::new(), Some(storage))
}

/// Store a snapshot that is `age_ms` old under the default cache key
fn seed_cache(storage: &ClientStorage, endpoints: Value, age_ms: i64) {
    let snapshot = CachedEndpoints {
        endpoints: serde_json::from_value::<EndpointTree>(endpoints).unwrap(),
        version: "cached".to_string(),
        timestamp: "2025-01-01T00:00:00Z".to_string(),
        cached_at: Utc::now().timestamp_millis() - age_ms,
    };
    storage
        .set("api_endpoints", &serde_json::to_string(&snapshot).unwrap())
        .unwrap();
}

const TTL_MS: i64 = 15 * 60 * 1000;

fn remote_endpoints() -> String {
    json!({
        "endpoints": {"v1": {"users": {"me": "/api/v2/users/me"}}},
        "version": "2.0.0",
        "timestamp": "2025-06-01T00:00:00Z"
    })
    .to_string()
}

#[tokio::test]
async fn test_fresh_cache_skips_network() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/endpoints")
        .expect(0)
        .create_async()
        .await;

    let storage = Arc::new(ClientStorage::in_memory().unwrap());
    seed_cache(
        &storage,
        json!({"v1": {"users": {"me": "/cached/me"}}}),
        60_000,
    );

    let registry = registry_for(&server.url(), storage, 3);
    registry.initialize().await;

    assert!(registry.is_ready());
    assert_eq!(registry.resolve("v1.users.me").unwrap(), "/cached/me");
    assert_eq!(registry.resolve("system.health").unwrap(), "/health");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_half_expired_cache_refreshes_in_background() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/endpoints")
        .with_status(200)
        .with_body(remote_endpoints())
        .expect(1)
        .create_async()
        .await;

    let storage = Arc::new(ClientStorage::in_memory().unwrap());
    seed_cache(
        &storage,
        json!({"v1": {"users": {"me": "/cached/me"}}}),
        TTL_MS * 6 / 10,
    );

    let registry = registry_for(&server.url(), storage.clone(), 3);
    registry.initialize().await;

    // Cached data is served immediately
    assert_eq!(registry.resolve("v1.users.me").unwrap(), "/cached/me");

    let deadline = Instant::now() + Duration::from_secs(5);
    while registry.resolve("v1.users.me").unwrap() != "/api/v2/users/me" {
        assert!(Instant::now() < deadline, "background refresh never landed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    mock.assert_async().await;

    let raw = storage.get("api_endpoints").unwrap().unwrap();
    let cached: CachedEndpoints = serde_json::from_str(&raw).unwrap();
    assert_eq!(cached.version, "2.0.0");
}

#[tokio::test]
async fn test_expired_cache_is_refetched() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/endpoints")
        .with_status(200)
        .with_body(remote_endpoints())
        .expect(1)
        .create_async()
        .await;

    let storage = Arc::new(ClientStorage::in_memory().unwrap());
    seed_cache(
        &storage,
        json!({"v1": {"users": {"me": "/cached/me"}}}),
        TTL_MS * 2,
    );

    let registry = registry_for(&server.url(), storage, 3);
    registry.initialize().await;

    assert_eq!(registry.resolve("v1.users.me").unwrap(), "/api/v2/users/me");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_fetch_failures_fall_back_after_retries() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/endpoints")
        .with_status(500)
        .expect(3)
        .create_async()
        .await;

    let storage = Arc::new(ClientStorage::in_memory().unwrap());
    let registry = registry_for(&server.url(), storage.clone(), 3);

    let started = Instant::now();
    registry.initialize().await;

    // 20ms then 40ms between the three attempts
    assert!(started.elapsed() >= Duration::from_millis(60));
    mock.assert_async().await;

    assert!(registry.is_ready());
    assert_eq!(&registry.all(), registry.fallback());
    assert_eq!(
        registry
            .resolve_with_params("v1.brands.single", [("id", "42")])
            .unwrap(),
        "/api/v1/brands/42"
    );
    assert!(storage.get("api_endpoints").unwrap().is_none());
}

#[tokio::test]
async fn test_response_without_endpoints_is_a_failure() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/endpoints")
        .with_status(200)
        .with_body(r#"{"version":"1.0.0"}"#)
        .expect(2)
        .create_async()
        .await;

    let registry = registry_for(
        &server.url(),
        Arc::new(ClientStorage::in_memory().unwrap()),
        2,
    );
    registry.initialize().await;

    mock.assert_async().await;
    assert!(registry.is_ready());
    assert_eq!(&registry.all(), registry.fallback());
}

#[tokio::test]
async fn test_concurrent_initialize_loads_once() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/endpoints")
        .with_status(200)
        .with_body(remote_endpoints())
        .expect(1)
        .create_async()
        .await;

    let registry = registry_for(
        &server.url(),
        Arc::new(ClientStorage::in_memory().unwrap()),
        3,
    );
    futures::future::join_all((0..4).map(|_| registry.initialize())).await;
    registry.initialize().await;

    mock.assert_async().await;
    assert_eq!(registry.resolve("v1.users.me").unwrap(), "/api/v2/users/me");
}

#[tokio::test]
async fn test_refresh_clears_cache_and_refetches() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/endpoints")
        .with_status(200)
        .with_body(remote_endpoints())
        .expect(2)
        .create_async()
        .await;

    let registry = registry_for(
        &server.url(),
        Arc::new(ClientStorage::in_memory().unwrap()),
        3,
    );
    registry.initialize().await;
    registry.refresh().await;

    mock.assert_async().await;
    assert!(registry.has("v1.users.me"));
}

#[tokio::test]
async fn test_api_calls_follow_fetched_endpoints() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/endpoints")
        .with_status(200)
        .with_body(
            json!({
                "endpoints": {"v1": {"brands": {"single": "/api/v2/brands/{id}"}}},
                "version": "2.0.0",
                "timestamp": "2025-06-01T00:00:00Z"
            })
            .to_string(),
        )
        .create_async()
        .await;
    let brand = server
        .mock("GET", "/api/v2/brands/9")
        .with_status(200)
        .with_body(r#"{"id":"9"}"#)
        .expect(1)
        .create_async()
        .await;

    let api = api_with_tokens(&server.url(), None);
    api.initialize().await;

    assert_eq!(api.get_brand("9").await.unwrap()["id"], "9");
    brand.assert_async().await;

    // Shallow overlay: the fetched v1 group replaced the fallback one
    assert!(matches!(
        api.current_user().await.unwrap_err(),
        ClientError::NotFound(_)
    ));
}
