// Built-in endpoint tree used until (or instead of) the remote registry

use super::tree::EndpointTree;

/// Complete default endpoint tree
pub fn fallback_endpoints() -> EndpointTree {
    EndpointTree::new()
        .with_group("auth", auth())
        .with_group("v1", v1())
        .with_group("legacy", legacy())
        .with_group("system", system())
}

fn auth() -> EndpointTree {
    let google = EndpointTree::new()
        .with_url("connect", "/api/auth/google")
        .with_url("callback", "/api/auth/google/callback")
        .with_url("status", "/api/auth/google/status")
        .with_url("link", "/api/auth/google/link")
        .with_url("unlink", "/api/auth/google/unlink/:providerId")
        .with_url("providers", "/api/auth/google/providers")
        .with_url("sync", "/api/auth/google/sync/:providerId")
        .with_url("refresh", "/api/auth/google/refresh/:providerId");

    EndpointTree::new()
        .with_url("login", "/api/auth/login")
        .with_url("logout", "/api/auth/logout")
        .with_url("refresh", "/api/auth/refresh")
        .with_group("google", google)
}

fn v1() -> EndpointTree {
    let brands = EndpointTree::new()
        .with_url("base", "/api/v1/brands")
        .with_url("single", "/api/v1/brands/:id")
        .with_url("icps", "/api/v1/brands/:brandId/icps/:icpId")
        .with_url("contentStrategy", "/api/v1/brands/:brandId/content-strategy")
        .with_url("analytics", "/api/v1/brands/:brandId/analytics");

    let icps = EndpointTree::new()
        .with_url("base", "/api/v1/icps")
        .with_url("single", "/api/v1/icps/:id")
        .with_url("analytics", "/api/v1/icps/:id/analytics");

    let users = EndpointTree::new()
        .with_url("me", "/api/v1/users/me")
        .with_url("profile", "/api/v1/users/me")
        .with_url("single", "/api/v1/users/:id");

    EndpointTree::new()
        .with_group("brands", brands)
        .with_group("icps", icps)
        .with_group("users", users)
}

// Unversioned
fn legacy() -> EndpointTree {
    EndpointTree::new()
        .with_url("health", "/api/health")
        .with_url("version", "/api/version")
        .with_url("endpoints", "/api/endpoints")
}

fn system() -> EndpointTree {
    EndpointTree::new()
        .with_url("health", "/health")
        .with_url("status", "/status")
        .with_url("metrics", "/metrics")
}
