// Octane client - library root

pub mod api;
pub mod auth;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod http_client;
pub mod metrics;
pub mod storage;

pub use api::OctaneApi;
pub use error::{AuthError, ClientError, Result};
