// Endpoint registry module
// Resolves logical endpoint names to URLs

mod cache;
mod fallback;
mod registry;
mod tree;

pub use cache::{CachedEndpoints, EndpointCache};
pub use fallback::fallback_endpoints;
pub use registry::EndpointRegistry;
pub use tree::{fill_template, placeholders, EndpointNode, EndpointTree};
