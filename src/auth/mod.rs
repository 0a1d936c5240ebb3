// Authentication module
// Stores the credential pair and coordinates its renewal

mod coordinator;
mod redirect;
mod refresh;
mod store;
mod types;

pub use coordinator::RefreshCoordinator;
pub use redirect::{LoggingRedirect, LoginRedirect};
pub use refresh::RenewedTokens;
pub use store::{CookieBackend, LocalStorageBackend, TokenBackend, TokenStore};
pub use types::{CredentialPair, TokenKind};
