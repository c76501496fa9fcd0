// Authentication module
// Credential pair storage, token refresh, and session expiry

mod refresh;
mod session;
mod store;
mod types;

pub use refresh::{refresh_credentials, RefreshCoordinator};
pub use session::{IgnoreSessionExpiry, LoginRedirect, SessionHandler};
pub use store::{
    CredentialStore, MemoryCredentialStore, SqliteCredentialStore, ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
};
pub use types::{redact, CredentialPair, LoginRequest, RefreshTokenRequest, TokenPairResponse};
