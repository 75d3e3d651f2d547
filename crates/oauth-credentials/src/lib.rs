//! OAuth 2.0 credential management for a single client
//!
//! Hands out access tokens while hiding the authorization-code flow, token
//! expiry and refresh from the caller. Consent UI and storage are supplied by
//! the embedding application through `CodeAcquirer` and
//! `CredentialPersister`.
//!
//! Token flow:
//! 1. Caller asks `Authenticator::blocking_access_token()` (or the async
//!    `access_token()`) for a token
//! 2. No credential: the `CodeAcquirer` gets an `AuthorizationRequest` and
//!    delivers the code through `CodeDelivery`
//! 3. `token::exchange_code()` trades the code for tokens
//! 4. Expired credential: `token::refresh_token()` obtains a new access token
//! 5. `CredentialStore` persists every change through the persister
//! 6. A 401 from the API passed to `handle_api_error()` logs the user out

pub mod authenticator;
pub mod authorize;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;
mod flow;
mod gate;
pub mod metrics;
pub mod persist;
pub mod token;

#[cfg(test)]
mod testing;

pub use authenticator::{Authenticator, LogoutListenerId, indicates_unauthorized};
pub use authorize::{AuthorizationRequest, CodeAcquirer, RedirectOutcome, parse_redirect};
pub use config::{OAuthConfig, RefreshFailurePolicy};
pub use credentials::{AuthStatus, Credential, CredentialStore};
pub use error::{Error, Result};
pub use flow::CodeDelivery;
pub use gate::AttemptOutcome;
pub use persist::{CredentialPersister, FileCredentialPersister, MemoryCredentialPersister};
pub use token::{TokenEndpoint, TokenPair, TokenResponse, exchange_code, refresh_token};
