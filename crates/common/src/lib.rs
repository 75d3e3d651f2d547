//! Shared building blocks for the OAuth token workspace
//!
//! Secret handling and config-file loading used by the library and the
//! `oauth-token` binary.

mod config;
mod error;
mod secret;

pub use config::{load_toml, resolve_secret};
pub use error::{Error, Result};
pub use secret::Secret;
