//! Error types for credential and token operations

/// Errors from credential management and token endpoint calls.
///
/// `Network`, `Protocol` and `Revoked` are produced by the token exchange
/// layer and are absorbed by the authenticator's flows: a blocked caller
/// only ever sees `IllegalContext` or `Interrupted` from the accessor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid credential state: {0}")]
    InvalidState(String),

    #[error("illegal calling context: {0}")]
    IllegalContext(String),

    #[error("token endpoint request failed: {0}")]
    Network(String),

    #[error("invalid token response: {0}")]
    Protocol(String),

    #[error("refresh token revoked: {0}")]
    Revoked(String),

    #[error("wait for authentication was interrupted")]
    Interrupted,

    #[error("credential persistence failed: {0}")]
    Persistence(String),
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
