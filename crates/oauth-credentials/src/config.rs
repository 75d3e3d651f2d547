//! Client configuration for one OAuth credential set

use common::Secret;
use serde::Deserialize;

use crate::constants::{DEFAULT_ACCESS_TYPE, DEFAULT_RESPONSE_TYPE};
use crate::error::{Error, Result};
use crate::token::TokenEndpoint;

/// What happens to the stored credential when a refresh attempt fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshFailurePolicy {
    /// Any failure clears the credential, forcing a full re-authorization.
    #[default]
    Clear,
    /// Only a revoked refresh token clears the credential. Transient failures
    /// leave it `TokenExpired` so the next request retries the refresh.
    Keep,
}

/// OAuth client settings.
///
/// `client_secret` is never read from a config file; the embedding
/// application resolves it from the environment or a secret file.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_response_type")]
    pub response_type: String,
    #[serde(default = "default_access_type")]
    pub access_type: String,
    #[serde(default)]
    pub refresh_failure: RefreshFailurePolicy,
}

fn default_response_type() -> String {
    DEFAULT_RESPONSE_TYPE.to_string()
}

fn default_access_type() -> String {
    DEFAULT_ACCESS_TYPE.to_string()
}

impl OAuthConfig {
    /// Config with defaults for every optional field.
    pub fn new(
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            authorization_endpoint: authorization_endpoint.into(),
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: redirect_uri.into(),
            scopes: Vec::new(),
            response_type: default_response_type(),
            access_type: default_access_type(),
            refresh_failure: RefreshFailurePolicy::default(),
        }
    }

    /// Reject settings no token endpoint would accept.
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("authorization_endpoint", &self.authorization_endpoint),
            ("token_endpoint", &self.token_endpoint),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::InvalidArgument(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }
        if self.client_id.trim().is_empty() {
            return Err(Error::InvalidArgument("client_id must not be empty".into()));
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(Error::InvalidArgument("redirect_uri must not be empty".into()));
        }
        Ok(())
    }

    pub fn token_endpoint(&self) -> TokenEndpoint {
        TokenEndpoint {
            url: self.token_endpoint.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        }
    }
}
