//! Configuration types and loading
//!
//! Config path precedence: `--config` > `CONFIG_PATH` env var > default.
//! The client secret is loaded from the OAUTH_CLIENT_SECRET env var or
//! `client_secret_file`, never from the TOML directly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use oauth_credentials::OAuthConfig;
use serde::Deserialize;

const CLIENT_SECRET_ENV: &str = "OAUTH_CLIENT_SECRET";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub oauth: OAuthSection,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub login: LoginConfig,
}

/// OAuth client settings plus where to find the client secret
#[derive(Debug, Deserialize)]
pub struct OAuthSection {
    #[serde(flatten)]
    pub client: OAuthConfig,
    /// Path to a file containing the client secret (alternative to the env var)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
        }
    }
}

/// How the authorization code is obtained from the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginMode {
    /// Listen on the redirect URI and catch the browser redirect.
    #[default]
    Loopback,
    /// Ask the user to paste the redirect URL or code.
    Console,
}

#[derive(Debug, Deserialize)]
pub struct LoginConfig {
    #[serde(default)]
    pub mode: LoginMode,
    /// How long the loopback listener waits before abandoning.
    #[serde(default = "default_login_timeout")]
    pub timeout_secs: u64,
}

impl LoginConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            mode: LoginMode::default(),
            timeout_secs: default_login_timeout(),
        }
    }
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_login_timeout() -> u64 {
    300
}

impl Config {
    /// Load configuration from a TOML file and resolve the client secret.
    pub fn load(path: &Path) -> common::Result<Self> {
        let mut config: Config = common::load_toml(path)?;

        config
            .oauth
            .client
            .validate()
            .map_err(|e| common::Error::Config(e.to_string()))?;

        if config.login.timeout_secs == 0 {
            return Err(common::Error::Config(
                "login.timeout_secs must be greater than 0".into(),
            ));
        }

        config.oauth.client.client_secret = common::resolve_secret(
            CLIENT_SECRET_ENV,
            config.oauth.client_secret_file.as_deref(),
        )?;

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("oauth-token.toml")
    }
}
