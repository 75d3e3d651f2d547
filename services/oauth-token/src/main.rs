//! OAuth token command-line client
//!
//! Keeps one OAuth 2.0 credential on disk and hands out access tokens:
//! 1. Loads the client config and the stored credential
//! 2. Runs the authorization-code flow when nothing is stored
//! 3. Refreshes the access token when it is about to expire
//! 4. Logs out when an API call is rejected with 401
//!
//! Token flows run on a tokio runtime while the main thread uses the
//! blocking accessor.

mod config;
mod console;
mod loopback;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use oauth_credentials::{Authenticator, CodeAcquirer, FileCredentialPersister};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, LoginMode};
use crate::console::ConsoleAcquirer;
use crate::loopback::LoopbackAcquirer;

const USAGE: &str = "usage: oauth-token [--config PATH] <token | status | logout | get URL>";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    /// Print a usable access token.
    Token,
    /// Print the credential status.
    Status,
    /// Forget the stored credential.
    Logout,
    /// GET a URL with the access token and print the body.
    Get(String),
}

#[derive(Debug, PartialEq, Eq)]
struct Cli {
    config_path: Option<String>,
    command: Command,
}

impl Cli {
    /// Parse arguments, excluding the program name.
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut config_path = None;
        let mut positional = Vec::new();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            if arg == "--config" {
                config_path = Some(args.next().context("--config requires a path")?);
            } else {
                positional.push(arg);
            }
        }

        let mut positional = positional.into_iter();
        let command = match positional.next().as_deref() {
            Some("token") => Command::Token,
            Some("status") => Command::Status,
            Some("logout") => Command::Logout,
            Some("get") => Command::Get(positional.next().context("get requires a URL")?),
            Some(other) => bail!("unknown command: {other}\n{USAGE}"),
            None => bail!("{USAGE}"),
        };
        if let Some(extra) = positional.next() {
            bail!("unexpected argument: {extra}\n{USAGE}");
        }
        Ok(Self {
            config_path,
            command,
        })
    }
}

fn main() -> Result<ExitCode> {
    // JSON logs go to stderr; stdout carries command output.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse(std::env::args().skip(1))?;

    let config_path = Config::resolve_path(cli.config_path.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        client_id = %config.oauth.client.client_id,
        credentials_path = %config.storage.credentials_path.display(),
        login_mode = ?config.login.mode,
        "configuration loaded"
    );

    // Flows and the loopback listener run here; the main thread stays outside
    // the runtime so it may block on the accessor.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    let persister = Arc::new(FileCredentialPersister::new(
        config.storage.credentials_path.clone(),
    ));
    let acquirer: Arc<dyn CodeAcquirer> = match config.login.mode {
        LoginMode::Loopback => Arc::new(LoopbackAcquirer::new(
            runtime.handle().clone(),
            config.login.timeout(),
        )),
        LoginMode::Console => Arc::new(ConsoleAcquirer),
    };
    let auth = Authenticator::new(
        config.oauth.client,
        persister,
        acquirer,
        runtime.handle().clone(),
    )
    .context("failed to initialize authenticator")?;

    match cli.command {
        Command::Token => {
            let Some(token) = auth.blocking_access_token()? else {
                eprintln!("no access token available");
                return Ok(ExitCode::FAILURE);
            };
            println!("{token}");
        }
        Command::Status => println!("{}", auth.auth_status()),
        Command::Logout => {
            auth.logout().context("failed to persist logout")?;
            println!("logged out");
        }
        Command::Get(url) => {
            let Some(token) = auth.blocking_access_token()? else {
                eprintln!("no access token available");
                return Ok(ExitCode::FAILURE);
            };
            let client = reqwest::Client::new();
            match runtime.block_on(fetch(&client, &url, &token)) {
                Ok(body) => print!("{body}"),
                Err(e) => {
                    if auth.handle_api_error(&e)? {
                        warn!("access token rejected, credentials cleared");
                        eprintln!("access was revoked; run the command again to re-authorize");
                    }
                    return Err(e).with_context(|| format!("GET {url} failed"));
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// GET `url` with a bearer token, failing on a non-success status.
async fn fetch(client: &reqwest::Client, url: &str, token: &str) -> reqwest::Result<String> {
    client
        .get(url)
        .bearer_auth(token)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use tokio::net::TcpListener;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_commands_and_config_flag() {
        assert_eq!(
            Cli::parse(args(&["token"])).unwrap(),
            Cli {
                config_path: None,
                command: Command::Token
            }
        );
        assert_eq!(
            Cli::parse(args(&["--config", "/etc/oauth-token.toml", "status"])).unwrap(),
            Cli {
                config_path: Some("/etc/oauth-token.toml".into()),
                command: Command::Status
            }
        );
        assert_eq!(
            Cli::parse(args(&["get", "https://api.example.com/me", "--config", "c.toml"]))
                .unwrap()
                .command,
            Command::Get("https://api.example.com/me".into())
        );
        assert_eq!(
            Cli::parse(args(&["logout"])).unwrap().command,
            Command::Logout
        );
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(Cli::parse(args(&[])).is_err());
        assert!(Cli::parse(args(&["refresh"])).is_err());
        assert!(Cli::parse(args(&["get"])).is_err());
        assert!(Cli::parse(args(&["token", "extra"])).is_err());
        assert!(Cli::parse(args(&["token", "--config"])).is_err());
    }

    async fn start_api_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().route(
            "/me",
            get(|headers: HeaderMap| async move {
                match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                    Some("Bearer good-token") => (StatusCode::OK, "hello"),
                    _ => (StatusCode::UNAUTHORIZED, "unauthorized"),
                }
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/me")
    }

    #[tokio::test]
    async fn fetch_sends_bearer_token() {
        let url = start_api_server().await;
        let client = reqwest::Client::new();
        assert_eq!(fetch(&client, &url, "good-token").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn fetch_rejection_is_recognized_as_unauthorized() {
        let url = start_api_server().await;
        let client = reqwest::Client::new();
        let err = fetch(&client, &url, "stale-token").await.unwrap_err();
        assert_eq!(err.status(), Some(reqwest::StatusCode::UNAUTHORIZED));
        assert!(oauth_credentials::indicates_unauthorized(&err));
    }
}
