//! Loopback redirect listener
//!
//! Binds the host and port of the configured redirect URI, prints the consent
//! URL, and waits for the browser to come back with `?code=` or `?error=`.
//! The first redirect wins; anything later gets an "already handled" page.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::Html;
use oauth_credentials::{AuthorizationRequest, CodeAcquirer, CodeDelivery, RedirectOutcome};
use reqwest::Url;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Time allowed for the final response to reach the browser after the code
/// arrived.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct LoopbackAcquirer {
    runtime: Handle,
    timeout: Duration,
}

impl LoopbackAcquirer {
    pub fn new(runtime: Handle, timeout: Duration) -> Self {
        Self { runtime, timeout }
    }
}

impl CodeAcquirer for LoopbackAcquirer {
    fn acquire(&self, request: AuthorizationRequest, delivery: CodeDelivery) {
        let timeout = self.timeout;
        self.runtime.spawn(async move {
            let listener = match bind_redirect(&request.redirect_uri).await {
                Ok(listener) => listener,
                Err(e) => {
                    warn!(error = %e, redirect_uri = %request.redirect_uri, "cannot listen for redirect");
                    delivery.abandon();
                    return;
                }
            };
            eprintln!(
                "Open this URL in a browser to authorize:\n\n  {}\n",
                request.url()
            );
            match await_redirect(listener, timeout).await {
                RedirectOutcome::Code(code) => delivery.deliver(code),
                RedirectOutcome::Denied(error) => {
                    warn!(%error, "authorization denied");
                    delivery.abandon();
                }
                RedirectOutcome::Pending => {
                    warn!(timeout_secs = timeout.as_secs(), "timed out waiting for redirect");
                    delivery.abandon();
                }
            }
        });
    }
}

/// Listen on the host and port the redirect URI points at.
pub async fn bind_redirect(redirect_uri: &str) -> std::io::Result<TcpListener> {
    let url = Url::parse(redirect_uri).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{redirect_uri}: {e}"))
    })?;
    if url.scheme() != "http" {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("loopback redirect must use http://, got: {redirect_uri}"),
        ));
    }
    let host = url.host_str().unwrap_or("127.0.0.1");
    let port = url.port_or_known_default().unwrap_or(80);
    let listener = TcpListener::bind((host, port)).await?;
    info!(addr = %listener.local_addr()?, "listening for authorization redirect");
    Ok(listener)
}

struct RedirectState {
    result: Mutex<Option<oneshot::Sender<RedirectOutcome>>>,
}

/// Serve `listener` until the first code or error redirect, or `timeout`.
///
/// Returns `Pending` when the timeout expires first.
pub async fn await_redirect(listener: TcpListener, timeout: Duration) -> RedirectOutcome {
    let (result_tx, result_rx) = oneshot::channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let state = Arc::new(RedirectState {
        result: Mutex::new(Some(result_tx)),
    });

    let app = axum::Router::new()
        .fallback(redirect_handler)
        .with_state(state);
    let server = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!(error = %e, "redirect listener failed");
        }
    });

    let outcome = match tokio::time::timeout(timeout, result_rx).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) | Err(_) => RedirectOutcome::Pending,
    };

    let _ = shutdown_tx.send(());
    let abort = server.abort_handle();
    if tokio::time::timeout(SHUTDOWN_GRACE, server).await.is_err() {
        debug!("redirect listener did not drain in time");
        abort.abort();
    }
    outcome
}

async fn redirect_handler(
    State(state): State<Arc<RedirectState>>,
    uri: Uri,
) -> (StatusCode, Html<&'static str>) {
    let outcome = oauth_credentials::parse_redirect(&format!("http://localhost{uri}"));
    if outcome == RedirectOutcome::Pending {
        return (StatusCode::NOT_FOUND, Html("Waiting for the authorization redirect."));
    }

    let page = match outcome {
        RedirectOutcome::Code(_) => "Authorization complete. You can close this window.",
        _ => "Authorization was denied. You can close this window.",
    };
    let sender = state
        .result
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .take();
    match sender {
        Some(tx) => {
            let _ = tx.send(outcome);
            (StatusCode::OK, Html(page))
        }
        None => (
            StatusCode::OK,
            Html("This authorization was already handled. You can close this window."),
        ),
    }
}
