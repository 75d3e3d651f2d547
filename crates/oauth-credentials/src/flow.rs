//! Authorization-code and refresh flows
//!
//! Both flows run as tasks on the authenticator's runtime, away from the
//! caller holding the flight lock. Each owns a `GateRelease`, so the waiting
//! caller is woken on every exit path. A failed exchange never reaches the
//! caller as an error; it only shows up as a missing token.

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::RefreshFailurePolicy;
use crate::credentials::CredentialStore;
use crate::error::{Error, Result};
use crate::gate::{AttemptOutcome, Gate, GateRelease};
use crate::token::{self, TokenEndpoint};

/// Everything a flow task needs, cheap to clone into a task.
#[derive(Clone)]
pub(crate) struct FlowContext {
    pub store: Arc<CredentialStore>,
    pub http: reqwest::Client,
    pub endpoint: Arc<TokenEndpoint>,
    pub redirect_uri: Arc<str>,
    pub refresh_failure: RefreshFailurePolicy,
    pub runtime: Handle,
}

/// One-time handle through which a `CodeAcquirer` completes its attempt.
///
/// Consuming `deliver` or `abandon` (or dropping the handle) ends this
/// attempt and releases whoever waits on it, exactly once. The attempt stays
/// in flight while the handle lives, even after `Authenticator::unlock`;
/// later callers join it rather than starting another authorization.
#[must_use = "dropping a CodeDelivery abandons the authorization attempt"]
pub struct CodeDelivery {
    ctx: FlowContext,
    release: GateRelease,
}

impl CodeDelivery {
    pub(crate) fn new(ctx: FlowContext, gate: Arc<Gate>, generation: u64) -> Self {
        Self {
            ctx,
            release: GateRelease::new(gate, generation, AttemptOutcome::Abandoned),
        }
    }

    /// Exchange `code` for tokens in the background.
    ///
    /// An empty code is treated as abandonment.
    pub fn deliver(self, code: impl Into<String>) {
        let code = code.into();
        let CodeDelivery { ctx, mut release } = self;
        if code.trim().is_empty() {
            warn!("empty authorization code delivered, abandoning attempt");
            return;
        }

        release.set_outcome(AttemptOutcome::Failed);
        let runtime = ctx.runtime.clone();
        runtime.spawn(async move {
            let mut release = release;
            if exchange_code(&ctx, &code).await {
                release.set_outcome(AttemptOutcome::Succeeded);
            }
        });
    }

    /// Give up without a code, e.g. the user closed the consent page.
    pub fn abandon(self) {
        info!("authorization abandoned");
    }
}

impl fmt::Debug for CodeDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeDelivery").finish_non_exhaustive()
    }
}

/// Store the outcome of a token request. A persistence failure still leaves
/// the token usable in memory, so it only warns.
fn stored(result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(Error::Persistence(e)) => {
            warn!(error = %e, "failed to persist credential, keeping it in memory");
            true
        }
        Err(e) => {
            warn!(error = %e, "token response rejected by credential store");
            false
        }
    }
}

async fn exchange_code(ctx: &FlowContext, code: &str) -> bool {
    match token::exchange_code(&ctx.http, &ctx.endpoint, code, &ctx.redirect_uri).await {
        Ok(pair) => {
            let expires_in = pair.expires_in;
            let ok = stored(
                ctx.store
                    .authenticate(pair.access_token, pair.refresh_token, expires_in),
            );
            if ok {
                info!(expires_in, "authorization code exchanged");
            }
            ok
        }
        Err(e) => {
            warn!(error = %e, "authorization code exchange failed");
            false
        }
    }
}

/// Refresh the access token and release the gate with the outcome.
pub(crate) async fn refresh(ctx: FlowContext, mut release: GateRelease) {
    let Some(refresh) = ctx.store.refresh_token() else {
        warn!("token expired but no refresh token is stored");
        return;
    };

    match token::refresh_token(&ctx.http, &ctx.endpoint, &refresh).await {
        Ok(token) => {
            let expires_in = token.expires_in;
            let result = match token.refresh_token.filter(|t| !t.is_empty()) {
                Some(rotated) => {
                    debug!("token endpoint rotated the refresh token");
                    ctx.store.authenticate(token.access_token, rotated, expires_in)
                }
                None => ctx.store.set_new_access_token(token.access_token, expires_in),
            };
            if stored(result) {
                info!(expires_in, "access token refreshed");
                release.set_outcome(AttemptOutcome::Succeeded);
            }
        }
        Err(e) => {
            let revoked = matches!(e, Error::Revoked(_));
            if revoked || ctx.refresh_failure == RefreshFailurePolicy::Clear {
                warn!(error = %e, revoked, "token refresh failed, clearing credential");
                if let Err(e) = ctx.store.clear() {
                    warn!(error = %e, "failed to persist cleared credential");
                }
            } else {
                warn!(error = %e, "token refresh failed, keeping credential for retry");
            }
        }
    }
}
