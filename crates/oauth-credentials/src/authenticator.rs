//! Single-flight access token accessor
//!
//! `Authenticator` hands out access tokens while hiding authorization, expiry
//! and refresh. At most one authorization or refresh attempt is in flight at
//! a time:
//!
//! 1. A caller takes the flight lock and reads the credential status.
//! 2. `Authenticated` returns the stored token immediately.
//! 3. `NotAuthenticated` arms the gate and hands a `CodeDelivery` to the
//!    `CodeAcquirer`; `TokenExpired` arms the gate and spawns a refresh.
//! 4. The caller waits on the gate while still holding the flight lock, so
//!    later callers queue behind it. The network exchange itself runs on the
//!    runtime, not under the lock.
//! 5. Callers that queued during an attempt share its outcome instead of
//!    starting another one. An attempt whose caller went away (cancelled,
//!    `unlock()`) stays in flight until its flow ends; the next caller joins
//!    it.
//!
//! A failed attempt is reported as `None`, never as an error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::authorize::{AuthorizationRequest, CodeAcquirer};
use crate::config::OAuthConfig;
use crate::credentials::{AuthStatus, CredentialStore};
use crate::error::{Error, Result};
use crate::flow::{self, CodeDelivery, FlowContext};
use crate::gate::{Armed, AttemptOutcome, Gate, GateRelease};
use crate::metrics::{self, LogoutReason};
use crate::persist::CredentialPersister;
use crate::token;

/// Handle returned by `add_logout_listener`, used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogoutListenerId(u64);

type LogoutListener = Arc<dyn Fn() + Send + Sync>;

/// Access token accessor for exactly one credential set.
pub struct Authenticator {
    store: Arc<CredentialStore>,
    acquirer: Arc<dyn CodeAcquirer>,
    authorization: AuthorizationRequest,
    flow: FlowContext,
    gate: Arc<Gate>,
    flight: tokio::sync::Mutex<()>,
    /// Completed waits, bumped under the flight lock.
    attempts: AtomicU64,
    last_succeeded: AtomicBool,
    listeners: Mutex<HashMap<LogoutListenerId, LogoutListener>>,
    next_listener: AtomicU64,
}

impl Authenticator {
    /// Validate `config`, load the stored credential and prepare the HTTP
    /// client. Flows are spawned on `runtime`.
    pub fn new(
        config: OAuthConfig,
        persister: Arc<dyn CredentialPersister>,
        acquirer: Arc<dyn CodeAcquirer>,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(CredentialStore::load(persister)?);
        let flow = FlowContext {
            store: store.clone(),
            http: token::http_client()?,
            endpoint: Arc::new(config.token_endpoint()),
            redirect_uri: Arc::from(config.redirect_uri.as_str()),
            refresh_failure: config.refresh_failure,
            runtime,
        };
        info!(
            client_id = %config.client_id,
            status = %store.status(),
            "authenticator ready"
        );

        Ok(Self {
            store,
            acquirer,
            authorization: AuthorizationRequest::from_config(&config),
            flow,
            gate: Arc::new(Gate::default()),
            flight: tokio::sync::Mutex::new(()),
            attempts: AtomicU64::new(0),
            last_succeeded: AtomicBool::new(false),
            listeners: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(0),
        })
    }

    /// Get a usable access token, blocking the current thread while an
    /// authorization or refresh runs.
    ///
    /// Fails with `IllegalContext` when called from inside a tokio runtime,
    /// where blocking would stall the executor; use `access_token` there.
    /// `Ok(None)` means the attempt failed or was abandoned.
    pub fn blocking_access_token(&self) -> Result<Option<String>> {
        if Handle::try_current().is_ok() {
            return Err(Error::IllegalContext(
                "blocking_access_token called from within a tokio runtime; use access_token().await"
                    .into(),
            ));
        }

        let seen = self.attempts.load(Ordering::Acquire);
        let _flight = self.flight.blocking_lock();
        if let Some(shared) = self.shared_outcome(seen) {
            return Ok(shared);
        }
        match self.begin_attempt() {
            None => Ok(self.store.access_token()),
            Some(waiter) => {
                let outcome = waiter.blocking_recv().map_err(|_| Error::Interrupted)?;
                Ok(self.finish_attempt(outcome))
            }
        }
    }

    /// Async form of `blocking_access_token`, sharing the same flight lock.
    ///
    /// Dropping the future while it waits does not cancel the attempt; the
    /// next caller joins it.
    pub async fn access_token(&self) -> Result<Option<String>> {
        let seen = self.attempts.load(Ordering::Acquire);
        let _flight = self.flight.lock().await;
        if let Some(shared) = self.shared_outcome(seen) {
            return Ok(shared);
        }
        match self.begin_attempt() {
            None => Ok(self.store.access_token()),
            Some(waiter) => {
                let outcome = waiter.await.map_err(|_| Error::Interrupted)?;
                Ok(self.finish_attempt(outcome))
            }
        }
    }

    /// Current status. Never blocks on an in-flight attempt.
    pub fn auth_status(&self) -> AuthStatus {
        self.store.status()
    }

    /// Clear the credential and notify logout listeners.
    ///
    /// Listeners are notified even if persisting the cleared state fails; that
    /// failure is returned afterwards. A panicking listener propagates.
    pub fn logout(&self) -> Result<()> {
        self.logout_with(LogoutReason::Explicit)
    }

    /// Inspect an error from an API call made with our token. A 401 means
    /// access was revoked while the token still looked valid, so log out.
    ///
    /// Returns whether a logout happened.
    pub fn handle_api_error(&self, error: &(dyn std::error::Error + 'static)) -> Result<bool> {
        if !indicates_unauthorized(error) {
            return Ok(false);
        }
        warn!(error = %error, "API call unauthorized, access was probably revoked");
        self.logout_with(LogoutReason::Unauthorized)?;
        Ok(true)
    }

    pub fn add_logout_listener<F>(&self, listener: F) -> LogoutListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = LogoutListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners().insert(id, Arc::new(listener));
        id
    }

    /// Returns whether the listener was registered.
    pub fn remove_logout_listener(&self, id: LogoutListenerId) -> bool {
        self.listeners().remove(&id).is_some()
    }

    /// Release a caller waiting on the current attempt as abandoned.
    ///
    /// The attempt itself keeps running until its flow ends, and the next
    /// caller waits on it rather than starting another. A no-op when nobody
    /// is waiting, and safe to call repeatedly.
    pub fn unlock(&self) {
        if self.gate.release_waiter(AttemptOutcome::Abandoned) {
            debug!("released waiting caller");
        }
    }

    /// Outcome of an attempt that completed while this caller queued.
    fn shared_outcome(&self, seen: u64) -> Option<Option<String>> {
        if self.attempts.load(Ordering::Acquire) == seen {
            return None;
        }
        debug!("sharing outcome of the attempt this caller queued behind");
        if self.last_succeeded.load(Ordering::Acquire) {
            Some(self.store.access_token())
        } else {
            Some(None)
        }
    }

    /// Decide what the current status requires. Must hold the flight lock.
    fn begin_attempt(&self) -> Option<oneshot::Receiver<AttemptOutcome>> {
        let status = self.store.status();
        if status == AuthStatus::Authenticated {
            return None;
        }

        match self.gate.arm() {
            Armed::Joined(waiter) => {
                debug!(%status, "joining attempt already in flight");
                Some(waiter)
            }
            Armed::Fresh { waiter, generation } => {
                match status {
                    AuthStatus::NotAuthenticated => self.start_authorization(generation),
                    _ => self.start_refresh(generation),
                }
                Some(waiter)
            }
        }
    }

    fn finish_attempt(&self, outcome: AttemptOutcome) -> Option<String> {
        let succeeded = outcome == AttemptOutcome::Succeeded;
        self.last_succeeded.store(succeeded, Ordering::Release);
        self.attempts.fetch_add(1, Ordering::AcqRel);
        if succeeded {
            self.store.access_token()
        } else {
            debug!(?outcome, "authentication attempt produced no token");
            None
        }
    }

    fn start_authorization(&self, generation: u64) {
        info!(generation, "not authenticated, starting authorization");
        let delivery = CodeDelivery::new(self.flow.clone(), self.gate.clone(), generation);
        self.acquirer.acquire(self.authorization.clone(), delivery);
    }

    fn start_refresh(&self, generation: u64) {
        info!(generation, "access token expired, starting refresh");
        let release = GateRelease::new(self.gate.clone(), generation, AttemptOutcome::Failed);
        self.flow
            .runtime
            .spawn(flow::refresh(self.flow.clone(), release));
    }

    fn logout_with(&self, reason: LogoutReason) -> Result<()> {
        let cleared = self.store.clear();
        metrics::record_logout(reason);
        info!(reason = reason.label(), "logged out");

        let listeners: Vec<LogoutListener> = self.listeners().values().cloned().collect();
        for listener in listeners {
            listener();
        }
        cleared
    }

    fn listeners(&self) -> MutexGuard<'_, HashMap<LogoutListenerId, LogoutListener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whether `error`, or anything in its source chain, is an HTTP 401.
///
/// A `reqwest::Error` is matched on its status; anything else on its message.
pub fn indicates_unauthorized(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(http) = err.downcast_ref::<reqwest::Error>() {
            if http.status() == Some(reqwest::StatusCode::UNAUTHORIZED) {
                return true;
            }
        }
        if err.to_string().contains("401") {
            return true;
        }
        current = err.source();
    }
    false
}
