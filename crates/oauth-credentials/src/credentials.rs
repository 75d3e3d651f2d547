//! Credential state machine
//!
//! `CredentialStore` is the sole owner of the access token, refresh token and
//! expiry bookkeeping. A std `Mutex` serializes every operation, including the
//! status read, so callers never see fields from two different token
//! generations. Every successful mutation except `initialize` is handed to the
//! persister while the lock is still held, so saves land in mutation order.
//!
//! Status only degrades from `Authenticated` to `TokenExpired` inside
//! `status()`, which compares the token's age against its lifetime minus
//! `EXPIRY_SAFETY_OFFSET_SECS`. The downgrade clears nothing: the refresh flow
//! still needs the stored refresh token.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::EXPIRY_SAFETY_OFFSET_SECS;
use crate::error::{Error, Result};
use crate::persist::CredentialPersister;

/// Authentication status of the stored credential.
///
/// Transitions:
/// - NotAuthenticated → Authenticated (authorization code exchanged)
/// - Authenticated → TokenExpired (observed by `status()` once the safety window is reached)
/// - TokenExpired → Authenticated (refresh succeeded)
/// - any → NotAuthenticated (logout, or refresh failure)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    #[default]
    NotAuthenticated,
    TokenExpired,
    Authenticated,
}

impl AuthStatus {
    /// Status label for logging and command output.
    pub fn label(&self) -> &'static str {
        match self {
            AuthStatus::NotAuthenticated => "not_authenticated",
            AuthStatus::TokenExpired => "token_expired",
            AuthStatus::Authenticated => "authenticated",
        }
    }
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Serializable snapshot of the credential, as handed to a persister.
///
/// `expires_in` is the server-reported lifetime in seconds (a delta).
/// `acquired_at` is the unix timestamp in milliseconds at which the current
/// access token was issued.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub acquired_at: Option<u64>,
    #[serde(default)]
    pub status: AuthStatus,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("acquired_at", &self.acquired_at)
            .field("status", &self.status)
            .finish()
    }
}

#[derive(Clone, Default)]
struct State {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    acquired_at: Option<SystemTime>,
    status: AuthStatus,
}

impl State {
    fn snapshot(&self) -> Credential {
        Credential {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_in: self.expires_in,
            acquired_at: self.acquired_at.map(unix_millis),
            status: self.status,
        }
    }

    /// Whether the token has entered the safety window at `now`.
    fn is_expired(&self, now: SystemTime) -> bool {
        let (Some(acquired_at), Some(expires_in)) = (self.acquired_at, self.expires_in) else {
            return true;
        };
        let elapsed = unix_secs(now) - unix_secs(acquired_at);
        let lifetime = i64::try_from(expires_in).unwrap_or(i64::MAX);
        elapsed >= lifetime - EXPIRY_SAFETY_OFFSET_SECS
    }
}

/// Thread-safe owner of a single credential set.
pub struct CredentialStore {
    state: Mutex<State>,
    persister: Arc<dyn CredentialPersister>,
}

impl CredentialStore {
    /// Create an unauthenticated store without consulting the persister.
    pub fn new(persister: Arc<dyn CredentialPersister>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            persister,
        }
    }

    /// Create a store from whatever the persister holds.
    ///
    /// An absent record yields `NotAuthenticated`. A record that violates the
    /// status invariants fails with `InvalidState`.
    pub fn load(persister: Arc<dyn CredentialPersister>) -> Result<Self> {
        let store = Self::new(persister);
        match store.persister.load()? {
            Some(credential) => {
                store.initialize(
                    credential.access_token,
                    credential.refresh_token,
                    credential.expires_in,
                    credential.acquired_at.map(from_unix_millis),
                    credential.status,
                )?;
                debug!(status = %credential.status, "loaded stored credential");
            }
            None => debug!("no stored credential, starting unauthenticated"),
        }
        Ok(store)
    }

    /// Bulk-load state without persisting it.
    ///
    /// Any status other than `NotAuthenticated` requires every token field.
    /// `NotAuthenticated` discards whatever fields were passed.
    pub fn initialize(
        &self,
        access_token: Option<String>,
        refresh_token: Option<String>,
        expires_in: Option<u64>,
        acquired_at: Option<SystemTime>,
        status: AuthStatus,
    ) -> Result<()> {
        let next = if status == AuthStatus::NotAuthenticated {
            State::default()
        } else {
            if access_token.is_none()
                || refresh_token.is_none()
                || acquired_at.is_none()
                || expires_in.is_none()
            {
                return Err(Error::InvalidState(format!(
                    "{status} credential requires access token, refresh token, lifetime and acquisition time"
                )));
            }
            State {
                access_token,
                refresh_token,
                expires_in,
                acquired_at,
                status,
            }
        };
        *self.lock() = next;
        Ok(())
    }

    /// Store a freshly issued token pair acquired now.
    pub fn authenticate(
        &self,
        access_token: String,
        refresh_token: String,
        expires_in: u64,
    ) -> Result<()> {
        self.authenticate_at(access_token, refresh_token, expires_in, SystemTime::now())
    }

    /// Store a token pair issued at `acquired_at`, then persist.
    pub fn authenticate_at(
        &self,
        access_token: String,
        refresh_token: String,
        expires_in: u64,
        acquired_at: SystemTime,
    ) -> Result<()> {
        if access_token.is_empty() {
            return Err(Error::InvalidArgument("access token is empty".into()));
        }
        if refresh_token.is_empty() {
            return Err(Error::InvalidArgument("refresh token is empty".into()));
        }

        let mut state = self.lock();
        *state = State {
            access_token: Some(access_token),
            refresh_token: Some(refresh_token),
            expires_in: Some(expires_in),
            acquired_at: Some(acquired_at),
            status: AuthStatus::Authenticated,
        };
        debug!(expires_in, "stored new token pair");
        self.persister.save(&state.snapshot())
    }

    /// Replace the access token after a refresh, keeping the refresh token.
    pub fn set_new_access_token(&self, access_token: String, expires_in: u64) -> Result<()> {
        if access_token.is_empty() {
            return Err(Error::InvalidArgument("access token is empty".into()));
        }

        let mut state = self.lock();
        if state.refresh_token.is_none() {
            return Err(Error::InvalidState(
                "cannot set an access token without a refresh token".into(),
            ));
        }
        state.access_token = Some(access_token);
        state.expires_in = Some(expires_in);
        state.acquired_at = Some(SystemTime::now());
        state.status = AuthStatus::Authenticated;
        debug!(expires_in, "stored refreshed access token");
        self.persister.save(&state.snapshot())
    }

    /// Forget every credential field and persist the empty state.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.lock();
        *state = State::default();
        debug!("cleared credential");
        self.persister.save(&state.snapshot())
    }

    /// Current status, downgrading `Authenticated` to `TokenExpired` if the
    /// token has entered the safety window.
    pub fn status(&self) -> AuthStatus {
        self.status_at(SystemTime::now())
    }

    /// `status()` evaluated against an explicit clock reading.
    pub fn status_at(&self, now: SystemTime) -> AuthStatus {
        let mut state = self.lock();
        if state.status == AuthStatus::Authenticated && state.is_expired(now) {
            debug!(expires_in = ?state.expires_in, "access token reached expiry window");
            state.status = AuthStatus::TokenExpired;
        }
        state.status
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.lock().refresh_token.clone()
    }

    /// Lifetime of the current access token in seconds, as reported by the server.
    pub fn expires_in(&self) -> Option<u64> {
        self.lock().expires_in
    }

    /// When the current access token was issued.
    pub fn acquired_at(&self) -> Option<SystemTime> {
        self.lock().acquired_at
    }

    /// Consistent copy of every field, without an expiry check.
    pub fn snapshot(&self) -> Credential {
        self.lock().snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unix_secs(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn from_unix_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}
