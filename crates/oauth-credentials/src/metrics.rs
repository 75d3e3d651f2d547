//! Counters for token endpoint traffic and logouts
//!
//! - `oauth_token_requests_total` (counter): labels `grant_type`, `outcome`
//! - `oauth_logouts_total` (counter): label `reason`
//!
//! Calls are no-ops until the embedding application installs a recorder.

use crate::error::{Error, Result};

/// Why credentials were dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// The application asked for it.
    Explicit,
    /// An API call came back 401 while the token was still considered valid.
    Unauthorized,
}

impl LogoutReason {
    pub fn label(&self) -> &'static str {
        match self {
            LogoutReason::Explicit => "explicit",
            LogoutReason::Unauthorized => "unauthorized",
        }
    }
}

/// Outcome label for a token endpoint call.
pub(crate) fn outcome_label<T>(result: &Result<T>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(Error::Revoked(_)) => "revoked",
        Err(Error::Protocol(_)) => "protocol",
        Err(_) => "network",
    }
}

pub(crate) fn record_token_request<T>(grant_type: &'static str, result: &Result<T>) {
    metrics::counter!(
        "oauth_token_requests_total",
        "grant_type" => grant_type,
        "outcome" => outcome_label(result)
    )
    .increment(1);
}

pub(crate) fn record_logout(reason: LogoutReason) {
    metrics::counter!("oauth_logouts_total", "reason" => reason.label()).increment(1);
}
