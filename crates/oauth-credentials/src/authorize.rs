//! Interactive authorization: consent URL and redirect handling
//!
//! The consent UI itself lives outside this crate. It receives an
//! `AuthorizationRequest`, sends the user to `request.url()`, watches for the
//! redirect back to `redirect_uri`, and hands the extracted code to the
//! `CodeDelivery` it was given.

use reqwest::Url;

use crate::config::OAuthConfig;
use crate::flow::CodeDelivery;

/// Parameters for the authorization endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub authorization_endpoint: String,
    pub redirect_uri: String,
    pub response_type: String,
    pub client_id: String,
    /// Scopes, individually encoded and joined with `%20`.
    pub scope: String,
    pub access_type: String,
}

impl AuthorizationRequest {
    pub fn from_config(config: &OAuthConfig) -> Self {
        Self {
            authorization_endpoint: config.authorization_endpoint.clone(),
            redirect_uri: config.redirect_uri.clone(),
            response_type: config.response_type.clone(),
            client_id: config.client_id.clone(),
            scope: join_scopes(&config.scopes),
            access_type: config.access_type.clone(),
        }
    }

    /// Full consent URL.
    pub fn url(&self) -> String {
        let separator = if self.authorization_endpoint.contains('?') {
            '&'
        } else {
            '?'
        };
        format!(
            "{}{}redirect_uri={}&response_type={}&client_id={}&scope={}&access_type={}",
            self.authorization_endpoint,
            separator,
            urlencoded(&self.redirect_uri),
            urlencoded(&self.response_type),
            urlencoded(&self.client_id),
            self.scope,
            urlencoded(&self.access_type),
        )
    }
}

/// Join scopes with `%20`, encoding each one.
pub fn join_scopes(scopes: &[String]) -> String {
    scopes
        .iter()
        .map(|s| urlencoded(s))
        .collect::<Vec<_>>()
        .join("%20")
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn urlencoded(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// What a URL seen by the consent UI means for the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectOutcome {
    /// The server redirected back with an authorization code.
    Code(String),
    /// The server redirected back with an error such as `access_denied`.
    Denied(String),
    /// Not the final redirect; keep waiting.
    Pending,
}

/// Classify a URL by its `code` / `error` query parameters.
pub fn parse_redirect(url: &str) -> RedirectOutcome {
    let Ok(url) = Url::parse(url.trim()) else {
        return RedirectOutcome::Pending;
    };
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" if !value.is_empty() => return RedirectOutcome::Code(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }
    error.map_or(RedirectOutcome::Pending, RedirectOutcome::Denied)
}

/// Obtains an authorization code from the user.
///
/// `acquire` is called on the thread that asked for a token, while that
/// caller holds the authenticator's flight lock, so it must return promptly
/// and finish the interaction elsewhere. The `CodeDelivery` is consumed by
/// `deliver` or `abandon`; dropping it counts as abandonment. Either way the
/// waiting caller is released exactly once.
pub trait CodeAcquirer: Send + Sync {
    fn acquire(&self, request: AuthorizationRequest, delivery: CodeDelivery);
}
