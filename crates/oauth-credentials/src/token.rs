//! OAuth token endpoint calls
//!
//! Handles the two token endpoint interactions:
//! 1. Authorization code exchange (end of the interactive consent flow)
//! 2. Access token refresh
//!
//! Both POST a form-urlencoded body to the configured token URL and parse a
//! JSON token response. Neither retries; the caller decides what a failure
//! means for the stored credential.

use std::time::Duration;

use common::Secret;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::constants::{CONNECT_TIMEOUT, GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN, READ_TIMEOUT};
use crate::error::{Error, Result};
use crate::metrics;

/// Where and as whom token requests are made.
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    pub url: String,
    pub client_id: String,
    /// Omitted from requests when absent or blank (public clients).
    pub client_secret: Option<Secret<String>>,
}

impl TokenEndpoint {
    fn secret(&self) -> Option<&str> {
        self.client_secret
            .as_ref()
            .filter(|s| !s.is_blank())
            .map(|s| s.expose().as_str())
    }
}

/// Response from the token endpoint.
///
/// `expires_in` is a delta in seconds from the response time. Some servers
/// send it as a numeric string, so both forms are accepted. A refresh may
/// omit `refresh_token`; a code exchange yields a [`TokenPair`] instead.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(deserialize_with = "lifetime_seconds")]
    pub expires_in: u64,
}

/// Tokens issued by an authorization code exchange.
#[derive(Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

impl TryFrom<TokenResponse> for TokenPair {
    type Error = Error;

    fn try_from(token: TokenResponse) -> Result<Self> {
        match token.refresh_token {
            Some(refresh_token) if !refresh_token.is_empty() => Ok(Self {
                access_token: token.access_token,
                refresh_token,
                expires_in: token.expires_in,
            }),
            _ => Err(Error::Protocol(
                "code exchange response has no refresh_token".into(),
            )),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Lifetime {
    Seconds(u64),
    Text(String),
}

fn lifetime_seconds<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Lifetime::deserialize(deserializer)? {
        Lifetime::Seconds(secs) => Ok(secs),
        Lifetime::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// OAuth error body (RFC 6749 §5.2).
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Build the HTTP client used for token requests.
pub fn http_client() -> Result<reqwest::Client> {
    http_client_with_timeouts(CONNECT_TIMEOUT, READ_TIMEOUT)
}

pub(crate) fn http_client_with_timeouts(
    connect: Duration,
    read: Duration,
) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect)
        .read_timeout(read)
        .build()
        .map_err(|e| Error::Network(format!("building HTTP client: {e}")))
}

/// Form fields for the authorization code exchange, in wire order.
pub fn code_exchange_form<'a>(
    endpoint: &'a TokenEndpoint,
    code: &'a str,
    redirect_uri: &'a str,
) -> Vec<(&'static str, &'a str)> {
    let mut form = vec![("code", code), ("client_id", endpoint.client_id.as_str())];
    if let Some(secret) = endpoint.secret() {
        form.push(("client_secret", secret));
    }
    form.push(("redirect_uri", redirect_uri));
    form.push(("grant_type", GRANT_AUTHORIZATION_CODE));
    form
}

/// Form fields for the refresh token exchange, in wire order.
pub fn refresh_form<'a>(endpoint: &'a TokenEndpoint, refresh: &'a str) -> Vec<(&'static str, &'a str)> {
    let mut form = vec![("client_id", endpoint.client_id.as_str())];
    if let Some(secret) = endpoint.secret() {
        form.push(("client_secret", secret));
    }
    form.push(("refresh_token", refresh));
    form.push(("grant_type", GRANT_REFRESH_TOKEN));
    form
}

/// Exchange an authorization code for an access/refresh token pair.
pub async fn exchange_code(
    client: &reqwest::Client,
    endpoint: &TokenEndpoint,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenPair> {
    let result = post_form(client, endpoint, &code_exchange_form(endpoint, code, redirect_uri))
        .await
        .and_then(|(status, body)| {
            if !status.is_success() {
                return Err(Error::Network(format!(
                    "token endpoint returned {status}: {body}"
                )));
            }
            TokenPair::try_from(parse_token_response(&body)?)
        });
    metrics::record_token_request(GRANT_AUTHORIZATION_CODE, &result);
    result
}

/// Obtain a new access token with a refresh token.
///
/// A "not found" class response (404/410), or `invalid_grant` on a 400, means
/// the refresh token itself is no longer valid and surfaces as `Revoked`.
pub async fn refresh_token(
    client: &reqwest::Client,
    endpoint: &TokenEndpoint,
    refresh: &str,
) -> Result<TokenResponse> {
    let result = post_form(client, endpoint, &refresh_form(endpoint, refresh))
        .await
        .and_then(|(status, body)| {
            if !status.is_success() {
                if is_revocation(status, &body) {
                    return Err(Error::Revoked(format!(
                        "refresh token rejected ({status}): {body}"
                    )));
                }
                return Err(Error::Network(format!(
                    "token refresh returned {status}: {body}"
                )));
            }
            parse_token_response(&body)
        });
    metrics::record_token_request(GRANT_REFRESH_TOKEN, &result);
    result
}

async fn post_form(
    client: &reqwest::Client,
    endpoint: &TokenEndpoint,
    form: &[(&str, &str)],
) -> Result<(reqwest::StatusCode, String)> {
    let grant_type = form
        .iter()
        .find(|(k, _)| *k == "grant_type")
        .map(|(_, v)| *v)
        .unwrap_or_default();
    debug!(url = %endpoint.url, grant_type, "requesting token");

    let response = client
        .post(&endpoint.url)
        .form(form)
        .send()
        .await
        .map_err(|e| Error::Network(format!("{grant_type} request failed: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::Network(format!("reading token response: {e}")))?;
    Ok((status, body))
}

fn parse_token_response(body: &str) -> Result<TokenResponse> {
    let token: TokenResponse = serde_json::from_str(body)
        .map_err(|e| Error::Protocol(format!("invalid token response: {e}")))?;
    if token.access_token.is_empty() {
        return Err(Error::Protocol("token response has an empty access_token".into()));
    }
    Ok(token)
}

fn is_revocation(status: reqwest::StatusCode, body: &str) -> bool {
    match status.as_u16() {
        404 | 410 => true,
        400 => serde_json::from_str::<ErrorResponse>(body)
            .map(|e| e.error == "invalid_grant")
            .unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockResponse, MockTokenServer};

    fn endpoint(url: &str, secret: Option<&str>) -> TokenEndpoint {
        TokenEndpoint {
            url: url.into(),
            client_id: "client-123".into(),
            client_secret: secret.map(|s| Secret::new(s.to_string())),
        }
    }

    #[test]
    fn token_response_accepts_numeric_or_string_lifetime() {
        let json = r#"{"access_token":"at_abc","refresh_token":"rt_def","expires_in":3600}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "at_abc");
        assert_eq!(token.refresh_token.as_deref(), Some("rt_def"));
        assert_eq!(token.expires_in, 3600);

        let json = r#"{"access_token":"at_abc","expires_in":"3599"}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.expires_in, 3599);
        assert!(token.refresh_token.is_none());
    }

    #[test]
    fn token_response_rejects_bad_lifetime() {
        for json in [
            r#"{"access_token":"at"}"#,
            r#"{"access_token":"at","expires_in":"soon"}"#,
            r#"{"access_token":"at","expires_in":-5}"#,
        ] {
            assert!(parse_token_response(json).is_err(), "accepted {json}");
        }
    }

    #[test]
    fn empty_access_token_is_protocol_error() {
        let result = parse_token_response(r#"{"access_token":"","expires_in":3600}"#);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn code_exchange_form_order_and_secret_omission() {
        let public = endpoint("http://unused", None);
        let form = code_exchange_form(&public, "the-code", "http://localhost");
        let keys: Vec<_> = form.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, ["code", "client_id", "redirect_uri", "grant_type"]);
        assert_eq!(form[3].1, "authorization_code");

        let blank = endpoint("http://unused", Some(""));
        assert_eq!(code_exchange_form(&blank, "c", "r").len(), 4);

        let confidential = endpoint("http://unused", Some("s3cret"));
        let keys: Vec<_> = code_exchange_form(&confidential, "c", "r")
            .iter()
            .map(|(k, _)| *k)
            .collect();
        assert_eq!(
            keys,
            ["code", "client_id", "client_secret", "redirect_uri", "grant_type"]
        );
    }

    #[test]
    fn refresh_form_order() {
        let confidential = endpoint("http://unused", Some("s3cret"));
        let form = refresh_form(&confidential, "rt_1");
        assert_eq!(
            form,
            vec![
                ("client_id", "client-123"),
                ("client_secret", "s3cret"),
                ("refresh_token", "rt_1"),
                ("grant_type", "refresh_token"),
            ]
        );
    }

    #[test]
    fn client_secret_is_sent_but_never_logged() {
        let confidential = endpoint("http://unused", Some("s3cret"));
        let debug = format!("{confidential:?}");
        assert!(debug.contains("client_secret: Some([REDACTED])"), "{debug}");
        assert!(!debug.contains("s3cret"), "{debug}");
        assert!(refresh_form(&confidential, "rt").contains(&("client_secret", "s3cret")));

        // A secret file holding only a newline must not turn into an empty field.
        let blank = endpoint("http://unused", Some(" \n"));
        assert!(refresh_form(&blank, "rt").iter().all(|(k, _)| *k != "client_secret"));
        assert!(
            code_exchange_form(&blank, "c", "r")
                .iter()
                .all(|(k, _)| *k != "client_secret")
        );
    }

    #[test]
    fn revocation_classification() {
        use reqwest::StatusCode;
        assert!(is_revocation(StatusCode::NOT_FOUND, ""));
        assert!(is_revocation(StatusCode::GONE, ""));
        assert!(is_revocation(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#
        ));
        assert!(!is_revocation(StatusCode::BAD_REQUEST, r#"{"error":"invalid_request"}"#));
        assert!(!is_revocation(StatusCode::INTERNAL_SERVER_ERROR, ""));
        assert!(!is_revocation(StatusCode::UNAUTHORIZED, ""));
    }

    #[tokio::test]
    async fn exchange_code_posts_form_and_parses_tokens() {
        let server = MockTokenServer::start(
            MockResponse::ok(r#"{"access_token":"at_1","refresh_token":"rt_1","expires_in":"3600"}"#),
            MockResponse::ok("{}"),
        )
        .await;
        let client = http_client().unwrap();

        let token = exchange_code(
            &client,
            &endpoint(&server.url(), Some("s3cret")),
            "auth code/1",
            "http://localhost",
        )
        .await
        .unwrap();
        assert_eq!(token.access_token, "at_1");
        assert_eq!(token.refresh_token, "rt_1");
        assert_eq!(token.expires_in, 3600);

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].content_type.as_deref(),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(
            requests[0].body,
            "code=auth+code%2F1&client_id=client-123&client_secret=s3cret&redirect_uri=http%3A%2F%2Flocalhost&grant_type=authorization_code"
        );
    }

    #[test]
    fn token_pair_requires_non_empty_refresh_token() {
        let pair = |json: &str| TokenPair::try_from(serde_json::from_str::<TokenResponse>(json).unwrap());

        let ok = pair(r#"{"access_token":"at","refresh_token":"rt","expires_in":60}"#).unwrap();
        assert_eq!((ok.access_token.as_str(), ok.refresh_token.as_str()), ("at", "rt"));
        assert!(matches!(
            pair(r#"{"access_token":"at","refresh_token":"","expires_in":60}"#),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            pair(r#"{"access_token":"at","expires_in":60}"#),
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn exchange_code_requires_refresh_token() {
        let server = MockTokenServer::start(
            MockResponse::ok(r#"{"access_token":"at_1","expires_in":3600}"#),
            MockResponse::ok("{}"),
        )
        .await;
        let client = http_client().unwrap();

        let result = exchange_code(&client, &endpoint(&server.url(), None), "c", "r").await;
        assert!(matches!(result, Err(Error::Protocol(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn exchange_code_non_success_is_network_error() {
        let server = MockTokenServer::start(
            MockResponse::status(500, "boom"),
            MockResponse::ok("{}"),
        )
        .await;
        let client = http_client().unwrap();

        let result = exchange_code(&client, &endpoint(&server.url(), None), "c", "r").await;
        match result {
            Err(Error::Network(msg)) => assert!(msg.contains("500"), "got {msg}"),
            other => panic!("expected Network error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exchange_code_malformed_body_is_protocol_error() {
        let server = MockTokenServer::start(
            MockResponse::ok("<html>not json</html>"),
            MockResponse::ok("{}"),
        )
        .await;
        let client = http_client().unwrap();

        let result = exchange_code(&client, &endpoint(&server.url(), None), "c", "r").await;
        assert!(matches!(result, Err(Error::Protocol(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn refresh_token_parses_response_without_refresh_token() {
        let server = MockTokenServer::start(
            MockResponse::ok("{}"),
            MockResponse::ok(r#"{"access_token":"at_2","expires_in":1800}"#),
        )
        .await;
        let client = http_client().unwrap();

        let token = refresh_token(&client, &endpoint(&server.url(), None), "rt_1")
            .await
            .unwrap();
        assert_eq!(token.access_token, "at_2");
        assert!(token.refresh_token.is_none());
        assert_eq!(
            server.requests()[0].body,
            "client_id=client-123&refresh_token=rt_1&grant_type=refresh_token"
        );
    }

    #[tokio::test]
    async fn refresh_token_not_found_is_revoked() {
        let server = MockTokenServer::start(
            MockResponse::ok("{}"),
            MockResponse::status(404, "gone"),
        )
        .await;
        let client = http_client().unwrap();

        let result = refresh_token(&client, &endpoint(&server.url(), None), "rt_1").await;
        assert!(matches!(result, Err(Error::Revoked(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn refresh_token_server_error_is_network_error() {
        let server = MockTokenServer::start(
            MockResponse::ok("{}"),
            MockResponse::status(503, "unavailable"),
        )
        .await;
        let client = http_client().unwrap();

        let result = refresh_token(&client, &endpoint(&server.url(), None), "rt_1").await;
        assert!(matches!(result, Err(Error::Network(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        // Bind then drop a listener so the port is very likely closed.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = http_client().unwrap();
        let result = refresh_token(&client, &endpoint(&format!("http://{addr}/token"), None), "rt").await;
        assert!(matches!(result, Err(Error::Network(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn read_timeout_bounds_a_stalled_endpoint() {
        let server = MockTokenServer::start(
            MockResponse::ok("{}").delayed(Duration::from_secs(5)),
            MockResponse::ok("{}"),
        )
        .await;
        let client =
            http_client_with_timeouts(Duration::from_secs(1), Duration::from_millis(200)).unwrap();

        let started = std::time::Instant::now();
        let result = exchange_code(&client, &endpoint(&server.url(), None), "c", "r").await;
        assert!(matches!(result, Err(Error::Network(_))), "got {result:?}");
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
