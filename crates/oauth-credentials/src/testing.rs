//! Test doubles shared by the unit tests in this crate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::post;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use tokio::net::TcpListener;

/// Canned response for one grant type.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: u16,
    body: String,
    delay: Duration,
}

impl MockResponse {
    pub fn ok(body: &str) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A request received by the mock token endpoint.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub content_type: Option<String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn is_refresh(&self) -> bool {
        self.body.contains("grant_type=refresh_token")
    }
}

struct MockState {
    exchange: Mutex<MockResponse>,
    refresh: Mutex<MockResponse>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Token endpoint on `127.0.0.1:0` answering code exchanges and refreshes
/// with canned responses and recording every request body.
pub struct MockTokenServer {
    url: String,
    state: Arc<MockState>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockTokenServer {
    /// Must be called from within a tokio runtime.
    pub async fn start(exchange: MockResponse, refresh: MockResponse) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState {
            exchange: Mutex::new(exchange),
            refresh: Mutex::new(refresh),
            requests: Mutex::new(Vec::new()),
        });

        let app = axum::Router::new()
            .route("/token", post(token_handler))
            .with_state(state.clone());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}/token"),
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn exchange_count(&self) -> usize {
        self.requests().iter().filter(|r| !r.is_refresh()).count()
    }

    pub fn refresh_count(&self) -> usize {
        self.requests().iter().filter(|r| r.is_refresh()).count()
    }

    pub fn set_refresh(&self, response: MockResponse) {
        *self.state.refresh.lock().unwrap() = response;
    }
}

impl Drop for MockTokenServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn token_handler(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    let request = RecordedRequest {
        content_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    };
    let response = if request.is_refresh() {
        state.refresh.lock().unwrap().clone()
    } else {
        state.exchange.lock().unwrap().clone()
    };
    state.requests.lock().unwrap().push(request);

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }
    (
        StatusCode::from_u16(response.status).unwrap(),
        [(header::CONTENT_TYPE, "application/json")],
        response.body,
    )
}

/// Recorder for one test; install it with `metrics::set_default_local_recorder`.
pub fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    (recorder, handle)
}

/// Rendered sample lines of metric `name` that carry every label in `labels`.
pub fn samples<'a>(output: &'a str, name: &str, labels: &[&str]) -> Vec<&'a str> {
    let prefix = format!("{name}{{");
    output
        .lines()
        .filter(|line| line.starts_with(&prefix))
        .filter(|line| labels.iter().all(|label| line.contains(label)))
        .collect()
}
