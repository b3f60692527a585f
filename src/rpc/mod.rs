//! HTTP control channel to a worker process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::protocol::endpoints;

/// Outcome of one request; transport failures are folded into `was_successful = false`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerResponse {
    pub was_successful: bool,
    pub body: Option<String>,
}

impl ServerResponse {
    fn failed() -> Self {
        Self::default()
    }

    /// The body, if the call succeeded and returned something
    pub fn content(&self) -> Option<&str> {
        if !self.was_successful {
            return None;
        }
        self.body.as_deref().filter(|b| !b.trim().is_empty())
    }
}

/// Authenticated client for one worker's control channel
#[derive(Debug)]
pub struct RpcClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    timeout: Duration,
    ready: AtomicBool,
}

impl RpcClient {
    /// Client for a worker listening on loopback `port`
    pub fn new(port: u16, token: impl Into<String>, timeout: Duration) -> Self {
        Self::with_base_url(format!("http://127.0.0.1:{port}/"), token, timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
            token: token.into(),
            timeout,
            ready: AtomicBool::new(false),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get(&self, endpoint: &str) -> ServerResponse {
        self.get_with_timeout(endpoint, self.timeout).await
    }

    pub async fn post_json(&self, endpoint: &str, body: String) -> ServerResponse {
        let request = self
            .client
            .post(self.url(endpoint))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        self.send(endpoint, request, self.timeout).await
    }

    async fn get_with_timeout(&self, endpoint: &str, timeout: Duration) -> ServerResponse {
        let request = self.client.get(self.url(endpoint));
        self.send(endpoint, request, timeout).await
    }

    async fn send(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> ServerResponse {
        let request = request
            .header("token", &self.token)
            .bearer_auth(&self.token)
            .timeout(timeout);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("Request to /{} failed: {}", endpoint, e);
                return ServerResponse::failed();
            }
        };

        let status = response.status();
        if !status.is_success() {
            debug!("Request to /{} returned {}", endpoint, status);
            return ServerResponse::failed();
        }

        match response.text().await {
            Ok(body) => ServerResponse {
                was_successful: true,
                body: Some(body),
            },
            Err(e) => {
                debug!("Reading response from /{} failed: {}", endpoint, e);
                ServerResponse::failed()
            }
        }
    }

    /// Worker version string, if it answers
    pub async fn version(&self) -> Option<String> {
        let response = self.get(endpoints::VERSION).await;
        response.content().map(|body| body.trim().to_string())
    }

    /// Probe the worker until it reports its token is configured.
    ///
    /// Returns `false` once `max_attempts` readiness checks have failed. A positive answer is
    /// remembered, later calls return immediately.
    pub async fn wait_until_ready(&self, max_attempts: u32, attempt_timeout: Duration) -> bool {
        if self.ready.load(Ordering::Acquire) {
            return true;
        }

        for attempt in 1..=max_attempts {
            let started = tokio::time::Instant::now();
            let response = self
                .get_with_timeout(endpoints::IS_TOKEN_SET, attempt_timeout)
                .await;

            if response
                .content()
                .is_some_and(|body| body.trim().trim_matches('"').eq_ignore_ascii_case("true"))
            {
                self.ready.store(true, Ordering::Release);
                return true;
            }

            debug!("Worker not ready yet (attempt {}/{})", attempt, max_attempts);
            // Connection refusals return instantly; pace the checks.
            if attempt < max_attempts {
                tokio::time::sleep_until(started + attempt_timeout.min(Duration::from_millis(200)))
                    .await;
            }
        }

        warn!(
            "Unable to connect to the worker at {} after {} attempts",
            self.base_url, max_attempts
        );
        false
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}
