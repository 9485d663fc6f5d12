//! Generative backend transport
//!
//! The trait seam keeps the client testable; the production implementation
//! POSTs to the backend's streaming generate endpoint and pumps raw body
//! chunks into a channel for the decoder.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Overall bound on one generate call
const GENERATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Backend failure classification. Rate-limited and transient failures
/// share one retry policy; the split exists for logs and diagnostics.
#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP 429 or a backend-reported rate-limit error object
    #[error("backend rate limited: {0}")]
    RateLimited(String),

    /// Timeout, connection failure, or a mid-stream transport error
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// Stream closed without a single parseable fragment
    #[error("malformed backend response: {0}")]
    Malformed(String),
}

/// A streaming generate call: resolves to a channel of raw body chunks
pub trait GenerateBackend: Send + Sync {
    fn generate(
        &self,
        prompt: &str,
    ) -> Pin<
        Box<
            dyn Future<Output = Result<mpsc::Receiver<Result<Vec<u8>, BackendError>>, BackendError>>
                + Send
                + '_,
        >,
    >;
}

/// Production backend: `POST {base}/api/generate` with
/// `{model, prompt, stream: true}`, response body consumed as a byte stream.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, model: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(GENERATE_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

impl GenerateBackend for HttpBackend {
    fn generate(
        &self,
        prompt: &str,
    ) -> Pin<
        Box<
            dyn Future<Output = Result<mpsc::Receiver<Result<Vec<u8>, BackendError>>, BackendError>>
                + Send
                + '_,
        >,
    > {
        let prompt = prompt.to_string();
        Box::pin(async move {
            let url = format!("{}/api/generate", self.base_url);
            let body = serde_json::json!({
                "model": self.model,
                "prompt": prompt,
                "stream": true,
            });

            debug!(%url, model = %self.model, "opening generate stream");

            let resp = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(classify_request_error)?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(classify_status(status, &body));
            }

            // Pump body chunks into a channel; the decoder owns pacing.
            let (tx, rx) = mpsc::channel(32);
            tokio::spawn(async move {
                let mut stream = resp.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    let item = chunk.map(|bytes| bytes.to_vec()).map_err(|e| {
                        warn!(error = %e, "generate stream broke mid-flight");
                        BackendError::Transient(format!("stream error: {}", e))
                    });
                    let failed = item.is_err();
                    if tx.send(item).await.is_err() || failed {
                        return;
                    }
                }
            });

            Ok(rx)
        })
    }
}

/// Map a reqwest send error onto the taxonomy
fn classify_request_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Transient("request timed out".to_string())
    } else if err.is_connect() {
        BackendError::Transient(format!("connection failed: {}", err))
    } else {
        BackendError::Transient(err.to_string())
    }
}

/// Map a non-success HTTP status onto the taxonomy. Some deployments report
/// rate limiting in the error body rather than the status line.
fn classify_status(status: reqwest::StatusCode, body: &str) -> BackendError {
    if status.as_u16() == 429 || body.contains("rate_limit_exceeded") {
        BackendError::RateLimited(format!("status {}: {}", status, truncate(body, 200)))
    } else {
        BackendError::Transient(format!("status {}: {}", status, truncate(body, 200)))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
