//! AI client: retrying streaming backend calls with local fallback answers
//!
//! The client never fails past its boundary. Transient and rate-limit
//! errors are retried with exponential backoff on a budget independent of
//! the recognition-level reconnect backoff; once the budget is spent the
//! answer degrades to a locally-sourced canned response keyed off the
//! utterance.

mod backend;
pub mod fallback;
mod stream;

pub use backend::{BackendError, GenerateBackend, HttpBackend};
pub use stream::StreamDecoder;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::connectivity::{ConnectivityHandle, ConnectivityState};

/// Maximum backend retries per request (attempts = retries + 1)
const MAX_RETRIES: u32 = 3;

/// First retry delay
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Retry delay ceiling
const MAX_RETRY_DELAY: Duration = Duration::from_millis(15000);

/// One voice command bound for the backend
#[derive(Debug, Clone)]
pub struct AiRequest {
    /// Finalized utterance text
    pub utterance: String,
    /// Description of the current page/catalog, passed verbatim
    pub site_context: String,
}

/// Decoded answer for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiResult {
    /// Text for display and speech synthesis
    pub text: String,
    /// Opaque UI-mutation directive for the external executor; never
    /// interpreted by the pipeline
    pub directive: Option<String>,
    /// True when the answer signals backend-side degradation; the
    /// coordinator uses this to enter offline mode without a hard failure
    pub degraded: bool,
}

/// Backend client with bounded retry and fallback degradation
pub struct AiClient {
    backend: Arc<dyn GenerateBackend>,
    connectivity: ConnectivityHandle,
}

impl AiClient {
    pub fn new(backend: Arc<dyn GenerateBackend>, connectivity: ConnectivityHandle) -> Self {
        Self {
            backend,
            connectivity,
        }
    }

    /// Answer one utterance. Always returns a usable result; when the
    /// backend is unusable the result is a canned fallback.
    ///
    /// `offline_mode` is the coordinator's degraded-mode flag; state
    /// mutation stays with the caller, this method only reads it.
    pub async fn send(&self, request: &AiRequest, offline_mode: bool) -> AiResult {
        if offline_mode || self.connectivity.current() == ConnectivityState::Offline {
            info!("offline, answering with the canned notice without a backend call");
            return fallback::offline_notice();
        }

        let prompt = build_prompt(request);
        let mut delay = INITIAL_RETRY_DELAY;

        for attempt in 0..=MAX_RETRIES {
            match self.try_generate(&prompt).await {
                Ok(result) => {
                    if fallback::mentions_service_unavailable(&result.text) {
                        warn!("backend reported itself degraded, using local fallback");
                        return fallback::for_utterance(&request.utterance);
                    }
                    debug!(
                        text_len = result.text.len(),
                        directive = result.directive.is_some(),
                        "backend answer decoded"
                    );
                    return result;
                }
                Err(err) => {
                    warn!(
                        attempt = attempt + 1,
                        max = MAX_RETRIES + 1,
                        error = %err,
                        "backend call failed"
                    );
                    if attempt == MAX_RETRIES {
                        break;
                    }
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_RETRY_DELAY);
                }
            }
        }

        info!("retry budget spent, answering with local fallback");
        fallback::for_utterance(&request.utterance)
    }

    /// One backend attempt: open the stream and reduce it to a result
    async fn try_generate(&self, prompt: &str) -> Result<AiResult, BackendError> {
        let mut chunk_rx = self.backend.generate(prompt).await?;

        let mut decoder = StreamDecoder::new();
        while let Some(chunk) = chunk_rx.recv().await {
            decoder.push(&chunk?);
            if decoder.is_done() {
                break;
            }
        }

        // A stream that closed without a single parseable fragment is a
        // malformed initial response, retried like any transient failure.
        if decoder.fragments() == 0 {
            return Err(BackendError::Malformed(
                "stream produced no parseable fragments".to_string(),
            ));
        }

        Ok(decoder.finish())
    }
}

/// Build the generation prompt: site context, utterance, and the envelope
/// the backend is asked to answer in.
fn build_prompt(request: &AiRequest) -> String {
    format!(
        "You are a voice assistant for a web site.\n\n\
         Site context:\n{}\n\n\
         The user said: \"{}\"\n\n\
         Answer the user in one or two spoken sentences. When the request \
         calls for a display change, include a directive for the UI.\n\
         Respond exactly in the form {{response: '<text to speak>', \
         script: '<directive>'}}.",
        request.site_context, request.utterance
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// One scripted backend behavior per call
    enum Script {
        RateLimited,
        Transient,
        Chunks(Vec<&'static str>),
    }

    struct ScriptedBackend {
        script: Mutex<VecDeque<Script>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Script>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl GenerateBackend for ScriptedBackend {
        fn generate(
            &self,
            _prompt: &str,
        ) -> Pin<
            Box<
                dyn Future<
                        Output = Result<
                            mpsc::Receiver<Result<Vec<u8>, BackendError>>,
                            BackendError,
                        >,
                    > + Send
                    + '_,
            >,
        > {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            Box::pin(async move {
                match next {
                    Some(Script::RateLimited) | None => {
                        Err(BackendError::RateLimited("429 Too Many Requests".to_string()))
                    }
                    Some(Script::Transient) => {
                        Err(BackendError::Transient("connection reset".to_string()))
                    }
                    Some(Script::Chunks(chunks)) => {
                        let (tx, rx) = mpsc::channel(8);
                        tokio::spawn(async move {
                            for chunk in chunks {
                                if tx.send(Ok(chunk.as_bytes().to_vec())).await.is_err() {
                                    return;
                                }
                            }
                        });
                        Ok(rx)
                    }
                }
            })
        }
    }

    fn client_with(script: Vec<Script>, online: bool) -> (AiClient, Arc<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend::new(script));
        let client = AiClient::new(backend.clone(), ConnectivityHandle::fixed(online));
        (client, backend)
    }

    fn request(utterance: &str) -> AiRequest {
        AiRequest {
            utterance: utterance.to_string(),
            site_context: "catalog of 6 products".to_string(),
        }
    }

    #[tokio::test]
    async fn test_successful_stream_is_returned_unchanged() {
        let (client, backend) = client_with(
            vec![Script::Chunks(vec![
                "{\"response\":\"Hello \"}\n",
                "{\"response\":\"world\",\"done\":true}\n",
            ])],
            true,
        );

        let result = client.send(&request("say hello"), false).await;
        assert_eq!(result.text, "Hello world");
        assert_eq!(result.directive, None);
        assert!(!result.degraded);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_offline_short_circuits_without_network_call() {
        let (client, backend) = client_with(vec![], false);

        let result = client.send(&request("what products do you have"), false).await;
        assert_eq!(result.text, fallback::OFFLINE_NOTICE);
        assert!(result.degraded);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_offline_mode_flag_short_circuits() {
        let (client, backend) = client_with(vec![], true);

        let result = client.send(&request("anything"), true).await;
        assert_eq!(result.text, fallback::OFFLINE_NOTICE);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhaustion_falls_back_by_keyword() {
        let (client, backend) = client_with(
            vec![
                Script::RateLimited,
                Script::RateLimited,
                Script::RateLimited,
                Script::RateLimited,
            ],
            true,
        );

        let result = client.send(&request("j'ai besoin d'aide"), false).await;
        assert_eq!(result.text, fallback::for_utterance("aide").text);
        assert_eq!(result.directive, None);
        assert_eq!(backend.calls(), 4); // initial attempt + 3 retries
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_then_success() {
        let (client, backend) = client_with(
            vec![
                Script::Transient,
                Script::Chunks(vec!["{\"response\":\"All good\",\"done\":true}\n"]),
            ],
            true,
        );

        let result = client.send(&request("status"), false).await;
        assert_eq!(result.text, "All good");
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_stream_is_retried_as_malformed() {
        let (client, backend) = client_with(
            vec![
                Script::Chunks(vec!["garbage that is not json\n"]),
                Script::Chunks(vec!["{\"response\":\"Recovered\",\"done\":true}\n"]),
            ],
            true,
        );

        let result = client.send(&request("hello"), false).await;
        assert_eq!(result.text, "Recovered");
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_degraded_backend_text_becomes_fallback() {
        let (client, _backend) = client_with(
            vec![Script::Chunks(vec![
                "{\"response\":\"I cannot reach the online service\",\"done\":true}\n",
            ])],
            true,
        );

        let result = client.send(&request("quel est le prix"), false).await;
        // Price-related utterance selects the product summary fallback.
        assert_eq!(result.text, fallback::for_utterance("prix").text);
    }

    #[test]
    fn test_prompt_includes_context_and_envelope() {
        let prompt = build_prompt(&request("show me products"));
        assert!(prompt.contains("catalog of 6 products"));
        assert!(prompt.contains("show me products"));
        assert!(prompt.contains("script:"));
    }
}
