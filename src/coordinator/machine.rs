//! Core state machine implementation
//!
//! Drives transitions between Idle, Listening, NetworkError and OfflineMode
//! from a single input channel: recognition-engine callbacks, connectivity
//! transitions, manual commands, and its own backoff timers.

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::ai::{fallback, AiClient, AiRequest};
use crate::connectivity::{ConnectivityEvent, ConnectivityHandle};
use crate::events::PipelineEvent;
use crate::recognition::{EngineHandle, RecognitionErrorKind, RecognitionEvent};

use super::retry::{backoff_delay, RetryContext};

/// Spoken when reconnect attempts are exhausted
const OFFLINE_ANNOUNCEMENT: &str = "I'm switching to offline mode with limited functionality. \
     Some commands will not be available.";

/// Spoken when microphone permission is refused
const MIC_DENIED_ANNOUNCEMENT: &str =
    "I don't have access to the microphone. Please check your browser permissions.";

/// Spoken acknowledgment of a manual retry command
const RETRY_ANNOUNCEMENT: &str = "Trying to reconnect to the speech service.";

/// Utterances treated as a manual retry command
const RETRY_TERMS: &[&str] = &[
    "retry",
    "reconnect",
    "go online",
    "réessayer",
    "reconnexion",
    "mode en ligne",
];

/// The four possible states of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionState {
    /// Engine stopped, waiting for a start request
    Idle,
    /// Engine active and accepting utterances
    Listening,
    /// Engine hit a network error, restart scheduled with backoff
    NetworkError,
    /// Restarts exhausted; network commands rejected locally until
    /// connectivity returns or the user asks for a retry
    OfflineMode,
}

impl Default for RecognitionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for RecognitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecognitionState::Idle => write!(f, "Idle"),
            RecognitionState::Listening => write!(f, "Listening"),
            RecognitionState::NetworkError => write!(f, "NetworkError"),
            RecognitionState::OfflineMode => write!(f, "OfflineMode"),
        }
    }
}

/// Manual commands from the IPC surface (or recognized retry phrases)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualCommand {
    /// Start listening
    Start,
    /// Stop listening
    Stop,
    /// Reset attempts, clear offline mode, restart the engine
    Retry,
}

/// Everything the coordinator reacts to, as explicit messages
#[derive(Debug)]
pub enum Input {
    /// Recognition-engine callback forwarded by the front end
    Recognition(RecognitionEvent),
    /// Connectivity transition from the monitor
    Connectivity(ConnectivityEvent),
    /// Manual command
    Command(ManualCommand),
    /// A backoff timer fired; stale generations are ignored
    BackoffElapsed { generation: u64 },
}

/// The state machine owning recognition lifecycle and offline-mode policy
pub struct Coordinator {
    state: RecognitionState,
    retry: RetryContext,
    engine: EngineHandle,
    connectivity: ConnectivityHandle,
    client: AiClient,
    site_context: String,
    event_tx: broadcast::Sender<PipelineEvent>,
    /// Feedback channel for backoff timers
    input_tx: mpsc::Sender<Input>,
    /// Only the newest backoff timer is valid; bumping this cancels any
    /// pending one
    backoff_generation: u64,
    /// When the current error episode began
    error_since: Option<std::time::Instant>,
}

impl Coordinator {
    pub fn new(
        engine: EngineHandle,
        connectivity: ConnectivityHandle,
        client: AiClient,
        site_context: String,
        event_tx: broadcast::Sender<PipelineEvent>,
        input_tx: mpsc::Sender<Input>,
    ) -> Self {
        Self {
            state: RecognitionState::Idle,
            retry: RetryContext::new(),
            engine,
            connectivity,
            client,
            site_context,
            event_tx,
            input_tx,
            backoff_generation: 0,
            error_since: None,
        }
    }

    /// Get the current state
    pub fn state(&self) -> RecognitionState {
        self.state
    }

    /// Current reconnect attempt count
    pub fn attempts(&self) -> u32 {
        self.retry.attempt()
    }

    /// Run the coordinator, processing inputs until the channel closes.
    /// One utterance is processed to completion before the next input is
    /// accepted.
    pub async fn run(&mut self, mut input_rx: mpsc::Receiver<Input>) {
        info!("coordinator started in Idle state");

        while let Some(input) = input_rx.recv().await {
            self.handle(input).await;
        }

        info!("coordinator stopped");
    }

    /// Process one input
    pub async fn handle(&mut self, input: Input) {
        match input {
            Input::Recognition(event) => self.handle_recognition(event).await,
            Input::Connectivity(event) => self.handle_connectivity(event),
            Input::Command(command) => self.handle_command(command),
            Input::BackoffElapsed { generation } => self.handle_backoff_elapsed(generation),
        }
    }

    async fn handle_recognition(&mut self, event: RecognitionEvent) {
        match event {
            RecognitionEvent::Started => {
                // Any successful (re)start clears the error episode.
                self.retry.reset();
                self.error_since = None;
                self.transition_to(RecognitionState::Listening);
            }

            RecognitionEvent::Result { text, is_final } => {
                if !is_final {
                    debug!(len = text.len(), "interim transcription");
                    return;
                }
                self.emit(PipelineEvent::UtteranceAccepted { text: text.clone() });
                self.process_utterance(&text).await;
            }

            RecognitionEvent::Error { kind } => self.handle_recognition_error(kind),

            RecognitionEvent::Ended => {
                // Continuous-listening contract: an engine that ends without
                // an error is restarted immediately.
                if self.state == RecognitionState::Listening {
                    debug!("engine ended while listening, restarting");
                    if let Err(e) = self.engine.start() {
                        warn!(?e, "failed to restart recognition engine");
                    }
                }
            }
        }
    }

    fn handle_recognition_error(&mut self, kind: RecognitionErrorKind) {
        match kind {
            RecognitionErrorKind::Network => {
                // Only meaningful while listening or already backing off;
                // offline mode freezes the episode.
                if matches!(
                    self.state,
                    RecognitionState::Listening | RecognitionState::NetworkError
                ) {
                    warn!("recognition engine reported a network error");
                    self.handle_network_error();
                }
            }
            RecognitionErrorKind::NotAllowed => {
                warn!("microphone access denied, listening disabled until user intervenes");
                // Discard anything still buffered in the engine; its
                // permission is gone.
                if let Err(e) = self.engine.abort() {
                    warn!(?e, "failed to abort engine");
                }
                self.emit(PipelineEvent::ResponseReady {
                    text: MIC_DENIED_ANNOUNCEMENT.to_string(),
                    directive: None,
                });
                self.transition_to(RecognitionState::Idle);
            }
            RecognitionErrorKind::NoSpeech => {
                // Normal during pauses in speech.
                debug!("no speech detected");
            }
            RecognitionErrorKind::Other => {
                warn!("unhandled recognition error");
            }
        }
    }

    /// One failed restart (or the initial failure): count it, then either
    /// degrade to offline mode or schedule the next attempt.
    fn handle_network_error(&mut self) {
        if self.error_since.is_none() {
            self.error_since = Some(std::time::Instant::now());
        }
        self.transition_to(RecognitionState::NetworkError);
        self.retry.record_attempt();

        if self.retry.exhausted() {
            info!(
                attempts = self.retry.attempt(),
                "reconnect attempts exhausted, entering offline mode"
            );
            // Cancel any pending timer; the episode is frozen now.
            self.backoff_generation += 1;
            self.transition_to(RecognitionState::OfflineMode);
            self.emit(PipelineEvent::ResponseReady {
                text: OFFLINE_ANNOUNCEMENT.to_string(),
                directive: None,
            });
            return;
        }

        self.schedule_backoff();
    }

    fn schedule_backoff(&mut self) {
        self.backoff_generation += 1;
        let generation = self.backoff_generation;
        let attempt = self.retry.attempt();
        let delay = backoff_delay(attempt);

        info!(
            attempt,
            max = self.retry.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            "scheduling recognition restart"
        );
        self.emit(PipelineEvent::ReconnectScheduled {
            attempt,
            delay_ms: delay.as_millis() as u64,
        });

        let input_tx = self.input_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = input_tx.send(Input::BackoffElapsed { generation }).await;
        });
    }

    fn handle_backoff_elapsed(&mut self, generation: u64) {
        if generation != self.backoff_generation || self.state != RecognitionState::NetworkError {
            debug!(generation, "ignoring stale backoff timer");
            return;
        }

        if !self.connectivity.is_online() {
            // Still unreachable; counts as a failed attempt.
            info!("connectivity still down at restart time");
            self.handle_network_error();
            return;
        }

        info!("attempting recognition restart");
        match self.engine.start() {
            Ok(()) => {
                // Optimistic: the Started event confirms and resets the
                // attempt counter.
                self.transition_to(RecognitionState::Listening);
            }
            Err(e) => {
                warn!(?e, "recognition restart failed");
                self.handle_network_error();
            }
        }
    }

    fn handle_connectivity(&mut self, event: ConnectivityEvent) {
        match event {
            ConnectivityEvent::BecameOnline => {
                self.emit(PipelineEvent::ConnectivityChanged { online: true });
                if matches!(
                    self.state,
                    RecognitionState::NetworkError | RecognitionState::OfflineMode
                ) {
                    info!("connectivity restored, restarting recognition");
                    self.backoff_generation += 1;
                    self.retry.reset();
                    self.error_since = None;
                    if let Err(e) = self.engine.start() {
                        warn!(?e, "failed to restart engine after reconnect");
                    }
                    self.transition_to(RecognitionState::Listening);
                }
            }
            ConnectivityEvent::BecameOffline => {
                self.emit(PipelineEvent::ConnectivityChanged { online: false });
                if self.state == RecognitionState::Listening {
                    // Stop the engine to avoid a burst of spurious errors.
                    info!("connectivity lost while listening, stopping engine");
                    if let Err(e) = self.engine.stop() {
                        warn!(?e, "failed to stop engine");
                    }
                    self.transition_to(RecognitionState::Idle);
                }
            }
        }
    }

    fn handle_command(&mut self, command: ManualCommand) {
        match command {
            ManualCommand::Start => {
                if self.state == RecognitionState::Idle {
                    if let Err(e) = self.engine.start() {
                        warn!(?e, "failed to start recognition engine");
                        return;
                    }
                    self.transition_to(RecognitionState::Listening);
                }
            }
            ManualCommand::Stop => {
                self.backoff_generation += 1;
                if self.state == RecognitionState::Listening {
                    if let Err(e) = self.engine.stop() {
                        warn!(?e, "failed to stop engine");
                    }
                }
                self.transition_to(RecognitionState::Idle);
            }
            ManualCommand::Retry => {
                info!("manual retry requested");
                self.backoff_generation += 1;
                self.retry.reset();
                self.error_since = None;
                if let Err(e) = self.engine.start() {
                    warn!(?e, "failed to restart engine on manual retry");
                }
                self.transition_to(RecognitionState::Listening);
            }
        }
    }

    /// Process one finalized utterance to completion
    async fn process_utterance(&mut self, text: &str) {
        let lower = text.to_lowercase();

        // Spoken retry commands work even when everything else is down.
        if RETRY_TERMS.iter().any(|t| lower.contains(t)) {
            info!("spoken retry command recognized");
            self.emit(PipelineEvent::ResponseReady {
                text: RETRY_ANNOUNCEMENT.to_string(),
                directive: None,
            });
            self.handle_command(ManualCommand::Retry);
            return;
        }

        // Device-level offline is rejected locally without a call. In
        // offline mode with the device still reachable, the request goes
        // out anyway and doubles as a recovery probe.
        if !self.connectivity.is_online() {
            info!("command rejected locally, device offline");
            self.emit(PipelineEvent::ResponseReady {
                text: fallback::OFFLINE_NOTICE.to_string(),
                directive: None,
            });
            return;
        }

        let request = AiRequest {
            utterance: text.to_string(),
            site_context: self.site_context.clone(),
        };
        let result = self.client.send(&request, false).await;

        if result.degraded && self.state != RecognitionState::OfflineMode {
            info!("degraded answer received, entering offline mode");
            self.backoff_generation += 1;
            self.transition_to(RecognitionState::OfflineMode);
        } else if !result.degraded && self.state == RecognitionState::OfflineMode {
            // A normal answer while offline means the backend recovered.
            info!("normal answer received in offline mode, recovering");
            self.retry.reset();
            self.error_since = None;
            if let Err(e) = self.engine.start() {
                warn!(?e, "failed to restart engine after recovery");
            }
            self.transition_to(RecognitionState::Listening);
        }

        self.emit(PipelineEvent::ResponseReady {
            text: result.text,
            directive: result.directive,
        });
    }

    /// Perform a state transition, emitting entry/exit events
    fn transition_to(&mut self, new_state: RecognitionState) {
        if new_state == self.state {
            return;
        }
        let old_state = self.state;

        info!(from = %old_state, to = %new_state, "state transition");

        self.state = new_state;

        if old_state == RecognitionState::OfflineMode
            && new_state == RecognitionState::Listening
        {
            self.emit(PipelineEvent::OnlineModeRestored);
        }

        match new_state {
            RecognitionState::Listening => self.emit(PipelineEvent::ListeningStarted),
            RecognitionState::Idle => self.emit(PipelineEvent::ListeningStopped),
            RecognitionState::OfflineMode => self.emit(PipelineEvent::OfflineModeEntered),
            // ReconnectScheduled carries the interesting details.
            RecognitionState::NetworkError => {}
        }
    }

    fn emit(&self, event: PipelineEvent) {
        debug!(%event, "emitting pipeline event");
        let _ = self.event_tx.send(event);
    }
}
