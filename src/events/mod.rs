//! Events emitted by the pipeline as it moves through its states
//!
//! Broadcast to the IPC layer, which updates its status snapshot and
//! forwards the interesting ones to subscribed front-end clients.

use serde::{Deserialize, Serialize};

/// Events emitted by the coordinator and connectivity monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Recognition engine started (or restarted) listening
    ListeningStarted,

    /// Recognition engine stopped, back to idle
    ListeningStopped,

    /// A finalized utterance was accepted for processing
    UtteranceAccepted {
        /// The transcribed text
        text: String,
    },

    /// A recognition restart has been scheduled after a network error
    ReconnectScheduled {
        /// Restart attempt number (1-based)
        attempt: u32,
        /// Delay before the attempt fires, in milliseconds
        delay_ms: u64,
    },

    /// Reconnect attempts exhausted, degraded to offline mode
    OfflineModeEntered,

    /// Offline mode cleared, normal operation restored
    OnlineModeRestored,

    /// Device connectivity changed
    ConnectivityChanged {
        /// True when the device became reachable
        online: bool,
    },

    /// An answer is ready for the output sink
    ResponseReady {
        /// Text to display and speak
        text: String,
        /// Opaque UI-mutation directive for the external executor
        directive: Option<String>,
    },
}

impl std::fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineEvent::ListeningStarted => write!(f, "LISTENING_STARTED"),
            PipelineEvent::ListeningStopped => write!(f, "LISTENING_STOPPED"),
            PipelineEvent::UtteranceAccepted { text } => {
                write!(f, "UTTERANCE_ACCEPTED ({} chars)", text.len())
            }
            PipelineEvent::ReconnectScheduled { attempt, delay_ms } => {
                write!(f, "RECONNECT_SCHEDULED (attempt {} in {}ms)", attempt, delay_ms)
            }
            PipelineEvent::OfflineModeEntered => write!(f, "OFFLINE_MODE_ENTERED"),
            PipelineEvent::OnlineModeRestored => write!(f, "ONLINE_MODE_RESTORED"),
            PipelineEvent::ConnectivityChanged { online } => {
                write!(f, "CONNECTIVITY_CHANGED (online={})", online)
            }
            PipelineEvent::ResponseReady { text, directive } => {
                write!(
                    f,
                    "RESPONSE_READY ({} chars, directive={})",
                    text.len(),
                    directive.is_some()
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = PipelineEvent::ReconnectScheduled {
            attempt: 3,
            delay_ms: 4000,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("reconnect_scheduled"));
        assert!(json.contains("4000"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"offline_mode_entered"}"#;
        let event: PipelineEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, PipelineEvent::OfflineModeEntered));
    }

    #[test]
    fn test_response_event_round_trip() {
        let event = PipelineEvent::ResponseReady {
            text: "Hello".to_string(),
            directive: Some("show-products".to_string()),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: PipelineEvent = serde_json::from_str(&json).unwrap();
        match back {
            PipelineEvent::ResponseReady { text, directive } => {
                assert_eq!(text, "Hello");
                assert_eq!(directive.as_deref(), Some("show-products"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
