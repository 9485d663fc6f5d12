//! Recognition-source interface
//!
//! The speech engine itself lives in the host front end (browser/Electron
//! speech APIs). The front end forwards engine callbacks to the daemon over
//! IPC as [`RecognitionEvent`]s, and the daemon steers the engine by pushing
//! [`EngineCommand`]s back out to subscribed clients.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Error kinds reported by the recognition engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecognitionErrorKind {
    /// Transport failure between the engine and its speech service
    Network,
    /// Microphone permission refused; fatal to listening until the user
    /// intervenes
    NotAllowed,
    /// No speech detected within the engine's window; informational
    NoSpeech,
    /// Anything else the engine reports
    Other,
}

/// Engine callbacks, forwarded verbatim from the recognition source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecognitionEvent {
    /// Engine began listening
    Started,

    /// A transcription result arrived
    Result {
        /// Transcribed text so far
        text: String,
        /// True once the engine finalizes the utterance
        is_final: bool,
    },

    /// Engine reported an error
    Error { kind: RecognitionErrorKind },

    /// Engine stopped listening (with or without a preceding error)
    Ended,
}

/// Control commands the coordinator issues to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineCommand {
    Start,
    Stop,
    Abort,
}

/// Errors when issuing engine commands
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine command channel is closed or full")]
    ChannelClosed,
}

/// Handle the coordinator uses to steer the recognition engine.
///
/// Commands are queued on a channel; the IPC layer drains it and notifies
/// the front end that owns the real engine.
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    /// Create a handle and the receiving end the IPC layer drains
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<EngineCommand>) {
        let (command_tx, command_rx) = mpsc::channel(buffer);
        (Self { command_tx }, command_rx)
    }

    /// Ask the engine to start listening
    pub fn start(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Start)
    }

    /// Ask the engine to stop listening
    pub fn stop(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Stop)
    }

    /// Ask the engine to abort immediately, discarding any pending result
    pub fn abort(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Abort)
    }

    fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.command_tx
            .try_send(command)
            .map_err(|_| EngineError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_are_queued_in_order() {
        let (handle, mut rx) = EngineHandle::new(8);
        handle.start().unwrap();
        handle.stop().unwrap();
        assert_eq!(rx.try_recv().unwrap(), EngineCommand::Start);
        assert_eq!(rx.try_recv().unwrap(), EngineCommand::Stop);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_serialization() {
        let event = RecognitionEvent::Error {
            kind: RecognitionErrorKind::Network,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("error"));
        assert!(json.contains("network"));
    }

    #[test]
    fn test_final_result_round_trip() {
        let json = r#"{"type":"result","text":"show me the products","is_final":true}"#;
        let event: RecognitionEvent = serde_json::from_str(json).unwrap();
        match event {
            RecognitionEvent::Result { text, is_final } => {
                assert_eq!(text, "show me the products");
                assert!(is_final);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
