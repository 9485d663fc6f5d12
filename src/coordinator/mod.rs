//! Reconnect coordinator
//!
//! Owns the recognition-engine lifecycle and the offline-mode policy as an
//! explicit state machine:
//! - Idle: engine stopped, waiting for a start request
//! - Listening: engine active, utterances flow to the AI client
//! - NetworkError: engine restart scheduled with exponential backoff
//! - OfflineMode: restarts exhausted, network commands rejected locally

mod machine;
mod retry;

pub use machine::{Coordinator, Input, ManualCommand, RecognitionState};
pub use retry::{backoff_delay, RetryContext, MAX_RECONNECT_ATTEMPTS};
