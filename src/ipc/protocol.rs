//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian
//! length.

use serde::{Deserialize, Serialize};

use crate::recognition::{EngineCommand, RecognitionEvent};

/// Current operating mode of the pipeline, as reported over IPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Engine stopped
    Idle,
    /// Engine active, commands flowing
    Listening,
    /// Recognition restart pending with backoff
    NetworkError,
    /// Degraded: network commands rejected locally
    Offline,
}

impl Default for Mode {
    fn default() -> Self {
        Self::Idle
    }
}

/// Requests from the front end to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Ping to check connectivity
    Ping,

    /// Subscribe to push notifications; the connection switches into
    /// push mode after the confirmation
    Subscribe,

    /// Manual retry: reset attempts, clear offline mode, restart listening
    Retry,

    /// Stop listening and return to idle
    Stop,

    /// A recognition-engine callback (onstart/onresult/onerror/onend)
    Recognition { event: RecognitionEvent },

    /// Platform online/offline notification
    Connectivity { online: bool },
}

/// Responses from the daemon to the front end
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Pong response to ping
    Pong,

    /// Subscription confirmed; notifications follow on this connection
    Subscribed,

    /// Request accepted
    Ack,

    /// Error response
    Error { code: String, message: String },
}

/// Push notifications to subscribed clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Pipeline mode changed
    StateChanged { mode: Mode },

    /// The coordinator wants the front end to apply this to its engine
    Engine { command: EngineCommand },

    /// An answer for the output sink: text to display/speak, and an
    /// opaque directive for the sandboxed executor if one was returned
    Response {
        text: String,
        directive: Option<String>,
    },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Current pipeline mode
    pub mode: Mode,

    /// Latest known device connectivity
    pub online: bool,

    /// Reconnect attempts in the current error episode
    pub reconnect_attempts: u32,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            mode: Mode::default(),
            online: true,
            reconnect_attempts: 0,
            uptime_secs: 0,
        }
    }
}
