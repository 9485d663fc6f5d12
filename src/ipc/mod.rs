//! IPC module for daemon/front-end communication
//!
//! The front end owns the platform speech APIs; over this socket it
//! forwards recognition callbacks and platform connectivity notifications
//! in, and receives engine control commands and AI answers back.

mod protocol;
mod server;

pub use protocol::{DaemonStatus, Mode, Notification, Request, Response};
pub use server::Server;
