//! Connectivity monitoring
//!
//! Single source of truth for device reachability, independent of the AI
//! backend's own health. Transitions come from two inputs: platform
//! online/offline notifications relayed by the front end, and a periodic
//! probe that guards against missed native events.

mod monitor;
mod probe;

pub use monitor::{ConnectivityEvent, ConnectivityHandle, ConnectivityMonitor, ConnectivityState};
pub use probe::{ConnectivityProbe, HttpProbe};
