//! Process lifecycle: graceful shutdown on Unix signals

mod shutdown;

pub use shutdown::ShutdownSignal;
