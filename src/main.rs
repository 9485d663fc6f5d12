//! voice-command-daemon: resilient voice command pipeline
//!
//! The daemon owns the pipeline logic; a thin front end owns the
//! platform speech APIs and talks to us over a Unix socket:
//! - Recognition callbacks and connectivity notifications flow in
//! - Engine control commands, state changes and AI answers flow out
//!
//! The coordinator restarts recognition after network errors with
//! exponential backoff and degrades to an offline mode once the
//! attempt budget is spent; the AI client retries transient backend
//! failures and falls back to canned answers.

mod ai;
mod config;
mod connectivity;
mod coordinator;
mod events;
mod ipc;
mod lifecycle;
mod recognition;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::ai::{AiClient, HttpBackend};
use crate::config::Config;
use crate::connectivity::{ConnectivityMonitor, HttpProbe};
use crate::coordinator::{Coordinator, Input, ManualCommand};
use crate::events::PipelineEvent;
use crate::ipc::{Notification, Server};
use crate::lifecycle::ShutdownSignal;
use crate::recognition::EngineHandle;

/// Greeting sent to each client when it subscribes
const WELCOME_MESSAGE: &str =
    "Hello! I am listening. Say \"help\" to hear what I can do.";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "voice-command-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, backend = %config.backend_url, "configuration loaded");

    // Create shutdown signal handler
    let mut shutdown = ShutdownSignal::new()?;

    // Channels for inter-component communication.
    // IPC server / timers / monitor -> coordinator
    let (input_tx, input_rx) = mpsc::channel::<Input>(32);
    // IPC server -> connectivity monitor (platform notifications)
    let (native_tx, native_rx) = mpsc::channel::<bool>(8);
    // Coordinator -> IPC server (status snapshot + subscriber pushes)
    let (event_tx, mut event_rx) = broadcast::channel::<PipelineEvent>(64);
    // Coordinator -> front-end recognition engine
    let (engine, mut engine_rx) = EngineHandle::new(8);

    // Connectivity monitor probing the backend endpoint
    let probe = HttpProbe::new(&config.backend_url)?;
    let monitor = ConnectivityMonitor::new(Arc::new(probe), config.poll_interval);
    let connectivity = monitor.handle();
    let mut connectivity_rx = monitor.subscribe();

    // AI client over the streaming generate backend
    let backend = HttpBackend::new(&config.backend_url, &config.model)?;
    let client = AiClient::new(Arc::new(backend), connectivity.clone());

    // The coordinator state machine
    let mut coordinator = Coordinator::new(
        engine.clone(),
        connectivity,
        client,
        config.site_context.clone(),
        event_tx.clone(),
        input_tx.clone(),
    );

    // IPC server routing front-end requests into the pipeline
    let server = Server::new(&config.socket_path, input_tx.clone(), native_tx)?;
    let notifier = server.notifier();

    // Greet each subscriber as it connects, then start listening
    server.set_greeting(WELCOME_MESSAGE).await;
    input_tx
        .send(Input::Command(ManualCommand::Start))
        .await
        .expect("coordinator input channel open at startup");

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the coordinator (processes recognition, timers, commands)
        _ = coordinator.run(input_rx) => {
            info!("coordinator exited");
        }

        // Run the connectivity monitor (native notifications + polls)
        _ = monitor.run(native_rx) => {
            info!("connectivity monitor exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Feed connectivity transitions to the coordinator, which emits
        // the matching pipeline event
        _ = async {
            while let Ok(event) = connectivity_rx.recv().await {
                if input_tx.send(Input::Connectivity(event)).await.is_err() {
                    break;
                }
            }
        } => {
            info!("connectivity forwarder exited");
        }

        // Fold pipeline events into the IPC status and subscriber pushes
        _ = async {
            loop {
                match event_rx.recv().await {
                    Ok(event) => {
                        info!(%event, "pipeline event");
                        server.apply_event(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "pipeline event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("pipeline event handler exited");
        }

        // Relay engine control commands to subscribed front ends
        _ = async {
            while let Some(command) = engine_rx.recv().await {
                let _ = notifier.send(Notification::Engine { command });
            }
        } => {
            info!("engine command relay exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    if let Err(e) = engine.stop() {
        warn!(?e, "could not signal engine stop during shutdown");
    }
    server.shutdown().await;

    info!("voice-command-daemon stopped");

    Ok(())
}
