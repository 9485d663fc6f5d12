//! Unix domain socket server for IPC
//!
//! Provides request-response communication plus push notifications for
//! subscribed clients. Recognition callbacks and platform connectivity
//! notifications arrive as requests and are routed into the pipeline
//! channels; engine commands, state changes and AI answers flow back as
//! notifications.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::coordinator::{Input, ManualCommand};
use crate::events::PipelineEvent;

use super::protocol::{DaemonStatus, Mode, Notification, Request, Response};

/// IPC server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
    /// Pipeline inputs routed from client requests
    input_tx: mpsc::Sender<Input>,
    /// Platform connectivity notifications relayed to the monitor
    connectivity_tx: mpsc::Sender<bool>,
    /// Push notifications fanned out to subscribed clients
    notify_tx: broadcast::Sender<Notification>,
}

/// Shared server state
struct ServerState {
    status: DaemonStatus,
    start_time: std::time::Instant,
    /// Message replayed to each client right after it subscribes
    greeting: Option<String>,
}

impl Server {
    /// Create a new IPC server bound to `socket_path`
    pub fn new(
        socket_path: &Path,
        input_tx: mpsc::Sender<Input>,
        connectivity_tx: mpsc::Sender<bool>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let (notify_tx, _) = broadcast::channel(64);

        let state = Arc::new(RwLock::new(ServerState {
            status: DaemonStatus::default(),
            start_time: std::time::Instant::now(),
            greeting: None,
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state,
            shutdown_tx,
            input_tx,
            connectivity_tx,
            notify_tx,
        })
    }

    /// Sender for out-of-band notifications (engine commands)
    pub fn notifier(&self) -> broadcast::Sender<Notification> {
        self.notify_tx.clone()
    }

    /// Set the greeting sent to every client when it subscribes. The
    /// broadcast channel cannot carry it: a message sent before a client
    /// subscribes is never seen by that client.
    pub async fn set_greeting(&self, text: &str) {
        self.state.write().await.greeting = Some(text.to_string());
    }

    /// Fold a pipeline event into the status snapshot and push the
    /// matching notification to subscribers
    pub async fn apply_event(&self, event: &PipelineEvent) {
        let mut state = self.state.write().await;
        match event {
            PipelineEvent::ListeningStarted => {
                state.status.mode = Mode::Listening;
                self.notify(Notification::StateChanged {
                    mode: Mode::Listening,
                });
            }
            PipelineEvent::ListeningStopped => {
                state.status.mode = Mode::Idle;
                self.notify(Notification::StateChanged { mode: Mode::Idle });
            }
            PipelineEvent::ReconnectScheduled { attempt, .. } => {
                state.status.mode = Mode::NetworkError;
                state.status.reconnect_attempts = *attempt;
                self.notify(Notification::StateChanged {
                    mode: Mode::NetworkError,
                });
            }
            PipelineEvent::OfflineModeEntered => {
                state.status.mode = Mode::Offline;
                self.notify(Notification::StateChanged { mode: Mode::Offline });
            }
            PipelineEvent::OnlineModeRestored => {
                // ListeningStarted follows and sets the mode
                state.status.reconnect_attempts = 0;
            }
            PipelineEvent::ConnectivityChanged { online } => {
                state.status.online = *online;
            }
            PipelineEvent::ResponseReady { text, directive } => {
                self.notify(Notification::Response {
                    text: text.clone(),
                    directive: directive.clone(),
                });
            }
            PipelineEvent::UtteranceAccepted { .. } => {}
        }
    }

    fn notify(&self, notification: Notification) {
        // No subscribers is fine
        let _ = self.notify_tx.send(notification);
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let state = Arc::clone(&self.state);
                    let input_tx = self.input_tx.clone();
                    let connectivity_tx = self.connectivity_tx.clone();
                    let notify_tx = self.notify_tx.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(
                                stream, state, input_tx, connectivity_tx, notify_tx,
                            ) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(
        mut stream: UnixStream,
        state: Arc<RwLock<ServerState>>,
        input_tx: mpsc::Sender<Input>,
        connectivity_tx: mpsc::Sender<bool>,
        notify_tx: broadcast::Sender<Notification>,
    ) -> Result<()> {
        loop {
            let request = match Self::read_request(&mut stream).await? {
                Some(request) => request,
                None => {
                    debug!("client disconnected");
                    return Ok(());
                }
            };

            debug!(?request, "received request");

            if matches!(request, Request::Subscribe) {
                // Subscribe before confirming so no notification slips
                // between the two.
                let notify_rx = notify_tx.subscribe();
                Self::send_message(&mut stream, &Response::Subscribed).await?;
                debug!("client subscribed to notifications");

                let greeting = state.read().await.greeting.clone();
                if let Some(text) = greeting {
                    Self::send_message(
                        &mut stream,
                        &Notification::Response {
                            text,
                            directive: None,
                        },
                    )
                    .await?;
                }

                return Self::push_loop(stream, state, input_tx, connectivity_tx, notify_rx)
                    .await;
            }

            let response =
                Self::process_request(request, &state, &input_tx, &connectivity_tx).await;
            Self::send_message(&mut stream, &response).await?;
        }
    }

    /// Push notifications to a subscribed client while still answering
    /// any further requests it sends
    async fn push_loop(
        mut stream: UnixStream,
        state: Arc<RwLock<ServerState>>,
        input_tx: mpsc::Sender<Input>,
        connectivity_tx: mpsc::Sender<bool>,
        mut notify_rx: broadcast::Receiver<Notification>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                notification = notify_rx.recv() => {
                    match notification {
                        Ok(notification) => {
                            Self::send_message(&mut stream, &notification).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "subscriber lagged, notifications dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return Ok(()),
                    }
                }
                request = Self::read_request(&mut stream) => {
                    let request = match request? {
                        Some(request) => request,
                        None => {
                            debug!("subscriber disconnected");
                            return Ok(());
                        }
                    };
                    debug!(?request, "received request");
                    let response = Self::process_request(
                        request, &state, &input_tx, &connectivity_tx,
                    ).await;
                    Self::send_message(&mut stream, &response).await?;
                }
            }
        }
    }

    /// Read one length-prefixed request, or `None` on clean disconnect.
    ///
    /// Cancel-safe within a message: `read_exact` on a `UnixStream` does
    /// not consume bytes until it completes, so the push loop can race
    /// this against the notification channel.
    async fn read_request(stream: &mut UnixStream) -> Result<Option<Request>> {
        let mut len_buf = [0u8; 4];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > 1024 * 1024 {
            anyhow::bail!("message too large ({} bytes)", len);
        }

        let mut msg_buf = vec![0u8; len];
        stream.read_exact(&mut msg_buf).await?;

        let request = serde_json::from_slice(&msg_buf).context("failed to parse request")?;
        Ok(Some(request))
    }

    /// Send a length-prefixed JSON message
    async fn send_message<T: serde::Serialize>(stream: &mut UnixStream, msg: &T) -> Result<()> {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        stream.write_all(&msg_len).await?;
        stream.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request and return a response
    async fn process_request(
        request: Request,
        state: &Arc<RwLock<ServerState>>,
        input_tx: &mpsc::Sender<Input>,
        connectivity_tx: &mpsc::Sender<bool>,
    ) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let mut state = state.write().await;
                state.status.uptime_secs = state.start_time.elapsed().as_secs();
                Response::Status(state.status.clone())
            }

            Request::Retry => {
                Self::forward(input_tx, Input::Command(ManualCommand::Retry)).await
            }

            Request::Stop => {
                Self::forward(input_tx, Input::Command(ManualCommand::Stop)).await
            }

            Request::Recognition { event } => {
                Self::forward(input_tx, Input::Recognition(event)).await
            }

            Request::Connectivity { online } => {
                if connectivity_tx.send(online).await.is_err() {
                    error!("connectivity monitor unavailable");
                    return Response::Error {
                        code: "unavailable".to_string(),
                        message: "connectivity monitor is not running".to_string(),
                    };
                }
                Response::Ack
            }

            // Handled in handle_client; reaching here means a repeated
            // subscribe on an already-subscribed connection.
            Request::Subscribe => Response::Subscribed,
        }
    }

    async fn forward(input_tx: &mpsc::Sender<Input>, input: Input) -> Response {
        if input_tx.send(input).await.is_err() {
            error!("coordinator unavailable");
            return Response::Error {
                code: "unavailable".to_string(),
                message: "coordinator is not running".to_string(),
            };
        }
        Response::Ack
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}
