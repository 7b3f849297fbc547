use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::connection::serve_connection;
use crate::reaper::IdleReaper;
use crate::state::{ChatState, ConnectionLimits};

/// Upper bound on waiting for connection tasks during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub idle_timeout: Duration,
    pub reap_interval: Duration,
    pub limits: ConnectionLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            idle_timeout: Duration::from_secs(60),
            reap_interval: Duration::from_secs(10),
            limits: ConnectionLimits::default(),
        }
    }
}

impl ServerConfig {
    /// Reject values that would panic inside the reaper or connection tasks.
    pub fn validate(&self) -> Result<(), std::io::Error> {
        let invalid = |what: &str| {
            Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{what} must be positive"),
            ))
        };
        if self.idle_timeout.is_zero() {
            return invalid("idle timeout");
        }
        if self.reap_interval.is_zero() {
            return invalid("reap interval");
        }
        if self.limits.max_send_queue == 0 {
            return invalid("send queue capacity");
        }
        if self.limits.max_line_length == 0 {
            return invalid("max line length");
        }
        Ok(())
    }
}

/// Bind the listener and start accepting connections. Returns a handle to
/// observe and shut down the server.
///
/// Fails with [`std::io::ErrorKind::InvalidInput`] if the config does not
/// pass [`ServerConfig::validate`].
pub async fn start(config: ServerConfig) -> Result<ServerHandle, std::io::Error> {
    config.validate()?;
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;

    let chat = Arc::new(ChatState::new(config.limits.clone()));
    let shutdown = CancellationToken::new();
    let connections = TaskTracker::new();

    let reaper = IdleReaper::new(Arc::clone(&chat), config.idle_timeout, config.reap_interval)
        .spawn(shutdown.clone());

    let accept = tokio::spawn(accept_loop(
        listener,
        Arc::clone(&chat),
        shutdown.clone(),
        connections.clone(),
    ));

    tracing::info!(
        addr = %local_addr,
        idle_timeout_secs = config.idle_timeout.as_secs(),
        "Chat server started"
    );

    Ok(ServerHandle {
        local_addr,
        chat,
        shutdown,
        connections,
        accept,
        reaper,
    })
}

async fn accept_loop(
    listener: TcpListener,
    chat: Arc<ChatState>,
    shutdown: CancellationToken,
    connections: TaskTracker,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::info!(peer = %peer, "New connection");
                    let (reader, writer) = stream.into_split();
                    connections.spawn(serve_connection(
                        reader,
                        writer,
                        Arc::clone(&chat),
                        shutdown.child_token(),
                    ));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
}

/// Handle returned by [`start`]; keeps the background tasks alive.
pub struct ServerHandle {
    local_addr: SocketAddr,
    chat: Arc<ChatState>,
    shutdown: CancellationToken,
    connections: TaskTracker,
    accept: tokio::task::JoinHandle<()>,
    reaper: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Number of tracked sessions, authenticated or not.
    pub fn session_count(&self) -> usize {
        self.chat.registry().len()
    }

    /// Currently bound usernames, sorted.
    pub fn usernames(&self) -> Vec<String> {
        self.chat.registry().list_names()
    }

    /// Stop accepting, close every connection and clear the registry.
    ///
    /// Sessions are removed before their connections close, so no
    /// disconnect notices go out during shutdown.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down");
        let open = self.chat.registry().clear();
        self.shutdown.cancel();
        for handle in &open {
            handle.close();
        }

        let _ = self.accept.await;
        let _ = self.reaper.await;
        self.connections.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.connections.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.connections.len(),
                "Connections still open after shutdown grace period"
            );
        }
        tracing::info!(closed = open.len(), "Server stopped");
    }
}
