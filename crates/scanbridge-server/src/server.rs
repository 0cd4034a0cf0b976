// SPDX-License-Identifier: MIT
//
// Embedded hand-off HTTP server -- serves the session API over raw TCP.
//
// The server listens on a configurable TCP port (default 8462) for requests
// from the desktop viewer and the mobile capture page.  The transport is
// deliberately minimal: each connection carries one HTTP/1.1 exchange and is
// closed afterwards, which keeps the framing code small and sidesteps
// keep-alive state entirely.  Clients are expected to be on the same LAN as
// the server; there is no TLS termination here.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use scanbridge_core::error::{Result, ScanbridgeError};
use scanbridge_core::types::ServerStatus;
use scanbridge_session::SessionStore;

use crate::http::{HttpResponse, read_request};
use crate::routes::{AppState, dispatch};

/// Default port for the hand-off server.
const DEFAULT_PORT: u16 = 8462;

/// Maximum bytes to read from a connection before rejecting it.
/// A single capture arrives base64-encoded, so this bounds image size
/// at roughly 24 MiB of raw pixels.
const DEFAULT_MAX_REQUEST_BYTES: usize = 32 * 1024 * 1024; // 32 MiB

/// Embedded scan hand-off server.
///
/// Binds a TCP listener and accepts connections from the two sides of a
/// hand-off: the desktop that created a session and the phone that joined
/// it.  All session state lives in the shared [`SessionStore`].
pub struct ScanServer {
    /// The TCP port to listen on.  Port 0 asks the OS for a free port;
    /// `port()` reports the bound port once the server is running.
    port: u16,
    /// Current lifecycle state of the server.
    status: ServerStatus,
    /// Request size cap applied per connection.
    max_request_bytes: usize,
    /// Notification handle used to signal a graceful shutdown.
    shutdown_signal: Arc<Notify>,
    /// Handle to the Tokio task running the accept loop.
    task_handle: Option<JoinHandle<()>>,
    /// Counter of currently active TCP connections.
    active_connections: Arc<AtomicU32>,
}

impl ScanServer {
    /// Create a new server bound to the given port.
    ///
    /// The server is created in `Stopped` state.  Call [`ScanServer::start`]
    /// to begin accepting connections.
    pub fn new(port: Option<u16>) -> Self {
        Self {
            port: port.unwrap_or(DEFAULT_PORT),
            status: ServerStatus::Stopped,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
            active_connections: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Override the per-request size cap.
    pub fn set_max_request_bytes(&mut self, max: usize) {
        self.max_request_bytes = max;
    }

    /// Return the port this server will bind to (or is bound to).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Return the current server status.
    pub fn status(&self) -> ServerStatus {
        self.status
    }

    /// Return the number of currently active client connections.
    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Start the hand-off server.
    ///
    /// Binds a TCP listener on `0.0.0.0:{port}` and spawns a Tokio task that
    /// accepts incoming connections.  Each connection is handled in its own
    /// spawned task.  The `store` is shared with the expiry sweeper and
    /// receives all session mutations made by network clients.
    ///
    /// # Errors
    ///
    /// Returns an error if the port is already in use or the listener cannot
    /// be created.
    pub async fn start(&mut self, store: Arc<SessionStore>) -> Result<()> {
        if self.status == ServerStatus::Running {
            debug!(port = self.port, "hand-off server already running");
            return Ok(());
        }

        self.status = ServerStatus::Starting;

        let bind_addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| ScanbridgeError::Server(format!("bind {bind_addr}: {e}")))?;

        // Record the OS-assigned port when binding to port 0.
        self.port = listener
            .local_addr()
            .map_err(|e| ScanbridgeError::Server(format!("local_addr: {e}")))?
            .port();

        info!(port = self.port, "scan hand-off server listening");

        let shutdown = Arc::clone(&self.shutdown_signal);
        let connections = Arc::clone(&self.active_connections);
        let port = self.port;
        let max_request_bytes = self.max_request_bytes;
        let state = AppState::new(store);

        let handle = tokio::spawn(async move {
            Self::accept_loop(listener, shutdown, port, connections, state, max_request_bytes)
                .await;
        });

        self.task_handle = Some(handle);
        self.status = ServerStatus::Running;
        Ok(())
    }

    /// Gracefully stop the server.
    ///
    /// Signals the accept loop to exit and awaits its completion.  Existing
    /// connections that are mid-transfer will be allowed to finish.
    pub async fn stop(&mut self) -> Result<()> {
        if self.status != ServerStatus::Running {
            return Ok(());
        }

        info!(port = self.port, "stopping scan hand-off server");

        self.shutdown_signal.notify_one();

        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| ScanbridgeError::Server(format!("task join: {e}")))?;
        }

        self.status = ServerStatus::Stopped;
        info!(port = self.port, "scan hand-off server stopped");
        Ok(())
    }

    /// The main accept loop.
    ///
    /// Runs until the shutdown signal is received.  Each incoming connection
    /// is handed off to [`handle_connection`](Self::handle_connection) in a
    /// separate task.
    async fn accept_loop(
        listener: TcpListener,
        shutdown: Arc<Notify>,
        port: u16,
        connections: Arc<AtomicU32>,
        state: AppState,
        max_request_bytes: usize,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!(port, "accept loop received shutdown signal");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, "incoming connection");
                            let state = state.clone();
                            let connections = Arc::clone(&connections);
                            tokio::spawn(async move {
                                connections.fetch_add(1, Ordering::Relaxed);
                                if let Err(e) = Self::handle_connection(
                                    stream,
                                    peer_addr,
                                    state,
                                    max_request_bytes,
                                )
                                .await
                                {
                                    warn!(
                                        peer = %peer_addr,
                                        error = %e,
                                        "connection handler error"
                                    );
                                }
                                connections.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }
    }

    /// Handle a single incoming TCP connection.
    ///
    /// Reads one HTTP request, routes it through [`dispatch`], writes the
    /// response, and closes the connection.
    async fn handle_connection(
        mut stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
        state: AppState,
        max_request_bytes: usize,
    ) -> Result<()> {
        let request = match read_request(&mut stream, max_request_bytes).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!(peer = %peer_addr, "empty request -- closing connection");
                return Ok(());
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "malformed request");
                let response = HttpResponse::json(
                    400,
                    &serde_json::json!({ "error": e.to_string() }),
                );
                Self::write_response(&mut stream, peer_addr, response).await?;
                return Ok(());
            }
        };

        debug!(
            peer = %peer_addr,
            method = %request.method,
            path = %request.path,
            body_bytes = request.body.len(),
            "parsed request"
        );

        let response = dispatch(&request, &state);

        info!(
            peer = %peer_addr,
            method = %request.method,
            path = %request.path,
            status = response.status,
            "request served"
        );

        Self::write_response(&mut stream, peer_addr, response).await
    }

    async fn write_response(
        stream: &mut tokio::net::TcpStream,
        peer_addr: SocketAddr,
        response: HttpResponse,
    ) -> Result<()> {
        stream
            .write_all(&response.into_bytes())
            .await
            .map_err(|e| ScanbridgeError::Server(format!("write to {peer_addr}: {e}")))?;
        stream
            .flush()
            .await
            .map_err(|e| ScanbridgeError::Server(format!("flush to {peer_addr}: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn exchange(port: u16, request: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("connect");
        stream
            .write_all(request.as_bytes())
            .await
            .expect("write request");
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.expect("read");
        String::from_utf8(response).expect("utf-8 response")
    }

    #[tokio::test]
    async fn serves_a_full_handoff_over_tcp() {
        let store = Arc::new(SessionStore::with_timeout(std::time::Duration::from_secs(
            60,
        )));
        let mut server = ScanServer::new(Some(0));
        server.start(Arc::clone(&store)).await.expect("start");
        let port = server.port();
        assert_eq!(server.status(), ServerStatus::Running);

        // Desktop creates a session.
        let response = exchange(port, "POST /api/scan/sessions HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 201 Created"));
        let body = response.split("\r\n\r\n").nth(1).expect("body");
        let json: serde_json::Value = serde_json::from_str(body).expect("json");
        let id = json["sessionId"].as_str().expect("sessionId").to_string();

        // Mobile appends a capture.
        let payload = "{\"image\":\"data:image/jpeg;base64,AAA\"}";
        let request = format!(
            "POST /api/scan/sessions/{id}/images HTTP/1.1\r\nContent-Length: {}\r\n\r\n{payload}",
            payload.len()
        );
        let response = exchange(port, &request).await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("\"imageCount\":1"));

        // Desktop polls and sees it.
        let response = exchange(port, &format!("GET /api/scan/sessions/{id} HTTP/1.1\r\n\r\n")).await;
        assert!(response.contains("data:image/jpeg;base64,AAA"));

        server.stop().await.expect("stop");
        assert_eq!(server.status(), ServerStatus::Stopped);
    }

    #[tokio::test]
    async fn stop_is_safe_when_not_running() {
        let mut server = ScanServer::new(Some(0));
        server.stop().await.expect("stop on stopped server");
        assert_eq!(server.status(), ServerStatus::Stopped);
    }

    #[tokio::test]
    async fn start_twice_is_a_no_op() {
        let store = Arc::new(SessionStore::with_timeout(std::time::Duration::from_secs(
            60,
        )));
        let mut server = ScanServer::new(Some(0));
        server.start(Arc::clone(&store)).await.expect("first start");
        let port = server.port();
        server.start(store).await.expect("second start");
        assert_eq!(server.port(), port);
        server.stop().await.expect("stop");
    }
}
