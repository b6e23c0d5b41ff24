//! WebSocket server: accept loop, per-connection tasks, send/broadcast and
//! coordinated shutdown.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections.
//! 3. Upgrading each connection (see [`handshake`](super::handshake)) and
//!    registering it under its client id.
//! 4. Running one read loop per connection that hands every message to the
//!    [`ServerHandler`] and deregisters the client when the connection ends.
//! 5. Shutting everything down on request and waiting until it is gone.
//!
//! # Task ownership
//!
//! Every connection task is spawned on a [`TaskTracker`], and the accept loop
//! itself holds a tracker token while it runs.  `shutdown()` cancels the
//! accept loop, closes every registered connection (which releases each
//! blocked read loop with `ClosedLocally`), then waits on the tracker.  When
//! `shutdown()` returns no server task is left running.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tether_core::{ConnectionHandle, NORMAL_CLOSE_REASON};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::handshake;
use crate::application::{ConnectionRegistry, ServerHandler};
use crate::domain::ServerConfig;
use crate::error::{RegistryError, ServerError};

/// Close reason sent to a client whose id was taken between handshake and
/// registration.
const DUPLICATE_CLOSE_REASON: &str = "client id already connected";

/// A WebSocket server that tracks connected clients by id.
///
/// Cloning is cheap; every clone drives the same server.
#[derive(Clone)]
pub struct WsServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: Arc<ServerConfig>,
    registry: ConnectionRegistry,
    handler: Arc<dyn ServerHandler>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    shutting_down: AtomicBool,
}

// ── Public API ────────────────────────────────────────────────────────────────

impl WsServer {
    pub fn new(config: ServerConfig, handler: Arc<dyn ServerHandler>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                config: Arc::new(config),
                registry: ConnectionRegistry::new(),
                handler,
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Binds a listener on `config.bind_addr`.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the address is in use or not permitted.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.inner.config.bind_addr;
        TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Binds and serves until [`shutdown`](Self::shutdown).
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the listener cannot be bound.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await;
        Ok(())
    }

    /// Accepts connections on `listener` until [`shutdown`](Self::shutdown).
    ///
    /// Fires `on_start` once the loop is running.  Returns immediately if the
    /// server was already shut down.
    pub async fn serve(&self, listener: TcpListener) {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            debug!("serve called after shutdown");
            return;
        }
        // Counts as a tracked task, so shutdown() waits for this loop too.
        let _running = inner.tracker.token();

        match listener.local_addr() {
            Ok(addr) => info!("tether server listening on ws://{addr}{}", inner.config.path),
            Err(e) => warn!("tether server listening (local address unknown: {e})"),
        }
        inner.handler.on_start();

        loop {
            let accepted = tokio::select! {
                () = inner.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, peer)) => {
                    debug!(%peer, "tcp connection accepted");
                    let server = Arc::clone(inner);
                    inner.tracker.spawn(server.handle_connection(socket, peer));
                }
                Err(e) => {
                    // Usually transient (e.g. out of file descriptors).
                    error!("accept error: {e}");
                    inner.handler.on_error(&ServerError::Accept(e));
                }
            }
        }

        info!("accept loop stopped");
    }

    /// Sends `payload` as JSON to one client.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownClient`] if `client_id` is not connected,
    /// otherwise the connection's own failure.
    pub async fn send<T>(&self, client_id: &str, payload: &T) -> Result<(), RegistryError>
    where
        T: Serialize + ?Sized,
    {
        self.inner.registry.send(client_id, payload).await
    }

    /// Sends `payload` to every connected client; returns how many got it.
    ///
    /// Each failed delivery is reported through `on_error` and does not
    /// affect the other clients.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Encode`] if `payload` cannot be serialised.
    pub async fn broadcast<T>(&self, payload: &T) -> Result<usize, RegistryError>
    where
        T: Serialize + ?Sized,
    {
        let report = self.inner.registry.broadcast(payload).await?;
        for failure in report.failures {
            warn!("broadcast: {failure}");
            self.inner.handler.on_error(&ServerError::Registry(failure));
        }
        Ok(report.delivered)
    }

    /// Stops accepting, closes every connection and waits for all server
    /// tasks to exit, then fires `on_stop`.
    ///
    /// Idempotent.  A second (or concurrent) call fires nothing and returns
    /// once the drain has finished.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shutting_down.swap(true, Ordering::SeqCst) {
            inner.tracker.wait().await;
            return;
        }

        info!("shutting down server...");
        inner.shutdown.cancel();
        let closed = inner.registry.close_all(NORMAL_CLOSE_REASON).await;
        debug!(closed, "closed client connections");

        inner.tracker.close();
        inner.tracker.wait().await;

        inner.handler.on_stop();
        info!("server stopped");
    }

    /// Ids of every connected client, sorted.
    pub fn client_ids(&self) -> Vec<String> {
        self.inner.registry.client_ids()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.inner.registry.contains(client_id)
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for WsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsServer")
            .field("bind_addr", &self.inner.config.bind_addr)
            .field("connections", &self.inner.registry.len())
            .field("shutting_down", &self.inner.shutting_down.load(Ordering::SeqCst))
            .finish()
    }
}

// ── Per-connection task ───────────────────────────────────────────────────────

impl ServerInner {
    /// Runs the complete lifecycle of one inbound connection.
    async fn handle_connection(self: Arc<Self>, socket: TcpStream, peer: SocketAddr) {
        let upgraded = tokio::select! {
            () = self.shutdown.cancelled() => return,
            upgraded = handshake::accept(socket, &self.config, &self.registry) => upgraded,
        };
        let (ws, client_id) = match upgraded {
            Ok(upgraded) => upgraded,
            Err(source) => {
                warn!(%peer, "handshake failed: {source}");
                self.handler
                    .on_error(&ServerError::Handshake { peer, source });
                return;
            }
        };

        let handle = Arc::new(ConnectionHandle::from_websocket(
            ws,
            client_id.clone(),
            self.config.timeouts(),
        ));

        // The id may have been taken by a concurrent handshake since admit().
        if let Err(e) = self.registry.insert(&client_id, Arc::clone(&handle)) {
            warn!(%peer, "{e}");
            handle.close(DUPLICATE_CLOSE_REASON).await;
            self.handler.on_error(&ServerError::Registry(e));
            return;
        }
        // shutdown() may have run close_all() before the insert above.
        if self.shutdown.is_cancelled() {
            self.registry.remove_if_current(&client_id, &handle);
            handle.close(NORMAL_CLOSE_REASON).await;
            return;
        }

        info!(client_id = %client_id, %peer, "client connected");
        self.handler.on_connect(&client_id);

        let error = loop {
            match handle.read_next().await {
                Ok(message) => {
                    debug!(client_id = %client_id, bytes = message.len(), "message received");
                    self.handler.on_message(&client_id, &message);
                }
                Err(e) => break e,
            }
        };

        self.registry.remove_if_current(&client_id, &handle);
        handle.close(NORMAL_CLOSE_REASON).await;

        if error.is_local_close() || self.shutdown.is_cancelled() {
            debug!(client_id = %client_id, "connection closed by server");
        } else {
            info!(client_id = %client_id, "client disconnected: {error}");
            self.handler.on_disconnect(
                &client_id,
                &ServerError::Read {
                    client_id: client_id.clone(),
                    source: error,
                },
            );
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tether_core::connection::mock;
    use tether_core::ConnectionTimeouts;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::HeaderValue;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    use super::*;
    use crate::application::handler::MockServerHandler;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Start,
        Stop,
        Connect(String),
        Disconnect(String),
        Message(String, String),
        Error(String),
    }

    #[derive(Default)]
    struct RecordingHandler {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingHandler {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
            self.events().iter().filter(|e| predicate(e)).count()
        }

        fn record(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl ServerHandler for RecordingHandler {
        fn on_start(&self) {
            self.record(Event::Start);
        }
        fn on_stop(&self) {
            self.record(Event::Stop);
        }
        fn on_connect(&self, client_id: &str) {
            self.record(Event::Connect(client_id.to_string()));
        }
        fn on_disconnect(&self, client_id: &str, _error: &ServerError) {
            self.record(Event::Disconnect(client_id.to_string()));
        }
        fn on_message(&self, client_id: &str, message: &[u8]) {
            self.record(Event::Message(
                client_id.to_string(),
                String::from_utf8_lossy(message).into_owned(),
            ));
        }
        fn on_error(&self, error: &ServerError) {
            self.record(Event::Error(error.to_string()));
        }
    }

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// Starts a server on an ephemeral port; returns it with its address.
    async fn start(handler: Arc<RecordingHandler>) -> (WsServer, SocketAddr) {
        let server = WsServer::new(ServerConfig::default(), handler);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = server.clone();
        tokio::spawn(async move { serving.serve(listener).await });
        (server, addr)
    }

    async fn dial(addr: SocketAddr, client_id: Option<&str>) -> Result<Client, WsError> {
        let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
        if let Some(id) = client_id {
            request
                .headers_mut()
                .insert("Client-Id", HeaderValue::from_str(id).unwrap());
        }
        tokio_tungstenite::connect_async(request)
            .await
            .map(|(ws, _)| ws)
    }

    async fn wait_until(what: &str, condition: impl Fn() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    #[tokio::test]
    async fn test_client_is_registered_under_header_id() {
        // Arrange
        let handler = Arc::new(RecordingHandler::default());
        let (server, addr) = start(handler.clone()).await;

        // Act
        let _client = dial(addr, Some("alpha")).await.unwrap();
        wait_until("registration", || server.is_connected("alpha")).await;

        // Assert
        assert_eq!(server.client_ids(), vec!["alpha".to_string()]);
        assert!(handler.events().contains(&Event::Connect("alpha".into())));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_addressed_send_reaches_only_that_client() {
        // Arrange
        let handler = Arc::new(RecordingHandler::default());
        let (server, addr) = start(handler.clone()).await;
        let mut alpha = dial(addr, Some("alpha")).await.unwrap();
        let _bravo = dial(addr, Some("bravo")).await.unwrap();
        wait_until("both registered", || server.connection_count() == 2).await;

        // Act
        server.send("alpha", "hi").await.unwrap();

        // Assert
        let frame = timeout(Duration::from_secs(5), alpha.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame, Message::Text("\"hi\"".to_string()));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_to_unknown_client_fails() {
        let (server, _addr) = start(Arc::new(RecordingHandler::default())).await;

        let result = server.send("ghost", "hi").await;

        assert!(matches!(result, Err(RegistryError::UnknownClient(_))));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_inbound_message_reaches_handler_with_client_id() {
        let handler = Arc::new(RecordingHandler::default());
        let (server, addr) = start(handler.clone()).await;
        let mut client = dial(addr, Some("alpha")).await.unwrap();

        client.send(Message::Text("ping".into())).await.unwrap();
        wait_until("message", || {
            handler.count(|e| matches!(e, Event::Message(..))) == 1
        })
        .await;

        assert!(handler
            .events()
            .contains(&Event::Message("alpha".into(), "ping".into())));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_client_close_deregisters_and_fires_disconnect_once() {
        // Arrange
        let handler = Arc::new(RecordingHandler::default());
        let (server, addr) = start(handler.clone()).await;
        let mut client = dial(addr, Some("alpha")).await.unwrap();
        wait_until("registration", || server.is_connected("alpha")).await;

        // Act
        client.close(None).await.unwrap();
        wait_until("deregistration", || !server.is_connected("alpha")).await;
        wait_until("disconnect event", || {
            handler.count(|e| matches!(e, Event::Disconnect(_))) == 1
        })
        .await;

        // Assert
        assert!(handler.events().contains(&Event::Disconnect("alpha".into())));
        server.shutdown().await;
        assert_eq!(handler.count(|e| matches!(e, Event::Disconnect(_))), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected_with_409() {
        let handler = Arc::new(RecordingHandler::default());
        let (server, addr) = start(handler.clone()).await;
        let _first = dial(addr, Some("alpha")).await.unwrap();
        wait_until("registration", || server.is_connected("alpha")).await;

        let err = dial(addr, Some("alpha")).await.unwrap_err();

        assert!(matches!(err, WsError::Http(ref response) if response.status() == 409));
        assert_eq!(server.connection_count(), 1);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_id_is_assigned_a_uuid() {
        let handler = Arc::new(RecordingHandler::default());
        let (server, addr) = start(handler.clone()).await;

        let _client = dial(addr, None).await.unwrap();
        wait_until("registration", || server.connection_count() == 1).await;

        let id = server.client_ids().remove(0);
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejected_handshake_is_reported_via_on_error() {
        let handler = Arc::new(RecordingHandler::default());
        let (server, addr) = start(handler.clone()).await;

        let _ = dial(addr, Some("   ")).await.unwrap_err();
        wait_until("error event", || {
            handler.count(|e| matches!(e, Event::Error(_))) == 1
        })
        .await;

        assert_eq!(server.connection_count(), 0);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_broadcast_with_one_closed_handle_reports_one_error() {
        // Arrange: R = 3 registered connections, one already closed.
        let handler = Arc::new(RecordingHandler::default());
        let server = WsServer::new(ServerConfig::default(), handler.clone());
        let mut peers = Vec::new();
        for id in ["alpha", "bravo", "charlie"] {
            let (handle, peer) = mock::connection(id, ConnectionTimeouts::default());
            server.registry().insert(id, Arc::new(handle)).unwrap();
            peers.push(peer);
        }
        server
            .registry()
            .get("charlie")
            .unwrap()
            .close("gone")
            .await;

        // Act
        let delivered = server.broadcast("Hello All Clients!").await.unwrap();

        // Assert
        assert_eq!(delivered, 2);
        assert_eq!(handler.count(|e| matches!(e, Event::Error(_))), 1);
        assert_eq!(peers[0].texts(), vec!["\"Hello All Clients!\"".to_string()]);
        assert_eq!(peers[1].texts(), vec!["\"Hello All Clients!\"".to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown_closes_clients_normally_without_disconnect_events() {
        // Arrange
        let handler = Arc::new(RecordingHandler::default());
        let (server, addr) = start(handler.clone()).await;
        let mut client = dial(addr, Some("alpha")).await.unwrap();
        wait_until("registration", || server.is_connected("alpha")).await;

        // Act
        server.shutdown().await;

        // Assert
        let frame = timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match frame {
            Message::Close(Some(close)) => {
                assert_eq!(u16::from(close.code), 1000);
                assert_eq!(close.reason, NORMAL_CLOSE_REASON);
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        assert_eq!(server.connection_count(), 0);
        assert_eq!(handler.count(|e| matches!(e, Event::Disconnect(_))), 0);
        assert_eq!(handler.count(|e| *e == Event::Stop), 1);
    }

    #[tokio::test]
    async fn test_shutdown_twice_fires_on_stop_once() {
        // Arrange
        let mut handler = MockServerHandler::new();
        handler.expect_on_start().times(1).return_const(());
        handler.expect_on_stop().times(1).return_const(());
        let server = WsServer::new(ServerConfig::default(), Arc::new(handler));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let serving = server.clone();
        let accept_loop = tokio::spawn(async move { serving.serve(listener).await });
        tokio::task::yield_now().await;

        // Act
        server.shutdown().await;
        server.shutdown().await;

        // Assert
        timeout(Duration::from_secs(5), accept_loop)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_serve_after_shutdown_returns_immediately() {
        let handler = Arc::new(RecordingHandler::default());
        let server = WsServer::new(ServerConfig::default(), handler.clone());
        server.shutdown().await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        server.serve(listener).await;

        assert_eq!(handler.events(), vec![Event::Stop]);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        // Arrange: occupy a port.
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig {
            bind_addr: occupied.local_addr().unwrap(),
            ..ServerConfig::default()
        };
        let server = WsServer::new(config, Arc::new(RecordingHandler::default()));

        // Act
        let result = server.run().await;

        // Assert
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }
}
