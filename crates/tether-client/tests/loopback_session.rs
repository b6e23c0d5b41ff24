//! ClientSession against a real WebSocket server on the loopback interface.
//!
//! The server here is a few lines of raw `tokio-tungstenite`, so these tests
//! exercise the real dialer, handshake headers, keepalive pings and
//! reconnection without depending on the tether server crate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;

use tether_client::{
    ClientSession, EndpointConfig, RetryPolicy, SessionError, SessionHandler, SessionState,
    TungsteniteConnector,
};

// ── Helpers ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    messages: Mutex<Vec<String>>,
    connects: Mutex<usize>,
    disconnects: Mutex<usize>,
}

impl SessionHandler for Recorder {
    fn on_connect(&self) {
        *self.connects.lock().unwrap() += 1;
    }
    fn on_disconnect(&self, _error: &SessionError) {
        *self.disconnects.lock().unwrap() += 1;
    }
    fn on_message(&self, message: &[u8]) {
        self.messages
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(message).into_owned());
    }
}

/// What the test server saw on each accepted connection.
#[derive(Debug)]
struct Accepted {
    client_id: Option<String>,
}

/// Accepts connections forever.  Each one gets `greeting`, then the server
/// echoes text frames back.  With `drop_first_after_greeting` the very first
/// connection is dropped (no close frame) right after the greeting.
async fn spawn_server(
    greeting: &'static str,
    drop_first_after_greeting: bool,
) -> (u16, mpsc::UnboundedReceiver<Accepted>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut first = true;
        loop {
            let (socket, _) = listener.accept().await.unwrap();
            let seen = Arc::new(Mutex::new(None));
            let seen_cb = Arc::clone(&seen);
            let callback = move |request: &Request, response: Response| {
                *seen_cb.lock().unwrap() = request
                    .headers()
                    .get("Client-Id")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(response)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(socket, callback)
                .await
                .unwrap();
            let client_id = seen.lock().unwrap().clone();
            tx.send(Accepted { client_id }).unwrap();

            ws.send(Message::Text(greeting.to_string())).await.unwrap();
            if first && drop_first_after_greeting {
                first = false;
                drop(ws);
                continue;
            }
            first = false;
            tokio::spawn(async move {
                while let Some(Ok(frame)) = ws.next().await {
                    if let Message::Text(text) = frame {
                        if ws.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                }
            });
        }
    });

    (port, rx)
}

fn config(port: u16) -> EndpointConfig {
    EndpointConfig::new("ws", "127.0.0.1", port, "/ws")
        .with_client_id("loopback")
        .with_retry(RetryPolicy::new(5, Duration::from_millis(50)))
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_client_id_header_reaches_server_and_greeting_reaches_handler() {
    // Arrange
    let (port, mut accepted) = spawn_server("welcome", false).await;
    let recorder = Arc::new(Recorder::default());
    let session = ClientSession::new(
        config(port),
        Arc::new(TungsteniteConnector::new()),
        recorder.clone(),
    );

    // Act
    session.start();
    let first = timeout(Duration::from_secs(5), accepted.recv())
        .await
        .unwrap()
        .unwrap();
    wait_until("greeting", || !recorder.messages.lock().unwrap().is_empty()).await;

    // Assert
    assert_eq!(first.client_id.as_deref(), Some("loopback"));
    assert_eq!(*recorder.messages.lock().unwrap(), vec!["welcome".to_string()]);
    assert_eq!(session.state(), SessionState::Connected);
    session.stop().await;
}

#[tokio::test]
async fn test_sent_payload_is_echoed_back_as_json() {
    let (port, _accepted) = spawn_server("welcome", false).await;
    let recorder = Arc::new(Recorder::default());
    let session = ClientSession::new(
        config(port),
        Arc::new(TungsteniteConnector::new()),
        recorder.clone(),
    );
    session.start();
    wait_until("connect", || session.is_connected()).await;

    session.send("hello").await.unwrap();
    wait_until("echo", || recorder.messages.lock().unwrap().len() == 2).await;

    assert_eq!(recorder.messages.lock().unwrap()[1], "\"hello\"");
    session.stop().await;
}

#[tokio::test]
async fn test_server_drop_triggers_reconnect() {
    // Arrange: the first connection is dropped right after the greeting.
    let (port, _accepted) = spawn_server("welcome", true).await;
    let recorder = Arc::new(Recorder::default());
    let session = ClientSession::new(
        config(port),
        Arc::new(TungsteniteConnector::new()),
        recorder.clone(),
    );

    // Act
    session.start();
    wait_until("second connect", || *recorder.connects.lock().unwrap() == 2).await;

    // Assert
    assert_eq!(*recorder.disconnects.lock().unwrap(), 1);
    assert_eq!(session.retry_count(), 0);
    session.stop().await;
}

#[tokio::test]
async fn test_short_read_timeout_survives_on_pongs() {
    // Arrange: tungstenite on the server answers pings automatically.
    let (port, _accepted) = spawn_server("welcome", false).await;
    let recorder = Arc::new(Recorder::default());
    let session = ClientSession::new(
        config(port).with_read_timeout(Duration::from_millis(400)),
        Arc::new(TungsteniteConnector::new()),
        recorder.clone(),
    );
    session.start();
    wait_until("connect", || session.is_connected()).await;

    // Act: several read timeouts' worth of wall time.
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    // Assert
    assert_eq!(*recorder.disconnects.lock().unwrap(), 0);
    assert_eq!(*recorder.connects.lock().unwrap(), 1);
    session.stop().await;
}

#[tokio::test]
async fn test_unreachable_server_exhausts_retries() {
    // Arrange: nobody listens on this port.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let cfg = config(port).with_retry(RetryPolicy::new(2, Duration::from_millis(20)));
    let session = ClientSession::new(
        cfg,
        Arc::new(TungsteniteConnector::new()),
        Arc::new(Recorder::default()),
    );
    let mut states = session.subscribe_state();

    // Act
    session.start();
    timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == SessionState::Stopped),
    )
    .await
    .unwrap()
    .unwrap();

    // Assert
    assert!(matches!(
        session.send("x").await,
        Err(SessionError::NotConnected)
    ));
}
