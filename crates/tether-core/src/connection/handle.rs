//! ConnectionHandle: the single owner of one live WebSocket connection.
//!
//! # Why a handle instead of the raw stream? (for beginners)
//!
//! `tokio-tungstenite` gives us a `WebSocketStream` that is both a `Sink`
//! (we write frames into it) and a `Stream` (we read frames out of it).  In
//! a long-lived session three parties want that stream at the same time:
//!
//! - the read loop, which waits for the next message,
//! - application code calling `send`,
//! - the keepalive task, which pings every few seconds.
//!
//! The stream is therefore split into a write half and a read half.  The
//! write half sits behind a `tokio::sync::Mutex`, so exactly one frame is on
//! its way to the wire at any instant: a ping can never land in the middle
//! of an application message.  The read half sits behind its own mutex and
//! is only ever used by the read loop.
//!
//! # Closing and the blocked reader
//!
//! A task awaiting `read_next()` may wait a long time for the peer.  Simply
//! dropping interest elsewhere does not wake it.  `close()` therefore flips a
//! [`CancellationToken`] that `read_next()` races against the socket, so the
//! reader returns [`ReadError::ClosedLocally`] immediately.  That variant
//! lets callers tell "we shut this down" apart from "the peer went away".

use std::borrow::Cow;
use std::pin::Pin;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{ReadError, WriteError};
use crate::limits::ConnectionTimeouts;

/// Boxed write half of a WebSocket transport.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Boxed read half of a WebSocket transport.
pub type FrameSource = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// State owned by the (single) reader.
struct ReadHalf {
    source: FrameSource,
    /// Instant after which a silent connection is declared dead.
    deadline: Instant,
}

/// Wraps exactly one live WebSocket connection.
///
/// Share it as `Arc<ConnectionHandle>`: every method takes `&self`.
pub struct ConnectionHandle {
    /// Human-readable identity used in log messages (URL or client id).
    label: String,
    timeouts: ConnectionTimeouts,
    /// `None` once the handle has been closed.
    writer: Mutex<Option<FrameSink>>,
    reader: Mutex<ReadHalf>,
    closed: CancellationToken,
}

impl ConnectionHandle {
    /// Creates a handle from an already split transport.
    ///
    /// The read deadline starts at `now + timeouts.read`.
    pub fn new(
        label: impl Into<String>,
        sink: FrameSink,
        source: FrameSource,
        timeouts: ConnectionTimeouts,
    ) -> Self {
        Self {
            label: label.into(),
            timeouts,
            writer: Mutex::new(Some(sink)),
            reader: Mutex::new(ReadHalf {
                source,
                deadline: Instant::now() + timeouts.read,
            }),
            closed: CancellationToken::new(),
        }
    }

    /// Wraps a completed `tokio-tungstenite` stream (client or server side).
    pub fn from_websocket<S>(
        stream: WebSocketStream<S>,
        label: impl Into<String>,
        timeouts: ConnectionTimeouts,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, source) = stream.split();
        Self::new(label, Box::pin(sink), Box::pin(source), timeouts)
    }

    /// The label given at construction.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The deadlines this handle enforces.
    pub fn timeouts(&self) -> ConnectionTimeouts {
        self.timeouts
    }

    /// Returns `true` once `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Serialises `payload` to JSON and sends it as one text frame.
    ///
    /// # Errors
    ///
    /// [`WriteError::Encode`] if serialisation fails, otherwise the errors of
    /// [`send_text`](Self::send_text).
    pub async fn send<T>(&self, payload: &T) -> Result<(), WriteError>
    where
        T: Serialize + ?Sized,
    {
        let text = serde_json::to_string(payload)?;
        self.send_text(text).await
    }

    /// Sends an already encoded text frame.
    ///
    /// # Errors
    ///
    /// - [`WriteError::Closed`] if the handle was closed.
    /// - [`WriteError::Timeout`] if the write deadline elapsed.
    /// - [`WriteError::Transport`] if the transport rejected the frame.
    pub async fn send_text(&self, text: String) -> Result<(), WriteError> {
        self.write_frame(Message::Text(text)).await
    }

    /// Sends an empty protocol-level ping through the same write lock.
    ///
    /// # Errors
    ///
    /// Same as [`send_text`](Self::send_text).
    pub async fn ping(&self) -> Result<(), WriteError> {
        self.write_frame(Message::Ping(Vec::new())).await
    }

    async fn write_frame(&self, frame: Message) -> Result<(), WriteError> {
        // The guard is held until the frame is fully flushed (or the deadline
        // fires), so frames from different tasks can never interleave.
        let mut writer = self.writer.lock().await;
        if self.closed.is_cancelled() {
            return Err(WriteError::Closed);
        }
        let sink = writer.as_mut().ok_or(WriteError::Closed)?;

        match timeout(self.timeouts.write, sink.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(WriteError::Transport(e)),
            Err(_) => Err(WriteError::Timeout(self.timeouts.write)),
        }
    }

    /// Closes the connection.  Safe to call any number of times.
    ///
    /// Any task blocked in [`read_next`](Self::read_next) is released with
    /// [`ReadError::ClosedLocally`].  A close frame (code 1000, `reason`) is
    /// then written best-effort within the write deadline and the sink is
    /// closed regardless of whether that frame made it out.
    pub async fn close(&self, reason: &str) {
        self.closed.cancel();

        let Some(mut sink) = self.writer.lock().await.take() else {
            return;
        };

        let frame = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: Cow::Owned(reason.to_owned()),
        }));
        match timeout(self.timeouts.write, sink.send(frame)).await {
            Ok(Ok(())) => debug!("{}: close frame sent ({reason})", self.label),
            Ok(Err(e)) => debug!("{}: close frame not delivered: {e}", self.label),
            Err(_) => debug!("{}: close frame timed out", self.label),
        }

        if let Ok(Err(e)) = timeout(self.timeouts.write, sink.close()).await {
            trace!("{}: sink close reported {e}", self.label);
        }
    }

    /// Waits for the next application message and returns its payload bytes.
    ///
    /// Pongs (and peer pings) are consumed here: each one pushes the read
    /// deadline out to `now + read_timeout`.  Pings are answered by
    /// tungstenite itself.
    ///
    /// # Errors
    ///
    /// Any [`ReadError`]; all of them are terminal for this handle.
    pub async fn read_next(&self) -> Result<Vec<u8>, ReadError> {
        if self.closed.is_cancelled() {
            return Err(ReadError::ClosedLocally);
        }
        let mut reader = self.reader.lock().await;

        loop {
            let deadline = reader.deadline;
            let next = tokio::select! {
                biased;
                () = self.closed.cancelled() => return Err(ReadError::ClosedLocally),
                () = sleep_until(deadline) => {
                    return Err(ReadError::DeadlineExceeded(self.timeouts.read));
                }
                next = reader.source.next() => next,
            };

            match next {
                None => return Err(ReadError::Eof),
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    return Err(ReadError::Eof);
                }
                Some(Err(e)) => return Err(ReadError::Transport(e)),
                Some(Ok(Message::Text(text))) => return Ok(text.into_bytes()),
                Some(Ok(Message::Binary(data))) => return Ok(data),
                Some(Ok(Message::Pong(_) | Message::Ping(_))) => {
                    reader.deadline = Instant::now() + self.timeouts.read;
                    trace!("{}: keepalive observed; read deadline refreshed", self.label);
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    return Err(ReadError::PeerClosed { code, reason });
                }
                Some(Ok(Message::Frame(_))) => {}
            }
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("label", &self.label)
            .field("timeouts", &self.timeouts)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::connection::mock;

    fn timeouts() -> ConnectionTimeouts {
        ConnectionTimeouts::new(Duration::from_secs(10), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_send_writes_one_json_text_frame() {
        // Arrange
        let (handle, peer) = mock::connection("test", timeouts());

        // Act
        assert_ok!(handle.send(&serde_json::json!({"kind": "greeting"})).await);

        // Assert
        assert_eq!(peer.texts(), vec![r#"{"kind":"greeting"}"#.to_string()]);
    }

    #[tokio::test]
    async fn test_send_string_payload_is_json_quoted() {
        let (handle, peer) = mock::connection("test", timeouts());
        assert_ok!(handle.send("hi").await);
        assert_eq!(peer.texts(), vec!["\"hi\"".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_sends_never_overlap_on_the_wire() {
        // Arrange: the mock sink yields mid-write, inviting interleaving.
        let (handle, peer) = mock::connection("test", timeouts());
        let handle = Arc::new(handle);

        // Act: 40 writers plus 10 pings race for the sink.
        let mut tasks = Vec::new();
        for i in 0..40 {
            let h = Arc::clone(&handle);
            tasks.push(tokio::spawn(async move { h.send(&format!("message-{i}")).await }));
        }
        for _ in 0..10 {
            let h = Arc::clone(&handle);
            tasks.push(tokio::spawn(async move { h.ping().await }));
        }
        for task in tasks {
            assert_ok!(task.await.expect("task panicked"));
        }

        // Assert: every frame arrived whole and no write began while another
        // was still in flight.
        assert_eq!(peer.overlapping_writes(), 0);
        assert_eq!(peer.ping_count(), 10);
        let texts = peer.texts();
        assert_eq!(texts.len(), 40);
        for i in 0..40 {
            assert!(texts.contains(&format!("\"message-{i}\"")));
        }
    }

    #[tokio::test]
    async fn test_send_after_close_returns_closed() {
        let (handle, _peer) = mock::connection("test", timeouts());
        handle.close("bye").await;

        let result = handle.send("late").await;

        assert!(matches!(result, Err(WriteError::Closed)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_writes_one_close_frame() {
        // Arrange
        let (handle, peer) = mock::connection("test", timeouts());

        // Act
        handle.close(crate::NORMAL_CLOSE_REASON).await;
        handle.close(crate::NORMAL_CLOSE_REASON).await;

        // Assert
        let closes = peer.close_frames();
        assert_eq!(closes.len(), 1);
        assert_eq!(closes[0].0, 1000);
        assert_eq!(closes[0].1, "shutting down normally");
        assert!(peer.is_sink_closed());
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_close_still_closes_sink_when_close_frame_fails() {
        let (handle, peer) = mock::connection("test", timeouts());
        peer.fail_writes();

        handle.close("bye").await;

        assert!(peer.is_sink_closed());
        assert!(peer.close_frames().is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_is_reported_as_transport_error() {
        let (handle, peer) = mock::connection("test", timeouts());
        peer.fail_writes();

        let result = handle.ping().await;

        assert!(matches!(result, Err(WriteError::Transport(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_write_times_out_at_write_deadline() {
        // Arrange
        let (handle, peer) = mock::connection("test", timeouts());
        peer.stall_writes(true);
        let started = Instant::now();

        // Act
        let result = handle.send("stuck").await;

        // Assert
        assert!(matches!(result, Err(WriteError::Timeout(d)) if d == Duration::from_secs(1)));
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_read_next_returns_text_and_binary_payloads() {
        let (handle, peer) = mock::connection("test", timeouts());
        peer.push_text("hello");
        peer.push_binary(vec![1, 2, 3]);

        assert_eq!(handle.read_next().await.unwrap(), b"hello".to_vec());
        assert_eq!(handle.read_next().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_read_next_reports_peer_close_frame() {
        let (handle, peer) = mock::connection("test", timeouts());
        peer.push_close(1001, "going away");

        let err = assert_err!(handle.read_next().await);

        match err {
            ReadError::PeerClosed { code, reason } => {
                assert_eq!(code, Some(1001));
                assert_eq!(reason, "going away");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_next_reports_eof_when_stream_ends() {
        let (handle, peer) = mock::connection("test", timeouts());
        peer.end_stream();

        assert!(matches!(handle.read_next().await, Err(ReadError::Eof)));
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_read_with_closed_locally() {
        // Arrange: a reader blocked on a silent peer.
        let (handle, _peer) = mock::connection("test", timeouts());
        let handle = Arc::new(handle);
        let reader = {
            let h = Arc::clone(&handle);
            tokio::spawn(async move { h.read_next().await })
        };
        tokio::task::yield_now().await;

        // Act
        handle.close("stop").await;

        // Assert
        let result = reader.await.expect("reader panicked");
        assert!(matches!(result, Err(ReadError::ClosedLocally)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_hits_read_deadline() {
        let (handle, _peer) = mock::connection("test", timeouts());
        let started = Instant::now();

        let result = handle.read_next().await;

        assert!(matches!(result, Err(ReadError::DeadlineExceeded(_))));
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_refreshes_read_deadline() {
        // Arrange: read timeout 10s; a pong arrives at t=8s.
        let (handle, peer) = mock::connection("test", timeouts());
        let handle = Arc::new(handle);
        let started = Instant::now();
        let reader = {
            let h = Arc::clone(&handle);
            tokio::spawn(async move { h.read_next().await })
        };

        // Act
        tokio::time::sleep(Duration::from_secs(8)).await;
        peer.push_pong();
        tokio::time::sleep(Duration::from_secs(7)).await;

        // Assert: at t=15s the original deadline (t=10s) has passed but the
        // reader is still waiting; it only gives up at t=18s.
        assert!(!reader.is_finished());
        let err = assert_err!(reader.await.expect("reader panicked"));
        assert!(matches!(err, ReadError::DeadlineExceeded(_)));
        assert_eq!(started.elapsed(), Duration::from_secs(18));
    }

    #[tokio::test]
    async fn test_from_websocket_round_trip_over_in_memory_duplex() {
        // Arrange: a real WebSocket handshake over an in-memory pipe.
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(async move {
            let mut ws = tokio_tungstenite::accept_async(server_io)
                .await
                .expect("server handshake");
            // Echo text frames back; tungstenite answers pings on its own.
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_text() && ws.send(msg).await.is_err() {
                    break;
                }
            }
        });
        let (client_ws, _resp) = tokio_tungstenite::client_async("ws://localhost/ws", client_io)
            .await
            .expect("client handshake");
        let handle = ConnectionHandle::from_websocket(client_ws, "duplex", timeouts());

        // Act
        assert_ok!(handle.ping().await);
        assert_ok!(handle.send("echo").await);
        let echoed = handle.read_next().await.expect("echo");

        // Assert: the pong was absorbed and the echoed text came back.
        assert_eq!(echoed, b"\"echo\"".to_vec());

        handle.close(crate::NORMAL_CLOSE_REASON).await;
        drop(handle);
        server.await.expect("server task");
    }
}
