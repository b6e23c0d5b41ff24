//! In-memory transport double for unit testing.
//!
//! Lets tests drive a [`ConnectionHandle`] without a socket: inject inbound
//! frames from the "peer", inspect every frame the handle wrote, and make
//! writes fail or stall.
//!
//! The recording sink deliberately yields once in the middle of every write
//! (between `start_send` and the end of `poll_flush`).  If two writers could
//! ever reach the sink at the same time, the second `start_send` would land
//! while the first frame is still in flight and
//! [`MockPeer::overlapping_writes`] would become non-zero.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_util::{stream, Sink};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::ConnectionHandle;
use crate::limits::ConnectionTimeouts;

#[derive(Default)]
struct SinkState {
    frames: Mutex<Vec<Message>>,
    in_flight: AtomicBool,
    overlapping: AtomicUsize,
    fail_writes: AtomicBool,
    stall_writes: AtomicBool,
    closed: AtomicBool,
}

struct RecordingSink {
    state: Arc<SinkState>,
    yielded: bool,
}

impl Sink<Message> for RecordingSink {
    type Error = WsError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        if self.state.stall_writes.load(Ordering::SeqCst) {
            // Never woken: the caller's write deadline has to fire.
            return Poll::Pending;
        }
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Poll::Ready(Err(WsError::ConnectionClosed));
        }
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), WsError> {
        if self.state.in_flight.swap(true, Ordering::SeqCst) {
            self.state.overlapping.fetch_add(1, Ordering::SeqCst);
        }
        self.state.frames.lock().expect("lock poisoned").push(item);
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        let this = self.get_mut();
        if !this.yielded {
            this.yielded = true;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        this.yielded = false;
        this.state.in_flight.store(false, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        self.state.in_flight.store(false, Ordering::SeqCst);
        self.state.closed.store(true, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

/// The far end of a mock connection.
///
/// Cloning yields another view of the same connection.
#[derive(Clone)]
pub struct MockPeer {
    inbound: Arc<Mutex<Option<mpsc::UnboundedSender<Result<Message, WsError>>>>>,
    sink: Arc<SinkState>,
}

/// Creates a [`ConnectionHandle`] wired to an in-memory [`MockPeer`].
pub fn connection(label: &str, timeouts: ConnectionTimeouts) -> (ConnectionHandle, MockPeer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = Arc::new(SinkState::default());

    let sink = RecordingSink {
        state: Arc::clone(&state),
        yielded: false,
    };
    let source = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });

    let handle = ConnectionHandle::new(label, Box::pin(sink), Box::pin(source), timeouts);
    let peer = MockPeer {
        inbound: Arc::new(Mutex::new(Some(tx))),
        sink: state,
    };
    (handle, peer)
}

impl MockPeer {
    fn push(&self, item: Result<Message, WsError>) {
        if let Some(tx) = self.inbound.lock().expect("lock poisoned").as_ref() {
            // The handle may already be gone; that is fine for a test peer.
            let _ = tx.send(item);
        }
    }

    /// Delivers a text frame to the handle.
    pub fn push_text(&self, text: &str) {
        self.push(Ok(Message::Text(text.to_owned())));
    }

    /// Delivers a binary frame to the handle.
    pub fn push_binary(&self, data: Vec<u8>) {
        self.push(Ok(Message::Binary(data)));
    }

    /// Delivers a keepalive pong.
    pub fn push_pong(&self) {
        self.push(Ok(Message::Pong(Vec::new())));
    }

    /// Delivers a close frame.
    pub fn push_close(&self, code: u16, reason: &str) {
        self.push(Ok(Message::Close(Some(CloseFrame {
            code: code.into(),
            reason: reason.to_owned().into(),
        }))));
    }

    /// Delivers a transport error.
    pub fn push_error(&self, error: WsError) {
        self.push(Err(error));
    }

    /// Ends the inbound stream, as if the socket hit EOF.
    pub fn end_stream(&self) {
        self.inbound.lock().expect("lock poisoned").take();
    }

    /// Makes every subsequent write fail.
    pub fn fail_writes(&self) {
        self.sink.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Makes writes hang (or stop hanging).
    pub fn stall_writes(&self, stall: bool) {
        self.sink.stall_writes.store(stall, Ordering::SeqCst);
    }

    /// Every frame the handle has written, in order.
    pub fn frames(&self) -> Vec<Message> {
        self.sink.frames.lock().expect("lock poisoned").clone()
    }

    /// The text frames the handle has written.
    pub fn texts(&self) -> Vec<String> {
        self.frames()
            .into_iter()
            .filter_map(|frame| match frame {
                Message::Text(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Number of pings the handle has written.
    pub fn ping_count(&self) -> usize {
        self.frames()
            .iter()
            .filter(|frame| matches!(frame, Message::Ping(_)))
            .count()
    }

    /// `(code, reason)` of every close frame the handle has written.
    pub fn close_frames(&self) -> Vec<(u16, String)> {
        self.frames()
            .into_iter()
            .filter_map(|frame| match frame {
                Message::Close(Some(close)) => {
                    Some((u16::from(close.code), close.reason.into_owned()))
                }
                _ => None,
            })
            .collect()
    }

    /// Writes that started while another write was still in flight.
    pub fn overlapping_writes(&self) -> usize {
        self.sink.overlapping.load(Ordering::SeqCst)
    }

    /// Whether the handle has closed its sink.
    pub fn is_sink_closed(&self) -> bool {
        self.sink.closed.load(Ordering::SeqCst)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
