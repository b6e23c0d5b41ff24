//! ClientSession: a WebSocket connection that keeps itself alive.
//!
//! # How the session works (for beginners)
//!
//! `start()` spawns one long-running **run task** that loops:
//!
//! ```text
//!  ┌────────────▶ dial ──fail──▶ wait retry_count × retry_interval ──┐
//!  │               │                 (or stop when out of retries)   │
//!  │               ok                                                │
//!  │               ▼                                                 │
//!  │   install handle, spawn keepalive, read until error             │
//!  │               │                                                 │
//!  └── reconnect ◀─┘ ◀──────────────────────────────────────────────┘
//! ```
//!
//! While connected, a second **keepalive task** pings every
//! `read_timeout / 2`.  The server's pong pushes the handle's read deadline
//! forward, so a healthy link never times out, while a silent one makes the
//! read loop fail within `read_timeout` and triggers a reconnect.
//!
//! # Sharing the live connection
//!
//! The currently installed [`ConnectionHandle`] lives in a
//! `RwLock<Option<Arc<ConnectionHandle>>>`.  `send()` and the keepalive task
//! take the read lock just long enough to clone the `Arc`, then write through
//! the handle (whose own write lock serialises frames).  Installing a new
//! handle or clearing a dead one takes the write lock.
//!
//! # Stopping
//!
//! Every wait in the run task (dial, read, backoff sleep) is raced against
//! one [`CancellationToken`].  `stop()` cancels it, force-closes the active
//! handle so a blocked read returns at once, and then awaits the run task,
//! which in turn awaits its keepalive task.  When `stop()` returns no
//! session task is left running.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tether_core::{ConnectionHandle, NORMAL_CLOSE_REASON};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connector::Connector;
use super::handler::SessionHandler;
use crate::domain::{EndpointConfig, SessionState};
use crate::error::{DialError, SessionError};

/// Keepalive never ticks faster than this, however small `read_timeout` is.
const MIN_KEEPALIVE_PERIOD: Duration = Duration::from_millis(1);

/// A reconnecting client session.
///
/// Cloning is cheap and every clone controls the same session.
///
/// Dropping the last clone does not stop a running session; call
/// [`stop`](Self::stop).
#[derive(Clone)]
pub struct ClientSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: Arc<EndpointConfig>,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn SessionHandler>,
    state: watch::Sender<SessionState>,
    /// Consecutive failed dials since the last successful connect.
    retry_count: AtomicU32,
    /// The installed connection, if any.  At most one at a time.
    active: RwLock<Option<Arc<ConnectionHandle>>>,
    /// Cancelled exactly once, by `stop()`.
    lifecycle: CancellationToken,
    stop_requested: AtomicBool,
    run_task: Mutex<Option<JoinHandle<()>>>,
}

impl ClientSession {
    /// Creates an idle session.  Nothing happens until [`start`](Self::start).
    pub fn new(
        config: EndpointConfig,
        connector: Arc<dyn Connector>,
        handler: Arc<dyn SessionHandler>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            inner: Arc::new(SessionInner {
                config: Arc::new(config),
                connector,
                handler,
                state,
                retry_count: AtomicU32::new(0),
                active: RwLock::new(None),
                lifecycle: CancellationToken::new(),
                stop_requested: AtomicBool::new(false),
                run_task: Mutex::new(None),
            }),
        }
    }

    /// Launches the run task and returns immediately.
    ///
    /// Accepted from `Idle`, and from `Stopped` when the session stopped
    /// because it ran out of retries.  Ignored in every other state and
    /// after an explicit [`stop`](Self::stop).  Each accepted call resets the
    /// retry count and fires `on_start`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let inner = &self.inner;
        let mut run_task = inner.run_task.lock().unwrap_or_else(PoisonError::into_inner);

        // stop() cancels under the same lock, so the check and the state
        // change below cannot interleave with it.
        let accepted = inner.state.send_if_modified(|state| {
            if !inner.lifecycle.is_cancelled() && state.accepts_start() {
                *state = SessionState::Connecting;
                true
            } else {
                false
            }
        });
        if !accepted {
            debug!(state = %self.state(), "start ignored: session running or stopped");
            return;
        }

        inner.retry_count.store(0, Ordering::SeqCst);
        info!(url = %inner.config.url(), "starting session");
        inner.handler.on_start();

        // After retries ran out the previous run task may still be inside
        // its last callback.  The new task joins it first, so stop() only
        // has one task to await.
        let previous = run_task.take();
        let runner = Arc::clone(inner);
        *run_task = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    error!("previous session task ended abnormally: {e}");
                }
            }
            runner.run().await;
        }));
    }

    /// Stops the session and waits until every session task has ended.
    ///
    /// Idempotent: only the first call does anything (and fires `on_stop`);
    /// later or concurrent calls return immediately.
    pub async fn stop(&self) {
        let inner = &self.inner;
        if inner.stop_requested.swap(true, Ordering::SeqCst) {
            debug!("stop already requested");
            return;
        }

        info!(url = %inner.config.url(), "stopping session");
        {
            let _starting = inner.run_task.lock().unwrap_or_else(PoisonError::into_inner);
            inner.lifecycle.cancel();
            inner.state.send_modify(|state| *state = SessionState::Stopped);
        }

        let active = inner.active.write().await.take();
        if let Some(handle) = active {
            handle.close(NORMAL_CLOSE_REASON).await;
        }

        let run_task = inner
            .run_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = run_task {
            if let Err(e) = task.await {
                error!("session task ended abnormally: {e}");
            }
        }

        inner.handler.on_stop();
        info!("session stopped");
    }

    /// Sends `payload` as a JSON text frame on the live connection.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotConnected`] when no connection is installed.
    ///   Nothing is queued.
    /// - [`SessionError::Write`] when the connection rejects the frame.
    pub async fn send<T>(&self, payload: &T) -> Result<(), SessionError>
    where
        T: Serialize + ?Sized,
    {
        let handle = self.inner.current().await.ok_or(SessionError::NotConnected)?;
        handle.send(payload).await.map_err(SessionError::Write)
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// A receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Consecutive failed dials since the last successful connect.
    pub fn retry_count(&self) -> u32 {
        self.inner.retry_count.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("url", &self.inner.config.url())
            .field("state", &self.state())
            .field("retry_count", &self.retry_count())
            .finish()
    }
}

// ── Run task ──────────────────────────────────────────────────────────────────

impl SessionInner {
    async fn run(self: Arc<Self>) {
        loop {
            if self.lifecycle.is_cancelled() {
                break;
            }
            self.transition(SessionState::Connecting);
            debug!(
                url = %self.config.url(),
                retry_count = self.retry_count.load(Ordering::SeqCst),
                "dialing"
            );

            let dialed = tokio::select! {
                () = self.lifecycle.cancelled() => break,
                dialed = self.connector.connect(&self.config) => dialed,
            };

            match dialed {
                Ok(handle) => {
                    let Some(handle) = self.install(handle).await else {
                        break;
                    };
                    self.serve(handle).await;
                }
                Err(e) => {
                    if !self.back_off(e).await {
                        break;
                    }
                }
            }
        }
        debug!("session run task finished");
    }

    /// Puts a freshly dialed handle into the connection slot.
    ///
    /// Returns `None` (after closing the handle) when `stop()` won the race.
    async fn install(&self, handle: ConnectionHandle) -> Option<Arc<ConnectionHandle>> {
        let handle = Arc::new(handle);
        let superseded = {
            let mut slot = self.active.write().await;
            if self.lifecycle.is_cancelled() {
                None
            } else {
                Some(slot.replace(Arc::clone(&handle)))
            }
        };

        match superseded {
            None => {
                handle.close(NORMAL_CLOSE_REASON).await;
                None
            }
            Some(previous) => {
                if let Some(previous) = previous {
                    warn!("replacing a connection that was still installed");
                    previous.close(NORMAL_CLOSE_REASON).await;
                }
                Some(handle)
            }
        }
    }

    /// Removes `handle` from the slot (if it is still the installed one) and
    /// closes it.
    async fn uninstall(&self, handle: &Arc<ConnectionHandle>) {
        {
            let mut slot = self.active.write().await;
            if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, handle)) {
                *slot = None;
            }
        }
        handle.close(NORMAL_CLOSE_REASON).await;
    }

    async fn current(&self) -> Option<Arc<ConnectionHandle>> {
        self.active.read().await.clone()
    }

    /// Runs one connected episode: keepalive plus read loop, then teardown.
    async fn serve(self: &Arc<Self>, handle: Arc<ConnectionHandle>) {
        self.retry_count.store(0, Ordering::SeqCst);
        self.transition(SessionState::Connected);
        info!(url = %self.config.url(), "connected");
        self.handler.on_connect();

        let keepalive_stop = self.lifecycle.child_token();
        let keepalive = tokio::spawn(Arc::clone(self).keepalive(keepalive_stop.clone()));

        let outcome = loop {
            tokio::select! {
                () = self.lifecycle.cancelled() => break None,
                read = handle.read_next() => match read {
                    Ok(message) => {
                        debug!(bytes = message.len(), "message received");
                        self.handler.on_message(&message);
                    }
                    Err(e) => break Some(e),
                },
            }
        };

        keepalive_stop.cancel();
        if let Err(e) = keepalive.await {
            error!("keepalive task ended abnormally: {e}");
        }
        self.uninstall(&handle).await;

        match outcome {
            Some(e) if !e.is_local_close() && !self.lifecycle.is_cancelled() => {
                warn!(url = %self.config.url(), "disconnected: {e}");
                self.transition(SessionState::Retrying);
                self.handler.on_disconnect(&SessionError::Read(e));
            }
            Some(e) => debug!("read loop ended by local shutdown: {e}"),
            None => debug!("read loop cancelled"),
        }
    }

    /// Pings the installed connection every `read_timeout / 2`.
    ///
    /// A failed ping is reported once and ends this task; the read loop
    /// notices the dead link on its own.
    async fn keepalive(self: Arc<Self>, stop: CancellationToken) {
        let period = self.config.timeouts().keepalive_period().max(MIN_KEEPALIVE_PERIOD);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = stop.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let Some(handle) = self.current().await else {
                continue;
            };
            match handle.ping().await {
                Ok(()) => debug!("keepalive ping sent"),
                Err(_) if stop.is_cancelled() => return,
                Err(e) => {
                    warn!("keepalive ping failed: {e}");
                    self.handler.on_error(&SessionError::Write(e));
                    return;
                }
            }
        }
    }

    /// Records a failed dial and waits out the backoff.
    ///
    /// Returns `false` when the run task should end: retries are exhausted
    /// or the session was stopped during the wait.
    async fn back_off(&self, error: DialError) -> bool {
        let retries = self.retry_count.fetch_add(1, Ordering::SeqCst) + 1;
        let policy = self.config.retry;
        let error = SessionError::Dial(error);
        warn!(
            attempt = retries,
            max_retries = policy.max_retries,
            "connection failed: {error}"
        );
        self.transition(SessionState::Retrying);
        self.handler.on_error(&error);

        if policy.is_exhausted(retries) {
            error!(max_retries = policy.max_retries, "max retries exceeded; giving up");
            self.transition(SessionState::Stopped);
            self.handler.on_error(&SessionError::RetriesExhausted {
                max_retries: policy.max_retries,
            });
            return false;
        }

        let wait = policy.delay_for(retries);
        info!("retrying in {wait:?} (attempt {retries} of {})", policy.max_retries);
        tokio::select! {
            () = self.lifecycle.cancelled() => false,
            () = sleep(wait) => true,
        }
    }

    /// Applies `next` if the state machine allows it; otherwise leaves the
    /// state untouched.
    fn transition(&self, next: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                debug!(from = %state, to = %next, "session state change");
                *state = next;
                true
            } else {
                false
            }
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
