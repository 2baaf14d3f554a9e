//! Connection Manager
//!
//! Owns the one live socket of a session and drives its lifecycle:
//!
//! ```text
//! Idle -> Connecting -> Open -> Closed -> Connecting -> ...
//! ```
//!
//! Socket tasks and reconnect timers never touch the session directly. They
//! post events to a single event-loop task which handles each one to
//! completion, so listeners are never invoked concurrently with each other.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use url::Url;

use crate::error::Result;
use crate::session::config::Settings;
use crate::ws::bus::{EventBus, Subscription};
use crate::ws::envelope::{self, Envelope, StateData};
use crate::ws::reconnect::{ReconnectDecision, ReconnectPolicy};
use crate::ws::transport::{
    LoopEvent, SocketEvent, SocketEvents, SocketHandle, SocketId, Transport, WsTransport,
    runtime_handle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Connecting,
    Open,
    Closed,
}

struct ActiveSocket {
    id: SocketId,
    handle: SocketHandle,
}

struct SessionState {
    lifecycle: LifecycleState,
    retries: u32,
    socket: Option<ActiveSocket>,
    /// Set by `close()`, cleared by an explicit `connect()`.
    manually_closed: bool,
    reconnect_timer: Option<(u64, AbortHandle)>,
}

impl SessionState {
    fn is_current(&self, id: SocketId) -> bool {
        self.socket.as_ref().is_some_and(|socket| socket.id == id)
    }

    fn cancel_reconnect(&mut self) -> bool {
        match self.reconnect_timer.take() {
            Some((_, timer)) => {
                timer.abort();
                true
            }
            None => false,
        }
    }
}

struct Inner {
    settings: Settings,
    policy: ReconnectPolicy,
    transport: Arc<dyn Transport>,
    bus: EventBus,
    state: Mutex<SessionState>,
    events: mpsc::UnboundedSender<LoopEvent>,
    runtime: Handle,
    next_socket: AtomicU64,
    next_timer: AtomicU64,
}

/// Cheap, cloneable handle to a session's connection manager.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Create a manager talking tokio-tungstenite. Connects right away unless
    /// `auto_connect` is off.
    pub fn new(settings: Settings) -> Self {
        Self::with_transport(settings, Arc::new(WsTransport::new()))
    }

    pub fn with_transport(settings: Settings, transport: Arc<dyn Transport>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let runtime = runtime_handle();
        let auto_connect = settings.auto_connect;

        let inner = Arc::new(Inner {
            policy: settings.reconnect_policy(),
            settings,
            transport,
            bus: EventBus::new(),
            state: Mutex::new(SessionState {
                lifecycle: LifecycleState::Idle,
                retries: 0,
                socket: None,
                manually_closed: false,
                reconnect_timer: None,
            }),
            events: tx,
            runtime: runtime.clone(),
            next_socket: AtomicU64::new(1),
            next_timer: AtomicU64::new(1),
        });

        runtime.spawn(run_event_loop(Arc::downgrade(&inner), rx));

        let connection = Self { inner };
        if auto_connect {
            connection.connect();
        }
        connection
    }

    /// Open a new socket to the configured URL, replacing any existing one.
    /// Also re-arms automatic reconnection after a manual `close()`.
    pub fn connect(&self) {
        self.inner.connect(true);
    }

    /// Gracefully close the active socket. Cancels a pending reconnect and
    /// keeps the resulting close from scheduling a new one.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Encode and transmit `message` if the socket is open; otherwise drop it.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        self.inner.send(message)
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn on_connection_change<F>(&self, callback: F, call_immediately: bool) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.bus.on_connection_change(callback, call_immediately)
    }

    pub fn on_message<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.inner.bus.on_message(callback)
    }

    pub fn on<F>(&self, event: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.bus.on(event, callback)
    }

    pub fn on_state<F>(&self, callback: F) -> Subscription
    where
        F: Fn(StateData) + Send + Sync + 'static,
    {
        self.inner.bus.on_state(callback)
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lock_state().lifecycle
    }

    pub fn is_open(&self) -> bool {
        self.state() == LifecycleState::Open
    }

    /// Reconnect attempts scheduled since the last successful open.
    pub fn retries(&self) -> u32 {
        self.inner.lock_state().retries
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.inner.lock_state().reconnect_timer.is_some()
    }

    pub fn url(&self) -> &Url {
        &self.inner.settings.url
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Whether both handles point at the same manager.
    pub fn ptr_eq(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("Connection")
            .field("url", &self.inner.settings.url.as_str())
            .field("state", &state.lifecycle)
            .field("retries", &state.retries)
            .finish()
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        // Never held across a callback or an await.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn log(&self, args: fmt::Arguments<'_>) {
        let level = if self.settings.debug {
            log::Level::Info
        } else {
            log::Level::Debug
        };
        log::log!(level, "[WS] {}", args);
    }

    fn connect(&self, explicit: bool) {
        let mut state = self.lock_state();
        if explicit {
            state.manually_closed = false;
        }
        state.cancel_reconnect();

        let was_open = state.lifecycle == LifecycleState::Open;
        if let Some(previous) = state.socket.take() {
            log::warn!("[WS] Already connected, closing existing connection");
            previous.handle.close();
            // Listeners saw `true` for it and are owed the matching `false`.
            // Posted before the new socket exists so it is handled first.
            if was_open {
                let _ = self.events.send(LoopEvent::Replaced { id: previous.id });
            }
        }

        let id = self.next_socket.fetch_add(1, Ordering::SeqCst);
        self.log(format_args!("Connecting to {} (socket {})", self.settings.url, id));

        let events = SocketEvents::new(id, self.events.clone());
        let handle = self.transport.open(&self.settings.url, events);
        state.socket = Some(ActiveSocket { id, handle });
        state.lifecycle = LifecycleState::Connecting;
    }

    fn close(&self) {
        let socket = {
            let mut state = self.lock_state();
            state.manually_closed = true;
            if state.cancel_reconnect() {
                self.log(format_args!("Cancelled pending reconnect"));
            }
            state.socket.as_ref().map(|socket| socket.handle.clone())
        };

        self.log(format_args!("Gracefully closing"));
        if let Some(handle) = socket {
            handle.close();
        }
    }

    fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let handle = {
            let state = self.lock_state();
            match (&state.lifecycle, &state.socket) {
                (LifecycleState::Open, Some(socket)) => socket.handle.clone(),
                _ => {
                    self.log(format_args!("Not connected, dropping outbound message"));
                    return Ok(());
                }
            }
        };

        let frame = envelope::encode(message)?;
        self.log(format_args!("Sending to nestor: {}", frame));
        if !handle.send_text(frame) {
            log::debug!("[WS] Socket task already gone, frame dropped");
        }
        Ok(())
    }

    fn handle_socket_event(&self, id: SocketId, event: SocketEvent) {
        match event {
            SocketEvent::Opened => {
                {
                    let mut state = self.lock_state();
                    if !state.is_current(id) {
                        log::debug!("[WS] Ignoring open of superseded socket {}", id);
                        return;
                    }
                    state.lifecycle = LifecycleState::Open;
                    state.retries = 0;
                }
                self.log(format_args!("Connection established"));
                self.bus.dispatch_connection_change(true);
            }
            SocketEvent::Frame(text) => {
                if !self.lock_state().is_current(id) {
                    return;
                }
                match envelope::decode(&text) {
                    Ok(envelope) => {
                        self.log(format_args!(
                            "Received from nestor: ({}) {}",
                            envelope.event(),
                            envelope.data()
                        ));
                        self.bus.dispatch_message(&envelope);
                    }
                    Err(e) => {
                        let excerpt: String = text.chars().take(200).collect();
                        log::error!("[WS] Dropping malformed frame {:?}: {}", excerpt, e);
                    }
                }
            }
            SocketEvent::Closed { code, reason } => {
                {
                    let mut state = self.lock_state();
                    if !state.is_current(id) {
                        log::debug!("[WS] Ignoring close of superseded socket {}", id);
                        return;
                    }
                    state.socket = None;
                    state.lifecycle = LifecycleState::Closed;
                }
                self.log(format_args!("Connection closed ({} {})", code, reason));
                self.bus.dispatch_connection_change(false);
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&self) {
        let mut retries = {
            let state = self.lock_state();
            // A listener may already have reconnected or closed us.
            if state.manually_closed {
                self.log(format_args!("Closed by caller, not reconnecting"));
                return;
            }
            if state.socket.is_some() {
                return;
            }
            state.retries
        };

        // Dynamic predicates run without the session lock held.
        let decision = self.policy.on_close(&mut retries);

        let mut state = self.lock_state();
        state.retries = retries;
        match decision {
            ReconnectDecision::Disabled => {}
            ReconnectDecision::Exhausted => {
                self.log(format_args!("Max retries reached, not reconnecting"));
            }
            ReconnectDecision::Retry { attempt, delay } => {
                self.log(format_args!(
                    "Reconnecting in {}s... (attempt {}/{})",
                    delay.as_secs_f32(),
                    attempt,
                    self.policy.max_attempts
                ));

                let timer = self.next_timer.fetch_add(1, Ordering::SeqCst);
                let events = self.events.clone();
                let task = self.runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(LoopEvent::Reconnect { timer });
                });
                state.cancel_reconnect();
                state.reconnect_timer = Some((timer, task.abort_handle()));
            }
        }
    }

    fn handle_reconnect(&self, timer: u64) {
        {
            let mut state = self.lock_state();
            match state.reconnect_timer {
                Some((pending, _)) if pending == timer => state.reconnect_timer = None,
                // Cancelled after it had already fired.
                _ => return,
            }
        }
        self.connect(false);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.cancel_reconnect();
        if let Some(socket) = state.socket.take() {
            socket.handle.close();
        }
    }
}

async fn run_event_loop(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<LoopEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };

        match event {
            LoopEvent::Socket { id, event } => inner.handle_socket_event(id, event),
            LoopEvent::Reconnect { timer } => inner.handle_reconnect(timer),
            LoopEvent::Replaced { id } => {
                log::debug!("[WS] Socket {} replaced", id);
                inner.bus.dispatch_connection_change(false);
            }
        }
    }
    log::debug!("[WS] Event loop stopped");
}
