//! Session Accessor
//!
//! Hands every UI consumer the same connection, recreating it when the
//! resolved URL changes. The context is an ordinary value: build one at
//! startup and pass it (or an `Arc` of it) to whoever needs a session.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::error::Result;
use crate::session::config::{PageLocation, SessionConfig};
use crate::ws::bus::Subscription;
use crate::ws::connection::Connection;
use crate::ws::transport::{Transport, WsTransport};

/// What a UI consumer gets back: the shared connection plus a reactive
/// readiness flag.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    connection: Connection,
    ready: watch::Receiver<bool>,
}

impl SessionHandle {
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Readiness receiver; `changed().await` resolves on every flip.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready.clone()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn into_parts(self) -> (Connection, watch::Receiver<bool>) {
        (self.connection, self.ready)
    }
}

struct ActiveSession {
    connection: Connection,
    ready_tx: Arc<watch::Sender<bool>>,
    readiness: Subscription,
}

impl ActiveSession {
    fn handle(&self) -> SessionHandle {
        SessionHandle {
            connection: self.connection.clone(),
            ready: self.ready_tx.subscribe(),
        }
    }

    fn teardown(self) {
        self.readiness.unsubscribe();
        self.connection.close();
        self.ready_tx.send_replace(false);
    }
}

pub struct SessionContext {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    current: Mutex<Option<ActiveSession>>,
}

impl SessionContext {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_transport(config, Arc::new(WsTransport::new()))
    }

    pub fn with_transport(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            current: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The session for `page`, built on first use. A different resolved URL
    /// closes and discards the previous session before the new one connects.
    pub fn acquire(&self, page: &PageLocation) -> Result<SessionHandle> {
        let url = self.config.resolve_url(page)?;
        let mut current = self.lock_current();

        if let Some(active) = current.as_ref() {
            if active.connection.url() == &url {
                return Ok(active.handle());
            }
        }

        if let Some(previous) = current.take() {
            log::info!(
                "[WS] Debugger URL changed from {} to {}, replacing session",
                previous.connection.url(),
                url
            );
            previous.teardown();
        }

        let connection =
            Connection::with_transport(self.config.settings_for(url), self.transport.clone());
        let ready_tx = Arc::new(watch::Sender::new(false));
        let tx = ready_tx.clone();
        let readiness = connection.on_connection_change(
            move |open| {
                tx.send_replace(open);
            },
            true,
        );

        let active = ActiveSession {
            connection,
            ready_tx,
            readiness,
        };
        let handle = active.handle();
        *current = Some(active);
        Ok(handle)
    }

    /// The live session, if any consumer has acquired one.
    pub fn current(&self) -> Option<SessionHandle> {
        self.lock_current().as_ref().map(ActiveSession::handle)
    }

    /// Close and forget the live session.
    pub fn shutdown(&self) {
        if let Some(active) = self.lock_current().take() {
            active.teardown();
        }
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
