//! WebSocket Transport
//!
//! Each socket lives in its own task driving tokio-tungstenite. The task never
//! touches session state: it reports `Opened`, `Frame` and `Closed` to the
//! owning connection's event loop and takes outbound frames from a channel.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use url::Url;

use crate::error::Result;

/// Close code reported when the socket went away without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
pub const NORMAL_CLOSURE: u16 = 1000;

/// Background runtime for hosts that are not themselves running tokio.
static BACKGROUND: once_cell::sync::Lazy<Runtime> = once_cell::sync::Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("nestor-ws")
        .build()
        .expect("Failed to build WebSocket runtime")
});

/// The runtime the caller is on, or the shared background one.
pub(crate) fn runtime_handle() -> Handle {
    Handle::try_current().unwrap_or_else(|_| BACKGROUND.handle().clone())
}

pub type SocketId = u64;

/// What a socket reports back to its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Opened,
    Frame(String),
    Closed { code: u16, reason: String },
}

#[derive(Debug)]
pub(crate) enum LoopEvent {
    Socket { id: SocketId, event: SocketEvent },
    Reconnect { timer: u64 },
    /// An open socket was replaced by `connect()`.
    Replaced { id: SocketId },
}

/// Where a transport pushes the events of one socket.
#[derive(Clone, Debug)]
pub struct SocketEvents {
    id: SocketId,
    tx: mpsc::UnboundedSender<LoopEvent>,
}

impl SocketEvents {
    pub(crate) fn new(id: SocketId, tx: mpsc::UnboundedSender<LoopEvent>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn opened(&self) {
        self.push(SocketEvent::Opened);
    }

    pub fn frame(&self, text: impl Into<String>) {
        self.push(SocketEvent::Frame(text.into()));
    }

    pub fn closed(&self, code: u16, reason: impl Into<String>) {
        self.push(SocketEvent::Closed {
            code,
            reason: reason.into(),
        });
    }

    fn push(&self, event: SocketEvent) {
        // The connection is gone; nobody is listening any more.
        if self.tx.send(LoopEvent::Socket { id: self.id, event }).is_err() {
            log::debug!("[WebSocket {}] Event dropped, connection released", self.id);
        }
    }
}

/// Commands accepted by a socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    Close,
}

/// Write side of one socket.
#[derive(Clone, Debug)]
pub struct SocketHandle {
    sender: mpsc::UnboundedSender<Outgoing>,
}

impl SocketHandle {
    pub fn new(sender: mpsc::UnboundedSender<Outgoing>) -> Self {
        Self { sender }
    }

    pub fn send_text(&self, text: String) -> bool {
        self.sender.send(Outgoing::Text(text)).is_ok()
    }

    pub fn close(&self) {
        let _ = self.sender.send(Outgoing::Close);
    }
}

/// Opens sockets. `open` must return immediately and report the outcome
/// through `events` only.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, url: &Url, events: SocketEvents) -> SocketHandle;
}

/// tokio-tungstenite transport over plain TCP.
#[derive(Clone, Debug)]
pub struct WsTransport {
    runtime: Handle,
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            runtime: runtime_handle(),
        }
    }

    pub fn with_runtime(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for WsTransport {
    fn open(&self, url: &Url, events: SocketEvents) -> SocketHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.runtime.spawn(run_socket(url.clone(), events, rx));
        SocketHandle::new(tx)
    }
}

async fn dial(url: &Url) -> Result<WebSocketStream<TcpStream>> {
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port_or_known_default().unwrap_or(80);

    // `host_str` keeps IPv6 brackets, which the `host:port` form expects.
    let tcp_stream = TcpStream::connect(format!("{}:{}", host, port))
        .await
        .map_err(tungstenite::Error::from)?;

    let request = url.as_str().into_client_request()?;
    let (stream, response) = tokio_tungstenite::client_async(request, tcp_stream).await?;
    log::debug!("Handshake with {} done (status: {})", url, response.status());

    Ok(stream)
}

async fn run_socket(
    url: Url,
    events: SocketEvents,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
) {
    let id = events.id();
    log::debug!("[WebSocket {}] Connecting to {}", id, url);

    let dialing = dial(&url);
    tokio::pin!(dialing);

    let stream = loop {
        tokio::select! {
            result = &mut dialing => break result,
            command = outgoing.recv() => match command {
                Some(Outgoing::Text(_)) => {
                    log::debug!("[WebSocket {}] Dropping frame sent while connecting", id);
                }
                Some(Outgoing::Close) | None => {
                    log::debug!("[WebSocket {}] Closed while connecting", id);
                    events.closed(NORMAL_CLOSURE, "Closed while connecting");
                    return;
                }
            },
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("[WebSocket {}] Connection failed: {}", id, e);
            events.closed(ABNORMAL_CLOSURE, "Connection failed");
            return;
        }
    };

    events.opened();
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            command = outgoing.recv() => match command {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        log::error!("[WebSocket {}] Send error: {}", id, e);
                        events.closed(ABNORMAL_CLOSURE, "Send failed");
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    log::debug!("[WebSocket {}] Closing", id);
                    if let Err(e) = write.close().await {
                        log::debug!("[WebSocket {}] Close handshake failed: {}", id, e);
                    }
                    events.closed(NORMAL_CLOSURE, "Closed by client");
                    break;
                }
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    log::trace!("[WebSocket {}] Received {} bytes", id, text.len());
                    events.frame(text.as_str());
                }
                Some(Ok(Message::Binary(data))) => {
                    log::debug!("[WebSocket {}] Ignoring binary frame ({} bytes)", id, data.len());
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (f.code.into(), f.reason.to_string()))
                        .unwrap_or((NORMAL_CLOSURE, String::new()));
                    log::debug!("[WebSocket {}] Received close: {} {}", id, code, reason);
                    // Flush the close reply tungstenite queued for the peer.
                    if let Err(e) = write.close().await {
                        log::debug!("[WebSocket {}] Close handshake failed: {}", id, e);
                    }
                    events.closed(code, reason);
                    break;
                }
                // Ping/Pong are answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::error!("[WebSocket {}] Read error: {}", id, e);
                    events.closed(ABNORMAL_CLOSURE, "Connection error");
                    break;
                }
                None => {
                    events.closed(ABNORMAL_CLOSURE, "Connection ended");
                    break;
                }
            },
        }
    }

    log::debug!("[WebSocket {}] Connection ended", id);
}
