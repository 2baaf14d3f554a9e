#![allow(dead_code)]

use std::sync::Arc;

use nestor_ws::{Connection, Outgoing, SocketEvents, SocketHandle, Transport};
use tokio::sync::mpsc;
use url::Url;

/// A socket opened through [`MockTransport`]; the test plays the server.
pub struct MockSocket {
    pub url: Url,
    pub events: SocketEvents,
    pub outgoing: mpsc::UnboundedReceiver<Outgoing>,
}

pub struct MockTransport {
    opened: mpsc::UnboundedSender<MockSocket>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockSocket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { opened: tx }), rx)
    }
}

impl Transport for MockTransport {
    fn open(&self, url: &Url, events: SocketEvents) -> SocketHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.opened.send(MockSocket {
            url: url.clone(),
            events,
            outgoing: rx,
        });
        SocketHandle::new(tx)
    }
}

/// Forward every readiness change of `connection` into a channel.
pub fn readiness(connection: &Connection) -> mpsc::UnboundedReceiver<bool> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _sub = connection.on_connection_change(
        move |open| {
            let _ = tx.send(open);
        },
        false,
    );
    rx
}

/// Let the connection's event loop drain what has been posted so far.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
