mod common;

use common::{MockTransport, settle};
use nestor_ws::{Outgoing, PageLocation, SessionConfig, SessionContext};

#[tokio::test]
async fn consumers_on_the_same_url_share_one_session() {
    let (transport, mut opened) = MockTransport::new();
    let context = SessionContext::with_transport(SessionConfig::default(), transport);
    let page = PageLocation::new("localhost:7777", "/");

    let a = context.acquire(&page).unwrap();
    let b = context.acquire(&page).unwrap();

    assert!(a.connection().ptr_eq(b.connection()));
    assert_eq!(a.connection().url().as_str(), "ws://localhost:7777/ws");

    let sock = opened.recv().await.unwrap();
    settle().await;
    assert!(opened.try_recv().is_err());
    assert!(!a.is_ready());

    sock.events.opened();
    let mut ready = b.ready();
    ready.wait_for(|open| *open).await.unwrap();
    assert!(a.is_ready());
    assert!(context.current().unwrap().is_ready());
}

#[tokio::test]
async fn url_change_tears_down_the_previous_session_first() {
    let (transport, mut opened) = MockTransport::new();
    let context = SessionContext::with_transport(SessionConfig::default(), transport);

    let old = context.acquire(&PageLocation::new("localhost:7777", "/")).unwrap();
    let mut old_sock = opened.recv().await.unwrap();
    old_sock.events.opened();
    old.ready().wait_for(|open| *open).await.unwrap();

    let new = context
        .acquire(&PageLocation::new("localhost:7777", "/other"))
        .unwrap();

    assert!(!old.connection().ptr_eq(new.connection()));
    assert_eq!(old_sock.outgoing.recv().await, Some(Outgoing::Close));
    assert!(!old.is_ready());

    let new_sock = opened.recv().await.unwrap();
    assert_eq!(new_sock.url.as_str(), "ws://localhost:7777/other/ws");

    // The torn-down session's close is final; nothing reconnects to the old URL.
    old_sock.events.closed(1000, "Closed by client");
    settle().await;
    assert!(!old.connection().has_pending_reconnect());
    assert!(context.current().unwrap().connection().ptr_eq(new.connection()));
}

#[tokio::test]
async fn host_override_redirects_the_session() {
    let (transport, mut opened) = MockTransport::new();
    let config = SessionConfig::default().with_host_override("127.0.0.1:9000");
    let context = SessionContext::with_transport(config, transport);

    let session = context.acquire(&PageLocation::new("ui.local:3000", "/")).unwrap();
    assert_eq!(session.connection().url().as_str(), "ws://127.0.0.1:9000/ws");
    assert_eq!(opened.recv().await.unwrap().url.as_str(), "ws://127.0.0.1:9000/ws");
}

#[tokio::test]
async fn shutdown_closes_the_live_session() {
    let (transport, mut opened) = MockTransport::new();
    let context = SessionContext::with_transport(SessionConfig::default(), transport);

    let session = context.acquire(&PageLocation::default()).unwrap();
    let mut sock = opened.recv().await.unwrap();

    context.shutdown();
    assert!(context.current().is_none());
    assert_eq!(sock.outgoing.recv().await, Some(Outgoing::Close));
    assert!(!session.is_ready());
}
