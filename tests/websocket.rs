mod common;

use std::time::Duration;

use common::readiness;
use futures_util::{SinkExt, StreamExt};
use nestor_ws::{
    Connection, CpuCommand, CpuStatus, ReconnectPredicate, Request, Settings, StateData,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

async fn emulator() -> (String, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    (url, listener)
}

#[tokio::test]
async fn talks_to_a_real_debugger_endpoint() {
    let (url, listener) = emulator().await;

    let (requests_tx, mut requests) = mpsc::unbounded_channel();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(
            r#"{"event":"state","data":{"status":"paused","pc":32768}}"#
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                let _ = requests_tx.send(text.as_str().to_owned());
                break;
            }
        }
        ws.close(None).await.ok();
    });

    let settings = Settings::new(&url)
        .unwrap()
        .with_reconnect(ReconnectPredicate::Never);
    let conn = Connection::new(settings);

    let (ready_tx, mut ready) = mpsc::unbounded_channel();
    let _ready = conn.on_connection_change(
        move |open| {
            let _ = ready_tx.send(open);
        },
        false,
    );
    let (state_tx, mut states) = mpsc::unbounded_channel();
    let _state = conn.on_state(move |state| {
        let _ = state_tx.send(state);
    });

    assert_eq!(timeout(WAIT, ready.recv()).await.unwrap(), Some(true));
    assert_eq!(
        timeout(WAIT, states.recv()).await.unwrap(),
        Some(StateData {
            status: CpuStatus::Paused,
            pc: 0x8000
        })
    );

    conn.send(&Request::SetCpuState(CpuCommand::Run)).unwrap();
    assert_eq!(
        timeout(WAIT, requests.recv()).await.unwrap().as_deref(),
        Some(r#"{"event":"set-cpu-state","data":"run"}"#)
    );

    assert_eq!(timeout(WAIT, ready.recv()).await.unwrap(), Some(false));
    server.await.unwrap();
}

#[tokio::test]
async fn refused_connection_surfaces_as_a_close() {
    let (url, listener) = emulator().await;
    drop(listener);

    let settings = Settings::new(&url)
        .unwrap()
        .with_reconnect(ReconnectPredicate::Never);
    let conn = Connection::new(settings.with_auto_connect(false));

    let (ready_tx, mut ready) = mpsc::unbounded_channel();
    let _ready = conn.on_connection_change(
        move |open| {
            let _ = ready_tx.send(open);
        },
        false,
    );

    conn.connect();
    assert_eq!(timeout(WAIT, ready.recv()).await.unwrap(), Some(false));
    assert!(!conn.is_open());
}

#[tokio::test]
async fn server_close_is_acknowledged() {
    let (url, listener) = emulator().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.close(None).await.unwrap();
        matches!(ws.next().await, Some(Ok(Message::Close(_))))
    });

    let settings = Settings::new(&url)
        .unwrap()
        .with_reconnect(ReconnectPredicate::Never);
    let conn = Connection::new(settings);
    let mut ready = readiness(&conn);

    assert_eq!(timeout(WAIT, ready.recv()).await.unwrap(), Some(true));
    assert_eq!(timeout(WAIT, ready.recv()).await.unwrap(), Some(false));
    assert!(timeout(WAIT, server).await.unwrap().unwrap());
}

#[tokio::test]
async fn dials_ipv6_hosts() {
    // Hosts without IPv6 loopback have nothing to test.
    let Ok(listener) = TcpListener::bind("[::1]:0").await else {
        return;
    };
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    assert!(url.starts_with("ws://[::1]:"));

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let settings = Settings::new(&url)
        .unwrap()
        .with_reconnect(ReconnectPredicate::Never);
    let conn = Connection::new(settings);
    let mut ready = readiness(&conn);

    assert_eq!(timeout(WAIT, ready.recv()).await.unwrap(), Some(true));
    conn.close();
    assert_eq!(timeout(WAIT, ready.recv()).await.unwrap(), Some(false));
    timeout(WAIT, server).await.unwrap().unwrap();
}
