//! # Device Status Stream Integration Tests
//!
//! Runs `DeviceStatusIngestor` over the real tokio-tungstenite transport
//! against a scripted local WebSocket server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_util::sync::CancellationToken;

use lib_fleet::configs::ReconnectPolicy;
use lib_fleet::core::{Dispatcher, LinkState};
use lib_fleet::ingestors::{DeviceStatusIngestor, WsTransport};
use lib_fleet::FleetError;

/// How the server ends one connection.
enum End {
    Clean,
    Abnormal,
    Drop,
}

struct Conn {
    messages: Vec<String>,
    end: End,
}

fn status(device_id: &str) -> String {
    format!(r#"{{"device_id":"{device_id}","status":"On","type":"status"}}"#)
}

/// Serves one scripted connection per entry, then stops listening.
async fn scripted_server(script: Vec<Conn>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        for conn in script {
            let (tcp, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            let mut ws = accept_async(tcp).await.unwrap();
            for text in conn.messages {
                ws.send(Message::Text(text.into())).await.unwrap();
            }
            match conn.end {
                End::Clean => {
                    ws.close(None).await.ok();
                    while let Some(Ok(_)) = ws.next().await {}
                }
                End::Abnormal => {
                    let frame = CloseFrame { code: CloseCode::Error, reason: "boom".into() };
                    ws.close(Some(frame)).await.ok();
                    while let Some(Ok(_)) = ws.next().await {}
                }
                End::Drop => drop(ws),
            }
        }
    });

    (format!("ws://{addr}/ws/device-status/"), accepted)
}

fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy { max_attempts, base_delay_ms: 10 }
}

#[tokio::test]
async fn delivers_messages_until_clean_close() {
    let (url, accepted) = scripted_server(vec![Conn {
        messages: vec![status("a"), "garbage".into(), status("b")],
        end: End::Clean,
    }])
    .await;
    let dispatcher = Arc::new(Dispatcher::new(16));
    let mut sub = dispatcher.subscribe(CancellationToken::new());
    let ingestor = DeviceStatusIngestor::new(url, fast_policy(3), WsTransport, dispatcher.clone());

    ingestor.run(CancellationToken::new()).await.unwrap();

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(sub.recv().await.unwrap().device_id, "a");
    assert_eq!(sub.recv().await.unwrap().device_id, "b");
    assert_eq!(dispatcher.link_state(), LinkState::Closed);
}

#[tokio::test]
async fn reconnects_after_abnormal_endings() {
    let (url, accepted) = scripted_server(vec![
        Conn { messages: vec![status("a")], end: End::Drop },
        Conn { messages: vec![status("b")], end: End::Abnormal },
        Conn { messages: vec![status("c")], end: End::Clean },
    ])
    .await;
    let dispatcher = Arc::new(Dispatcher::new(16));
    let mut sub = dispatcher.subscribe(CancellationToken::new());
    let ingestor = DeviceStatusIngestor::new(url, fast_policy(1), WsTransport, dispatcher.clone());

    ingestor.run(CancellationToken::new()).await.unwrap();

    assert_eq!(accepted.load(Ordering::SeqCst), 3);
    for expected in ["a", "b", "c"] {
        assert_eq!(sub.recv().await.unwrap().device_id, expected);
    }
}

#[tokio::test]
async fn unreachable_server_exhausts_retries() {
    // Grab a free port, then close it.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let dispatcher = Arc::new(Dispatcher::new(16));
    let mut link = dispatcher.watch_link();
    let ingestor = DeviceStatusIngestor::new(
        format!("ws://127.0.0.1:{port}/ws/device-status/"),
        fast_policy(2),
        WsTransport,
        dispatcher.clone(),
    );

    let result = ingestor.run(CancellationToken::new()).await;

    assert!(matches!(result, Err(FleetError::ReconnectExhausted { attempts: 2 })));
    let state = *link.borrow_and_update();
    assert_eq!(state, LinkState::Exhausted { attempts: 2 });
    assert!(state.is_terminal());
}

#[tokio::test]
async fn cancellation_closes_an_open_stream() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    // Accepts and then stays silent.
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let dispatcher = Arc::new(Dispatcher::new(16));
    let ingestor = Arc::new(DeviceStatusIngestor::new(
        format!("ws://{addr}/ws/device-status/"),
        fast_policy(3),
        WsTransport,
        dispatcher.clone(),
    ));
    let cancel = CancellationToken::new();
    let task = {
        let ingestor = ingestor.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { ingestor.run(cancel).await })
    };

    let mut link = dispatcher.watch_link();
    link.wait_for(|s| *s == LinkState::Connected).await.unwrap();
    cancel.cancel();

    task.await.unwrap().unwrap();
    assert_eq!(dispatcher.link_state(), LinkState::Closed);
}
