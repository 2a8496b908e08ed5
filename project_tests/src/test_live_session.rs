//! # Live Session Integration Test
//!
//! Push channel -> fan-out -> tracking session, over a real socket.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;

use lib_fleet::configs::StreamConfig;
use lib_fleet::core::Dispatcher;
use lib_fleet::ingestors::DeviceStatusIngestor;
use lib_fleet::tracking::session::follow;
use lib_fleet::tracking::{CompanyManager, Device, PowerStatus, SegmentState, TrackingSession};

fn sample(device_id: &str, lat: f64, lng: f64, mode: &str) -> String {
    json!({
        "device_id": device_id,
        "status": "On",
        "type": "position",
        "position": {"lat": lat, "lng": lng, "device_mode": mode, "status": "On"},
        "speed": 42,
        "car_name": "Kangoo",
        "companyName": "Acme",
        "address": "Rue de Rivoli"
    })
    .to_string()
}

async fn one_shot_server(frames: Vec<String>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        for text in frames {
            ws.send(Message::Text(text.into())).await.unwrap();
        }
        ws.close(None).await.ok();
        while let Some(Ok(_)) = ws.next().await {}
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn streamed_samples_become_markers_and_segments() {
    let frames = vec![
        sample("van", 48.85, 2.35, "Professional"),
        sample("van", 48.86, 2.36, "Professional"),
        sample("stranger", 10.0, 10.0, "Professional"),
        sample("van", 48.87, 2.37, "Personal"),
    ];
    let expected = frames.len();
    let ws_base_url = one_shot_server(frames).await;

    // The http base is rewritten to ws by the endpoint builder.
    let config = StreamConfig { ws_base_url, ..Default::default() };
    let dispatcher = Arc::new(Dispatcher::new(config.fanout_capacity));

    let mut session = TrackingSession::from_config(&config);
    session.seed(
        vec![Device {
            uid: "van".into(),
            name: "Van 7".into(),
            car_name: "Kangoo".into(),
            company_manager: CompanyManager { uid: None, name: "Acme".into() },
            ..Default::default()
        }],
        &[],
    );
    session.track("van");
    let session = Arc::new(RwLock::new(session));

    let sub_cancel = CancellationToken::new();
    let (applied_tx, mut applied_rx) = mpsc::unbounded_channel();
    let follower = tokio::spawn(follow(
        session.clone(),
        dispatcher.subscribe(sub_cancel.clone()),
        move |message, update| {
            applied_tx.send((message.device_id.clone(), update)).ok();
        },
    ));

    let ingestor = DeviceStatusIngestor::from_config(&config, dispatcher.clone()).unwrap();
    ingestor.run(CancellationToken::new()).await.unwrap();

    let mut applied = Vec::new();
    while applied.len() < expected {
        applied.push(applied_rx.recv().await.unwrap());
    }
    sub_cancel.cancel();
    assert_eq!(follower.await.unwrap(), expected);

    // Devices outside the roster never reach the map.
    assert!(applied.iter().any(|(id, update)| id == "stranger" && !update.changed()));

    let session = session.read().await;
    let markers = session.markers();
    assert_eq!(markers.len(), 1);
    let van = markers.get("van").unwrap();
    assert_eq!(van.device_name, "Van 7");
    assert_eq!(van.lon_lat, [2.37, 48.87]);
    assert_eq!(van.status, PowerStatus::On);
    assert_eq!(van.speed, "42");
    assert_eq!(markers.popup("van").unwrap().address, "Rue de Rivoli");

    let trajectory = session.trajectory().unwrap();
    assert_eq!(trajectory.finalized().len(), 1);
    assert_eq!(trajectory.finalized()[0].len(), 2);
    assert_eq!(trajectory.rendered().len(), 1);
    assert_eq!(trajectory.state(), SegmentState::NoSegment);
    assert_eq!(trajectory.last_position(), Some([2.37, 48.87]));
}
