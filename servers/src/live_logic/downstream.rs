use crate::live_logic::config::Config;
use crate::live_logic::model::{ClientMessage, LiveEvent, ServerMessage};
use crate::live_logic::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::StreamExt;
use lib_fleet::tracking::{MarkerChange, TrackingSession};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast::{self, error::RecvError};

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/link", get(link_handler))
        .route("/markers", get(markers_handler))
        .route("/markers/{device_id}/popup", get(popup_handler))
        .route("/trajectory", get(trajectory_handler))
        .route("/track/{device_id}", post(track_handler))
        .route("/track", delete(untrack_handler))
        .with_state(app_state)
}

pub async fn run(config: Config, app_state: AppState, mut shutdown: broadcast::Receiver<()>) {
    let app = router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port()));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("Failed to bind {}: {}", addr, e);
            return;
        }
    };
    log::info!("Downstream server listening on {}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("Downstream server shutting down.");
        })
        .await;
    if let Err(e) = served {
        log::error!("Downstream server failed: {}", e);
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn link_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dispatcher.link_state())
}

async fn markers_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.read().await.markers().to_geojson())
}

async fn popup_handler(Path(device_id): Path<String>, State(state): State<AppState>) -> impl IntoResponse {
    match state.session.read().await.markers().popup(&device_id) {
        Some(popup) => (StatusCode::OK, Json(popup)).into_response(),
        None => (StatusCode::NOT_FOUND, "Unknown device").into_response(),
    }
}

async fn trajectory_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.session.read().await.trajectory() {
        Some(trajectory) => (StatusCode::OK, Json(trajectory.to_geojson())).into_response(),
        None => (StatusCode::NOT_FOUND, "No device is tracked").into_response(),
    }
}

async fn track_handler(Path(device_id): Path<String>, State(state): State<AppState>) -> impl IntoResponse {
    state.track(device_id).await;
    StatusCode::NO_CONTENT
}

async fn untrack_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.untrack().await;
    StatusCode::NO_CONTENT
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// The push message for one applied status update, rendered from the
/// current session state.
fn render_event(session: &TrackingSession, event: &LiveEvent) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    if let (Some(change), Some(marker)) = (event.marker, session.markers().get(&event.device_id)) {
        out.push(ServerMessage::Marker {
            created: change == MarkerChange::Created,
            feature: marker.to_geojson(),
        });
    }
    if event.trajectory.is_some() {
        if let Some(trajectory) = session.trajectory().filter(|t| t.device_id() == event.device_id) {
            out.push(ServerMessage::Trajectory {
                device_id: event.device_id.clone(),
                collection: trajectory.to_geojson(),
            });
        }
    }
    out
}

async fn send(socket: &mut WebSocket, message: &ServerMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json_str) => socket.send(Message::Text(json_str.into())).await.is_ok(),
        Err(e) => {
            log::error!("Failed to encode server message: {}", e);
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    log::info!("Client {} connected", client_id);

    let mut events_rx = state.events_tx.subscribe();
    let mut link_rx = state.dispatcher.watch_link();

    let snapshot = ServerMessage::Snapshot {
        markers: state.session.read().await.markers().to_geojson(),
    };
    let link = ServerMessage::Link { link: *link_rx.borrow_and_update() };
    if !send(&mut socket, &snapshot).await || !send(&mut socket, &link).await {
        log::info!("Client {} disconnected", client_id);
        return;
    }

    loop {
        tokio::select! {
            msg = socket.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                if client_msg.untrack == Some(true) {
                                    state.untrack().await;
                                }
                                if let Some(device_id) = client_msg.track {
                                    state.track(device_id).await;
                                }
                            }
                            Err(e) => {
                                let error = ServerMessage::Error { error: format!("Invalid request: {}", e) };
                                if !send(&mut socket, &error).await {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
            event = events_rx.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Client {} lagged, skipped {} updates", client_id, skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let messages = render_event(&*state.session.read().await, &event);
                let mut alive = true;
                for message in &messages {
                    if !send(&mut socket, message).await {
                        alive = false;
                        break;
                    }
                }
                if !alive {
                    break;
                }
            }
            changed = link_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let link = ServerMessage::Link { link: *link_rx.borrow_and_update() };
                if !send(&mut socket, &link).await {
                    break;
                }
            }
        }
    }

    log::info!("Client {} disconnected", client_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_fleet::tracking::{Absorbed, Device, DeviceStatusMessage, PowerStatus};

    fn session_with_van() -> TrackingSession {
        let mut session = TrackingSession::new("Professional");
        session.seed(
            vec![Device { uid: "van".into(), name: "Van".into(), ..Default::default() }],
            &[],
        );
        session.track("van");
        session
    }

    #[test]
    fn event_renders_marker_and_trajectory() {
        let mut session = session_with_van();
        let message = DeviceStatusMessage::new("van", PowerStatus::On).with_position(48.85, 2.35, "Professional");
        let update = session.handle(&message);
        assert_eq!(update.trajectory, Some(Absorbed::Appended));

        let event = LiveEvent { device_id: "van".into(), marker: update.marker, trajectory: update.trajectory };
        let rendered = render_event(&session, &event);

        assert_eq!(rendered.len(), 2);
        assert!(matches!(rendered[0], ServerMessage::Marker { created: true, .. }));
        assert!(matches!(&rendered[1], ServerMessage::Trajectory { device_id, .. } if device_id == "van"));
    }

    #[test]
    fn event_for_untracked_device_renders_marker_only() {
        let mut session = session_with_van();
        session.untrack();
        let message = DeviceStatusMessage::new("van", PowerStatus::Off).with_position(1.0, 2.0, "Professional");
        let update = session.handle(&message);

        let event = LiveEvent { device_id: "van".into(), marker: update.marker, trajectory: update.trajectory };
        let rendered = render_event(&session, &event);

        assert_eq!(rendered.len(), 1);
    }
}
