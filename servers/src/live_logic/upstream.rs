use crate::live_logic::config::Config;
use crate::live_logic::model::LiveEvent;
use crate::live_logic::state::AppState;
use lib_fleet::FleetError;
use lib_fleet::ingestors::DeviceStatusIngestor;
use lib_fleet::retrieve::DeviceApi;
use lib_fleet::tracking::session::follow;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub async fn run(config: Config, app_state: AppState, mut shutdown: broadcast::Receiver<()>) {
    let cancel = CancellationToken::new();

    if let Some(device_id) = config.tracked_device.clone() {
        app_state.track(device_id).await;
    }

    // Subscribe before the ingestor starts so no message is missed
    let subscription = app_state.dispatcher.subscribe(cancel.child_token());
    let follower = {
        let state = app_state.clone();
        tokio::spawn(follow(app_state.session.clone(), subscription, move |message, update| {
            if update.changed() {
                state.notify(LiveEvent {
                    device_id: message.device_id.clone(),
                    marker: update.marker,
                    trajectory: update.trajectory,
                });
            }
        }))
    };

    let stream_config = config.stream_config();
    let ingestor = match DeviceStatusIngestor::from_config(&stream_config, app_state.dispatcher.clone()) {
        Ok(ingestor) => ingestor,
        Err(e) => {
            log::error!("Invalid push channel configuration: {}", e);
            cancel.cancel();
            let _ = follower.await;
            return;
        }
    };

    // The push channel connects while the roster loads; status messages for
    // devices not yet in the roster are filtered by the marker layer.
    let live = async {
        let (result, ()) = tokio::join!(ingestor.run(cancel.clone()), seed_roster(&config, &app_state, &cancel));
        match result {
            Ok(()) => log::info!("Push channel finished."),
            Err(FleetError::ReconnectExhausted { attempts }) => {
                log::error!("Push channel gave up after {} attempts; serving last known state.", attempts);
            }
            Err(e) => log::error!("Push channel stopped: {}", e),
        }
    };
    tokio::pin!(live);

    tokio::select! {
        _ = &mut live => {}
        _ = shutdown.recv() => {
            log::info!("Upstream shutting down...");
            cancel.cancel();
            live.await;
        }
    }

    // The map stays readable after the channel stops; the follower ends on shutdown.
    if !cancel.is_cancelled() {
        let _ = shutdown.recv().await;
        cancel.cancel();
    }
    match follower.await {
        Ok(handled) => log::info!("Applied {} status messages this run.", handled),
        Err(e) => log::error!("Tracking follower failed: {}", e),
    }
}

async fn seed_roster(config: &Config, app_state: &AppState, cancel: &CancellationToken) {
    let Some(api_base_url) = config.api_base_url.as_deref() else {
        log::warn!("No API base URL configured; the map starts without a roster.");
        return;
    };

    let api = match DeviceApi::connect(api_base_url, config.api_token.clone()) {
        Ok(api) => api,
        Err(e) => {
            log::error!("Invalid API base URL {}: {}", api_base_url, e);
            return;
        }
    };

    let loaded = tokio::select! {
        _ = cancel.cancelled() => {
            log::info!("Roster load abandoned on shutdown.");
            return;
        }
        loaded = api.load_roster() => loaded,
    };

    match loaded {
        Ok((devices, locations)) => {
            app_state.session.write().await.seed(devices, &locations);
        }
        Err(e) => log::error!("Failed to load the device roster: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use lib_fleet::core::LinkState;
    use lib_fleet::tracking::TrackingSession;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Accepts connections and never answers them.
    async fn silent_backend() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{addr}/")
    }

    /// Completes the WebSocket handshake and then stays quiet.
    async fn quiet_push_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                tokio::spawn(async move {
                    if let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await {
                        while let Some(Ok(_)) = ws.next().await {}
                    }
                });
            }
        });
        format!("http://{addr}")
    }

    fn state() -> AppState {
        AppState::new(TrackingSession::new("Professional"), 16)
    }

    #[tokio::test]
    async fn shutdown_interrupts_a_stalled_roster_load() {
        let backend = silent_backend().await;
        let config = Config {
            api_base_url: Some(backend.clone()),
            ws_base_url: Some(backend),
            ..Default::default()
        };
        let app_state = state();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(run(config, app_state.clone(), shutdown_rx));
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("upstream kept running after shutdown")
            .unwrap();
        assert_eq!(app_state.dispatcher.link_state(), LinkState::Closed);
        assert_eq!(app_state.session.read().await.markers().roster_len(), 0);
    }

    #[tokio::test]
    async fn push_channel_connects_while_roster_is_loading() {
        let config = Config {
            api_base_url: Some(silent_backend().await),
            ws_base_url: Some(quiet_push_server().await),
            ..Default::default()
        };
        let app_state = state();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run(config, app_state.clone(), shutdown_rx));

        let mut link = app_state.dispatcher.watch_link();
        tokio::time::timeout(Duration::from_secs(10), link.wait_for(|s| *s == LinkState::Connected))
            .await
            .expect("push channel waited for the roster")
            .unwrap();

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(10), handle).await.unwrap().unwrap();
    }
}
