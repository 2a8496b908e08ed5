use anyhow::Result;
use tokio::signal;

mod live_logic;
use live_logic::{config, downstream, logger, state, upstream};

use lib_fleet::tracking::TrackingSession;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config();
    logger::setup_logging(&config.log_dir(), config.log_level())?;

    let stream_config = config.stream_config();
    log::info!("Device status endpoint: {}", stream_config.endpoint()?);

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let app_state = state::AppState::new(
        TrackingSession::from_config(&stream_config),
        stream_config.fanout_capacity,
    );

    let upstream_handle = tokio::spawn(upstream::run(
        config.clone(),
        app_state.clone(),
        shutdown_tx.subscribe(),
    ));

    let downstream_handle = tokio::spawn(downstream::run(
        config.clone(),
        app_state.clone(),
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate() => {
            log::info!("SIGTERM received, initiating shutdown.");
        }
    }

    let _ = shutdown_tx.send(());

    if let Err(e) = tokio::try_join!(upstream_handle, downstream_handle) {
        log::error!("A component panicked during shutdown: {}", e);
    }

    log::info!("Shutdown complete.");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut term_signal) => {
            term_signal.recv().await;
        }
        Err(e) => {
            log::warn!("Cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
