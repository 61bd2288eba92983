use anyhow::Result;
use config::Config;
use futures::future::join_all;
use solar_miner_controller::{config, controller, telemetry};
use telemetry::init_tracing;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_tracing();

    let cfg = Config::load()?;
    info!(
        mode = %cfg.hardware.mode,
        timezone = %cfg.location.timezone,
        "starting Solar Miner Controller"
    );

    let app_state = controller::AppState::new(cfg)?;

    let cancel = CancellationToken::new();
    let tasks = controller::spawn_controller_tasks(app_state, cancel.clone());

    telemetry::shutdown_signal().await;
    cancel.cancel();
    for result in join_all(tasks).await {
        if let Err(e) = result {
            warn!(error = %e, "task did not stop cleanly");
        }
    }

    warn!("shutdown complete");
    Ok(())
}
