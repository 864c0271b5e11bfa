//! Rockfall Monitor - Edge Node Entry Point

use std::path::Path;
use std::sync::Arc;

use rockfall_edge::constants;
use rockfall_edge::logic::config::EdgeConfig;
use rockfall_edge::logic::coordinator::EdgeCoordinator;
use rockfall_edge::logic::sensors::SimulatedDriver;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting {} v{}", constants::APP_NAME, constants::APP_VERSION);

    let config_path = constants::get_config_path();
    let config = EdgeConfig::load_or_default(Path::new(&config_path));

    let coordinator = match EdgeCoordinator::new(config, Box::new(SimulatedDriver::new())) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            log::error!("Edge node failed to start (kind={}): {}", e.kind(), e);
            std::process::exit(1);
        }
    };

    let runner = tokio::spawn(coordinator.clone().run());

    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("Interrupt received, shutting down"),
        Err(e) => log::error!("Signal handler failed: {}", e),
    }
    coordinator.stop();

    if let Err(e) = runner.await {
        log::error!("Coordinator task failed: {}", e);
        std::process::exit(1);
    }
}
