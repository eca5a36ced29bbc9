//! Hermes sensor streaming server

use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::{eyre::WrapErr, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use hermes::consent::{ConsentGate, SensorKind, StaticConsent};
use hermes::{server, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("Hermes Launching...");

    // Load configuration; the first argument names an optional TOML file
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(path.as_deref()).wrap_err("Failed to load configuration")?;
    info!(
        "Sensor: {:?} {}x{} @ {} fps, encoder: {:?}",
        config.sensor.source,
        config.sensor.width,
        config.sensor.height,
        config.sensor.fps,
        config.encoder.backend
    );
    let camera_consent = StaticConsent(config.consent.camera);
    hermes::CONFIG.store(Arc::new(config));

    // Ask for sensor access up front; sessions wait on the answer
    let consent = Arc::new(ConsentGate::start(SensorKind::Camera, camera_consent)?);

    server::run(consent).await?;

    info!("Hermes shutting down");
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hermes=info"));
    let fmt = tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime());

    let registry = tracing_subscriber::registry().with(filter).with(fmt);

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}
