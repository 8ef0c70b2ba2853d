use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod controller;
mod engine;
mod notifier;
mod pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "doorsightd starting");

    let config = config::Config::load().context("failed to load configuration")?;
    tracing::info!(
        gallery = %config.gallery_dir.display(),
        models = %config.model_dir.display(),
        sensor_pin = config.sensor_pin,
        gpio_line = config.sensor_line(),
        backend = ?config.capture_backend,
        "configuration loaded"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut done = engine::spawn_engine(config, Arc::clone(&shutdown))
        .context("failed to spawn controller thread")?;

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for interrupt")?;
            tracing::info!("interrupt received; waiting for controller to finish");
            shutdown.store(true, Ordering::SeqCst);
            (&mut done).await
        }
        result = &mut done => result,
    };

    outcome
        .context("controller thread exited without reporting")?
        .context("detector stopped")?;

    tracing::info!("doorsightd shut down");
    Ok(())
}
