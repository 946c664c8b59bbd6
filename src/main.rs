//! HueTV - Rust Implementation
//!
//! Reads webcam frames, finds the most common hue and sets it on all
//! Philips Hue lights.

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use huetv::adapters::{HueBridge, LightController};
use huetv::capture::{FrameSource, StillFrame};
use huetv::config::{self, Cli, Config};
use huetv::coordinator::Coordinator;
use huetv::discovery::BridgeLocator;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huetv=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli)?;
    tracing::debug!(?config, "Configuration loaded");

    let bridge_ip = match config.bridge.ip {
        Some(ip) => ip,
        None => {
            tracing::info!("Trying to find Hue bridge...");
            let locator = BridgeLocator::bind(&config.discovery_settings())?;
            locator.locate().await?
        }
    };
    tracing::info!("Hue bridge IP: {}", bridge_ip);

    let mut bridge = HueBridge::new(bridge_ip, config.bridge.username.clone())
        .with_link_retry(config.bridge.link_attempts, config.link_interval());
    bridge
        .connect()
        .await
        .context("failed to connect to the Hue bridge")?;
    let lights = bridge
        .fetch_state()
        .await
        .context("failed to read lights from the Hue bridge")?;
    tracing::info!(count = lights.len(), "Bridge lights: {:?}", lights);

    let source = open_source(&config)?;

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            ctrl_c.cancel();
        }
    });

    let mut coordinator = Coordinator::new(source, bridge, config.coordinator_settings());
    if let Err(e) = coordinator.run(shutdown).await {
        tracing::error!("Control loop failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}

fn open_source(config: &Config) -> Result<Box<dyn FrameSource>> {
    if let Some(path) = &config.frame_file {
        let still = StillFrame::open(path)
            .with_context(|| format!("failed to load frame file {}", path.display()))?;
        tracing::info!(path = %path.display(), "Using still frame");
        return Ok(Box::new(still));
    }
    open_webcam(config.webcam)
}

#[cfg(feature = "camera")]
fn open_webcam(index: i32) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(huetv::capture::Webcam::open(index)?))
}

#[cfg(not(feature = "camera"))]
fn open_webcam(index: i32) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!(
        "webcam {} unavailable: built without the `camera` feature \
         (rebuild with `--features camera` or pass --frame-file)",
        index
    )
}
