//! Coordinator - the capture/extract/apply control loop
//!
//! Each step grabs a frame, extracts its dominant hue and feeds the
//! smoothing buffer. Whenever the buffer flushes, the mean hue is sent to
//! the selected lights. Everything runs sequentially on one task.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::{ControllerError, Light, LightController};
use crate::capture::{CaptureError, FrameSource};
use crate::color;
use crate::smoothing::SampleBuffer;
use crate::HueSample;

/// Which of the bridge's lights receive the hue
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum LightSelection {
    /// Every light on the bridge
    All,
    /// Every light except the first one enumerated (lowest bridge id).
    ///
    /// The Python huetv script looped over ids `1..len(lights)`, which on a
    /// bridge with ids 1..n leaves out the highest id instead. Use `all` if
    /// the two differ on your setup.
    #[default]
    SkipFirst,
}

impl LightSelection {
    pub fn select<'a>(&self, lights: &'a [Light]) -> &'a [Light] {
        match self {
            LightSelection::All => lights,
            LightSelection::SkipFirst => lights.get(1..).unwrap_or(&[]),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LightSelection::All => "all",
            LightSelection::SkipFirst => "skip-first",
        }
    }
}

impl std::fmt::Display for LightSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loop parameters
#[derive(Debug, Clone)]
pub struct Settings {
    /// Frames are shrunk to `image_size` x `image_size` before extraction
    pub image_size: u32,
    /// Samples averaged per light update
    pub buffer_size: usize,
    pub lights: LightSelection,
    /// Extra attempts for transient bridge failures
    pub retries: u32,
    pub retry_delay: Duration,
    /// Minimum time between two frames
    pub frame_interval: Duration,
    /// How long the light list is reused before it is fetched again
    pub light_refresh: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            image_size: 100,
            buffer_size: 5,
            lights: LightSelection::default(),
            retries: 2,
            retry_delay: Duration::from_millis(500),
            frame_interval: Duration::from_millis(33),
            light_refresh: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("light controller failed: {0}")]
    Controller(#[from] ControllerError),
}

pub struct Coordinator<S, C> {
    source: S,
    controller: C,
    buffer: SampleBuffer,
    settings: Settings,
    last_refresh: Option<Instant>,
}

impl<S: FrameSource, C: LightController> Coordinator<S, C> {
    pub fn new(source: S, controller: C, settings: Settings) -> Self {
        Self {
            source,
            controller,
            buffer: SampleBuffer::new(settings.buffer_size),
            settings,
            last_refresh: None,
        }
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    /// One sample cycle. Returns the hue sent to the lights, if the buffer
    /// flushed on this step.
    pub async fn step(&mut self) -> Result<Option<HueSample>, CoordinatorError> {
        let frame = self.source.capture()?;

        let Some(sample) = color::extract(&frame, self.settings.image_size) else {
            debug!("Frame produced no pixels, skipping");
            return Ok(None);
        };
        debug!(sample, buffered = self.buffer.len() + 1, "Hue sample");

        let Some(mean) = self.buffer.push(sample) else {
            return Ok(None);
        };

        let applied = self.apply(mean).await?;
        info!(hue = mean, lights = applied, "Applied mean hue");
        Ok(Some(mean))
    }

    /// Send `hue` to every selected light. Returns how many were updated.
    ///
    /// The light list is fetched on the first call, then again once
    /// `light_refresh` has passed or a light turned out to be gone.
    pub async fn apply(&mut self, hue: HueSample) -> Result<usize, CoordinatorError> {
        let stale = self
            .last_refresh
            .map_or(true, |at| at.elapsed() >= self.settings.light_refresh);
        if stale {
            self.refresh_lights().await?;
            self.last_refresh = Some(Instant::now());
        }

        let targets = self
            .settings
            .lights
            .select(self.controller.lights())
            .to_vec();
        let mut updated = 0;
        for light in &targets {
            match self.set_hue(light, hue).await {
                Ok(()) => updated += 1,
                Err(e) if e.is_missing_resource() => {
                    warn!("Light {} ({}) is gone: {}", light.id, light.name, e);
                    self.last_refresh = None;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(updated)
    }

    /// Loop until `shutdown` fires or a step fails. Steps start at most
    /// once per `frame_interval`.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), CoordinatorError> {
        info!(
            image_size = self.settings.image_size,
            buffer_size = self.buffer.capacity(),
            lights = %self.settings.lights,
            frame_interval = ?self.settings.frame_interval,
            "Starting control loop"
        );

        // tokio's interval panics on a zero period
        let period = self.settings.frame_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.step() => {
                    result?;
                }
            }
        }

        info!("Control loop stopping");
        Ok(())
    }

    async fn refresh_lights(&mut self) -> Result<(), ControllerError> {
        let mut attempt = 0;
        loop {
            match self.controller.fetch_state().await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.settings.retries => {
                    attempt += 1;
                    warn!("Fetching lights failed ({}), retry {}/{}", e, attempt, self.settings.retries);
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn set_hue(&self, light: &Light, hue: HueSample) -> Result<(), ControllerError> {
        let mut attempt = 0;
        loop {
            match self.controller.set_light(&light.id, "hue", json!(hue)).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.settings.retries => {
                    attempt += 1;
                    warn!(
                        "Setting hue on light {} ({}) failed ({}), retry {}/{}",
                        light.id, light.name, e, attempt, self.settings.retries
                    );
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
