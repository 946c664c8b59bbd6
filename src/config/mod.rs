//! Configuration management
//!
//! Layers, lowest to highest priority: built-in defaults, an optional
//! config file, `HUETV_*` environment variables, command line flags.

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::coordinator::{self, LightSelection};
use crate::discovery::{DiscoverySettings, SSDP_GROUP, SSDP_PORT};

/// HueTv projects the most common webcam color onto the Philips Hue lights.
#[derive(Debug, Default, Parser)]
#[command(name = "huetv", version, about)]
pub struct Cli {
    /// Resize the captured image to this size before analysis. Lower is
    /// faster [default: 100]
    #[arg(short = 'i', long = "image-size")]
    pub image_size: Option<u32>,

    /// Webcam index, use 1 for the second camera [default: 0]
    #[arg(short = 'w', long)]
    pub webcam: Option<i32>,

    /// Number of frames averaged per light update. Lower reacts faster
    /// [default: 5]
    #[arg(short = 'b', long = "buffer-size", alias = "buffer_size")]
    pub buffer_size: Option<u32>,

    /// Bridge IPv4 address. Discovered on the LAN when omitted
    #[arg(short = 'p', long = "bridge-ip")]
    pub bridge_ip: Option<Ipv4Addr>,

    /// Bridge username. A new one is registered when omitted
    #[arg(short = 'u', long)]
    pub username: Option<String>,

    /// Which lights follow the screen [default: skip-first]
    #[arg(long, value_enum)]
    pub lights: Option<LightSelection>,

    /// Seconds to wait for a bridge announcement per attempt, 0 waits
    /// forever [default: 30]
    #[arg(long = "discovery-timeout")]
    pub discovery_timeout: Option<u64>,

    /// Discovery attempts before giving up [default: 3]
    #[arg(long = "discovery-attempts")]
    pub discovery_attempts: Option<u32>,

    /// Analyse this image file instead of a webcam
    #[arg(long = "frame-file")]
    pub frame_file: Option<PathBuf>,

    /// Minimum milliseconds between two frames [default: 33]
    #[arg(long = "frame-interval")]
    pub frame_interval: Option<u64>,

    /// Config file (TOML, YAML or JSON)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_image_size")]
    pub image_size: u32,

    #[serde(default)]
    pub webcam: i32,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default)]
    pub frame_file: Option<PathBuf>,

    /// Minimum time between frames, keeps still images from flooding the bridge
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

fn default_image_size() -> u32 {
    100
}

fn default_buffer_size() -> usize {
    5
}

fn default_frame_interval_ms() -> u64 {
    33
}

#[derive(Debug, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub ip: Option<Ipv4Addr>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub lights: LightSelection,

    /// Registration attempts while waiting for the link button
    #[serde(default = "default_link_attempts")]
    pub link_attempts: u32,

    #[serde(default = "default_link_interval_secs")]
    pub link_interval_secs: u64,

    /// Extra attempts for transient request failures
    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Seconds before the light list is fetched again
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ip: None,
            username: None,
            lights: LightSelection::default(),
            link_attempts: default_link_attempts(),
            link_interval_secs: default_link_interval_secs(),
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            refresh_secs: default_refresh_secs(),
        }
    }
}

fn default_link_attempts() -> u32 {
    6
}

fn default_link_interval_secs() -> u64 {
    5
}

fn default_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_refresh_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize)]
pub struct DiscoveryConfig {
    /// Per-attempt wait in seconds, 0 waits forever
    #[serde(default = "default_discovery_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_discovery_attempts")]
    pub attempts: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_discovery_timeout_secs(),
            attempts: default_discovery_attempts(),
        }
    }
}

fn default_discovery_timeout_secs() -> u64 {
    30
}

fn default_discovery_attempts() -> u32 {
    3
}

impl Config {
    /// Reject values the loop can't work with.
    pub fn validate(&self) -> Result<()> {
        if self.image_size == 0 {
            bail!("image_size must be at least 1");
        }
        if self.buffer_size == 0 {
            bail!("buffer_size must be at least 1");
        }
        if self.discovery.attempts == 0 {
            bail!("discovery.attempts must be at least 1");
        }
        if self.bridge.link_attempts == 0 {
            bail!("bridge.link_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn discovery_settings(&self) -> DiscoverySettings {
        DiscoverySettings {
            group: SSDP_GROUP,
            port: SSDP_PORT,
            timeout: match self.discovery.timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            attempts: self.discovery.attempts,
        }
    }

    pub fn coordinator_settings(&self) -> coordinator::Settings {
        coordinator::Settings {
            image_size: self.image_size,
            buffer_size: self.buffer_size,
            lights: self.bridge.lights,
            retries: self.bridge.retries,
            retry_delay: Duration::from_millis(self.bridge.retry_delay_ms),
            frame_interval: Duration::from_millis(self.frame_interval_ms),
            light_refresh: Duration::from_secs(self.bridge.refresh_secs),
        }
    }

    pub fn link_interval(&self) -> Duration {
        Duration::from_secs(self.bridge.link_interval_secs)
    }
}

/// Platform config directory (e.g. `~/.config/huetv` on Linux)
pub fn get_config_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "huetv")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn load_config(cli: &Cli) -> Result<Config> {
    let file = match &cli.config {
        // An explicitly named file has to exist
        Some(path) => ::config::File::from(path.as_path()).required(true),
        None => ::config::File::with_name(&get_config_dir().join("config").to_string_lossy())
            .required(false),
    };

    let config = ::config::Config::builder()
        // Start with defaults
        .set_default("image_size", i64::from(default_image_size()))?
        .set_default("buffer_size", default_buffer_size() as i64)?
        // Load from config file if it exists
        .add_source(file)
        // Override with environment variables (HUETV_BUFFER_SIZE, HUETV_BRIDGE__USERNAME, etc.)
        .add_source(
            ::config::Environment::with_prefix("HUETV")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        // Command line flags win
        .set_override_option("image_size", cli.image_size.map(i64::from))?
        .set_override_option("webcam", cli.webcam.map(i64::from))?
        .set_override_option("buffer_size", cli.buffer_size.map(i64::from))?
        .set_override_option("bridge.ip", cli.bridge_ip.map(|ip| ip.to_string()))?
        .set_override_option("bridge.username", cli.username.clone())?
        .set_override_option("bridge.lights", cli.lights.map(|l| l.as_str().to_string()))?
        .set_override_option("discovery.timeout_secs", cli.discovery_timeout.map(|s| s as i64))?
        .set_override_option("discovery.attempts", cli.discovery_attempts.map(i64::from))?
        .set_override_option(
            "frame_file",
            cli.frame_file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        )?
        .set_override_option("frame_interval_ms", cli.frame_interval.map(|ms| ms as i64))?
        .build()
        .context("failed to read configuration")?;

    let config: Config = config
        .try_deserialize()
        .context("invalid configuration")?;
    config.validate()?;
    Ok(config)
}
