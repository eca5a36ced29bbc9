pub mod capture;
pub mod consent;
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod pose;
pub mod server;
pub mod transport;

use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use capture::Frame;
pub use error::{Result, StreamError};
use pipeline::RadialCamera;

/// Global configuration that can be atomically swapped at runtime
///
/// Sessions take a snapshot when they start, so a swap only affects the
/// next connection.
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sensor: SensorConfig,
    pub encoder: EncoderConfig,
    pub pipeline: PipelineConfig,
    pub pose: PoseConfig,
    pub consent: ConsentConfig,
}

impl Config {
    /// Load defaults, then an optional TOML file, then `HERMES__*` environment overrides.
    pub fn load(path: Option<&Path>) -> std::result::Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(
                config::Environment::with_prefix("HERMES")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Socket send timeout; a stalled peer fails the send instead of hanging it
    pub write_timeout_ms: u64,
    pub nodelay: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Synthetic,
    V4l2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub source: SourceKind,
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub buffer_count: u32,
    /// Host timestamp counter frequency in Hz
    pub tick_frequency: u64,
    /// Tracking clock reading at host tick zero, in 100 ns units
    pub tracking_offset: i64,
    pub camera: RadialCamera,
    /// Sensor-to-rig transform, row-major
    pub extrinsics: [f32; 16],
    /// Stop synthetic capture after this many frames
    pub frame_limit: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderBackend {
    Passthrough,
    Gstreamer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub backend: EncoderBackend,
    /// Frames that may wait for the completion thread
    pub queue_depth: usize,
    /// How long a submission may wait for queue space before failing
    pub submit_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pin the acquisition thread to this core
    pub acquisition_core: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    /// Reported device pose when no tracker is attached, row-major
    pub world_from_device: [f32; 16],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentConfig {
    pub camera: bool,
}

const IDENTITY: [f32; 16] = pose::PoseMatrix::IDENTITY.0;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3800".into(),
            write_timeout_ms: 2_000,
            nodelay: true,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Synthetic,
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
            fps: 30,
            buffer_count: 4,
            tick_frequency: 10_000_000,
            tracking_offset: 0,
            camera: RadialCamera::default(),
            extrinsics: IDENTITY,
            frame_limit: None,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            backend: EncoderBackend::Passthrough,
            queue_depth: 8,
            submit_timeout_ms: 1_000,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            acquisition_core: None,
        }
    }
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            world_from_device: IDENTITY,
        }
    }
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self { camera: true }
    }
}
