pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod utils;

use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use capture::{CaptureThread, Frame, PixelFormat};
pub use error::{DecodeError, DeviceError, SetupError};
pub use pipeline::{frame_handoff, FrameReader, FrameWriter};

/// Active configuration, swapped in once startup has resolved it
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Environment variables with this prefix override file settings,
/// e.g. `CAMVIEW__CAPTURE__WIDTH=1280`
pub const ENV_PREFIX: &str = "CAMVIEW";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device node, or `auto` to probe for an MJPEG camera
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Channel order of decoded frames
    pub pixel_format: PixelFormat,
    pub buffer_count: u32,
    /// Upper bound on one device wait, and so on stop latency
    pub wait_timeout_ms: u64,
    /// Pause after stream-on before the first dequeue
    pub settle_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub title: String,
    /// Sleep between event loop iterations
    pub poll_interval_ms: u64,
    /// How long to wait for the first frame before giving up
    pub first_frame_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
            pixel_format: PixelFormat::Rgb24,
            buffer_count: 2,
            wait_timeout_ms: 2000,
            settle_ms: 1000,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            title: "Webcam".into(),
            poll_interval_ms: 1,
            first_frame_timeout_ms: 10_000,
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `CAMVIEW__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
