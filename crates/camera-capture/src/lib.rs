//! Camera Capture Library for the Dashcam Recorder
//!
//! Provides the capture half of the recorder:
//! - `CameraDevice` / `CameraProvider` seam over the physical camera
//! - `FrameSource` background capture loop feeding a single shared slot
//! - `FrameSlot` last-writer-wins handoff to the encoder loop
//! - Power-off overlay for frames written during the shutdown countdown

pub mod device;
pub mod frame;
pub mod overlay;
pub mod slot;
pub mod source;
#[cfg(feature = "v4l")]
pub mod v4l2;

pub use device::{CameraDevice, CameraProvider, TestPatternCamera, TestPatternProvider};
pub use frame::VideoFrame;
pub use overlay::annotate_power_off;
pub use slot::FrameSlot;
pub use source::FrameSource;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Camera {index} unavailable: {reason}")]
    DeviceUnavailable { index: u32, reason: String },

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Frame read failed: {0}")]
    FrameRead(String),

    #[error("Capture thread failed to start: {0}")]
    Thread(String),

    #[error("No frame captured yet")]
    NoFrame,
}

/// Standard capture resolutions, addressed by tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    P480,
    #[default]
    P720,
    P1080,
    K4,
    /// Explicit "WIDTHxHEIGHT" tag
    Custom(u32, u32),
}

impl Resolution {
    /// Resolve a tag such as "720p" or "800x600"; unknown tags fall back to 480p
    pub fn from_tag(tag: &str) -> Self {
        let tag = tag.trim().to_ascii_lowercase();
        match tag.as_str() {
            "480p" => Resolution::P480,
            "720p" => Resolution::P720,
            "1080p" => Resolution::P1080,
            "4k" => Resolution::K4,
            other => Self::parse_custom(other).unwrap_or(Resolution::P480),
        }
    }

    fn parse_custom(tag: &str) -> Option<Self> {
        let (w, h) = tag.split_once('x')?;
        let (w, h) = (w.parse().ok()?, h.parse().ok()?);
        (w > 0 && h > 0).then_some(Resolution::Custom(w, h))
    }

    /// Frame dimensions (width, height)
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Resolution::P480 => (640, 480),
            Resolution::P720 => (1280, 720),
            Resolution::P1080 => (1920, 1080),
            Resolution::K4 => (3840, 2160),
            Resolution::Custom(w, h) => (w, h),
        }
    }
}

/// Which driver backs the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CameraBackend {
    /// V4L2 device `/dev/video<index>`
    #[default]
    V4l,
    /// Synthetic moving test pattern, for bench runs
    TestPattern,
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device index (0 = first camera)
    pub index: u32,
    /// Driver backend
    pub backend: CameraBackend,
    /// Target FPS, also the encoder frame rate
    pub fps: f64,
    /// Resolution tag ("480p", "720p", "1080p", "4k")
    pub resolution: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            backend: CameraBackend::V4l,
            // Sustained rate of the Raspberry Pi encoder
            fps: 8.4,
            resolution: "720p".to_string(),
        }
    }
}

impl CameraConfig {
    /// Resolved capture resolution
    pub fn resolution(&self) -> Resolution {
        Resolution::from_tag(&self.resolution)
    }

    /// Capture dimensions (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.resolution().dimensions()
    }
}

/// Build the provider selected by `config.backend`
pub fn provider_for(config: &CameraConfig) -> Arc<dyn CameraProvider> {
    match config.backend {
        #[cfg(feature = "v4l")]
        CameraBackend::V4l => Arc::new(v4l2::V4l2Provider),
        #[cfg(not(feature = "v4l"))]
        CameraBackend::V4l => Arc::new(device::UnsupportedProvider {
            reason: "built without the `v4l` feature".to_string(),
        }),
        CameraBackend::TestPattern => Arc::new(TestPatternProvider::default()),
    }
}
