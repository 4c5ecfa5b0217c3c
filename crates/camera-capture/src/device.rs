//! Camera device seam
//!
//! The recorder never talks to a driver directly. A `CameraProvider` opens a
//! `CameraDevice` for a config; the device hands out decoded RGB frames.

use std::time::{Duration, Instant};

use crate::{CameraConfig, CameraError, VideoFrame};

/// An opened camera
pub trait CameraDevice: Send {
    /// Block until the next frame is available and return it
    fn read_frame(&mut self) -> Result<VideoFrame, CameraError>;
}

/// Opens camera devices
pub trait CameraProvider: Send + Sync {
    /// Open the device described by `config`
    fn open(&self, config: &CameraConfig) -> Result<Box<dyn CameraDevice>, CameraError>;
}

/// Provider for a backend that was compiled out
#[derive(Debug, Clone)]
pub struct UnsupportedProvider {
    pub reason: String,
}

impl CameraProvider for UnsupportedProvider {
    fn open(&self, config: &CameraConfig) -> Result<Box<dyn CameraDevice>, CameraError> {
        Err(CameraError::DeviceUnavailable {
            index: config.index,
            reason: self.reason.clone(),
        })
    }
}

/// Provider for the synthetic test pattern
#[derive(Debug, Clone, Default)]
pub struct TestPatternProvider {
    /// Generate frames as fast as they are read instead of at the configured fps
    pub unpaced: bool,
}

impl CameraProvider for TestPatternProvider {
    fn open(&self, config: &CameraConfig) -> Result<Box<dyn CameraDevice>, CameraError> {
        let (width, height) = config.dimensions();
        let period = if self.unpaced || config.fps <= 0.0 {
            None
        } else {
            Duration::try_from_secs_f64(1.0 / config.fps).ok()
        };
        Ok(Box::new(TestPatternCamera::new(width, height, period)))
    }
}

/// Moving colour-bar pattern standing in for a real camera
pub struct TestPatternCamera {
    width: u32,
    height: u32,
    period: Option<Duration>,
    sequence: u32,
    opened_at: Instant,
    last_frame: Option<Instant>,
}

impl TestPatternCamera {
    /// Create a pattern camera; `period` paces reads like a real device
    pub fn new(width: u32, height: u32, period: Option<Duration>) -> Self {
        Self {
            width,
            height,
            period,
            sequence: 0,
            opened_at: Instant::now(),
            last_frame: None,
        }
    }

    fn render(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity((self.width * self.height * 3) as usize);
        let width = self.width.max(1);
        let shift = self.sequence.wrapping_mul(4) % width;
        for y in 0..self.height {
            for x in 0..self.width {
                let bar = ((x + shift) % width) * 8 / width;
                let r = if bar & 1 != 0 { 255 } else { 0 };
                let g = if bar & 2 != 0 { 255 } else { 0 };
                let b = if bar & 4 != 0 { 255 } else { 0 };
                let shade = (y * 255 / self.height.max(1)) as u8;
                data.extend_from_slice(&[r.min(shade.saturating_add(64)), g, b]);
            }
        }
        data
    }
}

impl CameraDevice for TestPatternCamera {
    fn read_frame(&mut self) -> Result<VideoFrame, CameraError> {
        if let (Some(period), Some(last)) = (self.period, self.last_frame) {
            let elapsed = last.elapsed();
            if elapsed < period {
                std::thread::sleep(period - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());

        let frame = VideoFrame::new(
            self.render(),
            self.width,
            self.height,
            self.opened_at.elapsed().as_nanos() as u64,
            self.sequence,
        );
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }
}
