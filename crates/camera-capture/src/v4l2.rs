//! V4L2 camera backend (MJPG capture decoded to RGB)

use std::time::{Duration, Instant};

use tracing::{debug, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::frame::decode_mjpeg;
use crate::{CameraConfig, CameraDevice, CameraError, CameraProvider, VideoFrame};

const BUFFER_COUNT: u32 = 4;
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens `/dev/video<index>`
#[derive(Debug, Clone, Copy, Default)]
pub struct V4l2Provider;

impl CameraProvider for V4l2Provider {
    fn open(&self, config: &CameraConfig) -> Result<Box<dyn CameraDevice>, CameraError> {
        V4l2Camera::open(config).map(|c| Box::new(c) as Box<dyn CameraDevice>)
    }
}

/// Streaming V4L2 capture
pub struct V4l2Camera {
    _device: Device,
    stream: Stream<'static>,
    opened_at: Instant,
}

impl V4l2Camera {
    /// Open the device and negotiate MJPG at the configured resolution
    pub fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        let unavailable = |e: std::io::Error| CameraError::DeviceUnavailable {
            index: config.index,
            reason: e.to_string(),
        };

        let device = Device::new(config.index as usize).map_err(unavailable)?;

        let (width, height) = config.dimensions();
        let mut fmt = device.format().map_err(unavailable)?;
        fmt.width = width;
        fmt.height = height;
        fmt.fourcc = FourCC::new(b"MJPG");
        let fmt = device.set_format(&fmt).map_err(unavailable)?;
        if fmt.fourcc != FourCC::new(b"MJPG") {
            return Err(CameraError::Format(format!(
                "camera {} does not offer MJPG (got {})",
                config.index, fmt.fourcc
            )));
        }
        if (fmt.width, fmt.height) != (width, height) {
            warn!(
                "Camera {} negotiated {}x{} instead of {}x{}",
                config.index, fmt.width, fmt.height, width, height
            );
        }

        let fps = config.fps.round().max(1.0) as u32;
        if let Err(e) = device.set_params(&Parameters::with_fps(fps)) {
            debug!("Camera {} rejected {} fps: {}", config.index, fps, e);
        }

        let mut stream =
            Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT).map_err(unavailable)?;
        stream.set_timeout(READ_TIMEOUT);

        Ok(Self {
            _device: device,
            stream,
            opened_at: Instant::now(),
        })
    }
}

impl CameraDevice for V4l2Camera {
    fn read_frame(&mut self) -> Result<VideoFrame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::FrameRead(e.to_string()))?;
        let used = (meta.bytesused as usize).min(buf.len());

        let mut frame =
            decode_mjpeg(&buf[..used]).map_err(|e| CameraError::FrameRead(e.to_string()))?;
        frame.sequence = meta.sequence;
        frame.timestamp_ns = self.opened_at.elapsed().as_nanos() as u64;
        Ok(frame)
    }
}
