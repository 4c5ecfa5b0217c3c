//! Frame sink: owns the encoder for the active recording

use std::path::{Path, PathBuf};

use camera_capture::{Resolution, VideoFrame};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::pipeline::PipelineWriter;
use crate::{ContainerWriter, SinkError, VideoFormat};

/// Encoder parameters for one recording
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SinkSettings {
    /// Nominal frame rate written into the container
    pub fps: f64,
    /// Output width; frames of another size are rescaled
    pub width: u32,
    /// Output height
    pub height: u32,
    /// JPEG quality (1-100)
    pub quality: u8,
}

impl SinkSettings {
    /// Settings for a resolution tag at `fps`
    pub fn new(fps: f64, resolution: Resolution) -> Self {
        let (width, height) = resolution.dimensions();
        Self {
            fps,
            width,
            height,
            quality: 80,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }
}

/// What a closed recording contains
#[derive(Debug, Clone, PartialEq)]
pub struct SinkSummary {
    pub path: PathBuf,
    pub format: VideoFormat,
    pub frames: u64,
    pub bytes: u64,
}

/// Writer for the active recording file
pub struct FrameSink {
    path: PathBuf,
    format: VideoFormat,
    settings: SinkSettings,
    writer: Box<dyn ContainerWriter>,
    frames: u64,
    jpeg: Vec<u8>,
}

impl FrameSink {
    /// Open `path`, choosing the format from its extension.
    ///
    /// An unrecognized extension falls back to `VideoFormat::BASELINE`.
    pub fn open(path: impl Into<PathBuf>, settings: SinkSettings) -> Result<Self, SinkError> {
        let path = path.into();
        let format = match VideoFormat::for_path(&path) {
            Ok(format) => format,
            Err(e) => {
                warn!("{}; recording {} as MJPG/AVI", e, path.display());
                VideoFormat::BASELINE
            }
        };
        Self::open_with_format(path, format, settings)
    }

    /// Open `path` with an explicit format
    pub fn open_with_format(
        path: impl Into<PathBuf>,
        format: VideoFormat,
        settings: SinkSettings,
    ) -> Result<Self, SinkError> {
        let path = path.into();
        let format = VideoFormat::new(format.container, format.codec)?;
        if !(settings.fps > 0.0) || settings.width == 0 || settings.height == 0 {
            return Err(SinkError::UnsupportedFormat(format!(
                "{}x{} @ {} fps",
                settings.width, settings.height, settings.fps
            )));
        }

        let writer: Box<dyn ContainerWriter> = Box::new(PipelineWriter::create(
            &path,
            format.container,
            settings.width,
            settings.height,
            settings.fps,
        )?);

        info!(
            "Recording to {} ({:?}/{}, {}x{} @ {} fps)",
            path.display(),
            format.container,
            format.codec,
            settings.width,
            settings.height,
            settings.fps
        );

        Ok(Self {
            path,
            format,
            settings,
            writer,
            frames: 0,
            jpeg: Vec::new(),
        })
    }

    /// Append a frame. Frames are written in call order.
    pub fn write(&mut self, frame: &VideoFrame) -> Result<(), SinkError> {
        if !frame.is_well_formed() {
            return Err(SinkError::Encode(format!(
                "frame {} has {} bytes for {}x{}",
                frame.sequence,
                frame.data.len(),
                frame.width,
                frame.height
            )));
        }

        let (width, height) = (self.settings.width, self.settings.height);
        let resized;
        let frame = if (frame.width, frame.height) != (width, height) {
            resized = frame.resize(width, height);
            &resized
        } else {
            frame
        };

        self.jpeg.clear();
        JpegEncoder::new_with_quality(&mut self.jpeg, self.settings.quality)
            .encode(&frame.data, width, height, ExtendedColorType::Rgb8)
            .map_err(|e| SinkError::Encode(e.to_string()))?;

        self.writer.write_frame(&self.jpeg)?;
        self.frames += 1;
        counter!("dashcam_frames_written_total").increment(1);
        Ok(())
    }

    /// Frames written since open
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Output path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Container/codec in use
    pub fn format(&self) -> VideoFormat {
        self.format
    }

    /// Flush and release the file. Consumes the sink, so it runs once per open.
    pub fn close(self) -> Result<SinkSummary, SinkError> {
        let bytes = self.writer.finish()?;
        debug!(
            "Closed {} after {} frames ({} bytes)",
            self.path.display(),
            self.frames,
            bytes
        );
        Ok(SinkSummary {
            path: self.path,
            format: self.format,
            frames: self.frames,
            bytes,
        })
    }
}
