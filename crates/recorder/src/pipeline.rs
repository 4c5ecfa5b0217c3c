//! GStreamer container writer
//!
//! `appsrc ! [avimux] ! filesink`: JPEG buffers are pushed with
//! presentation timestamps derived from the nominal frame rate. The raw MJPEG
//! container skips the muxer, so the file is the JPEG images back to back.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use tracing::{debug, warn};

use crate::{Container, ContainerWriter, SinkError};

/// How long `finish` waits for end-of-stream to reach the file sink
const EOS_TIMEOUT_SECS: u64 = 5;

pub(crate) struct PipelineWriter {
    path: PathBuf,
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    bus: gst::Bus,
    frame_ns: u64,
    frames: u64,
}

impl PipelineWriter {
    pub(crate) fn create(
        path: &Path,
        container: Container,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Self, SinkError> {
        gst::init()?;

        let muxer = match container {
            Container::Avi => Some("avimux"),
            Container::Mjpeg => None,
            Container::Mp4 => {
                return Err(SinkError::UnsupportedFormat(format!(
                    "no muxer for {:?}",
                    container
                )))
            }
        };

        let caps = gst::Caps::builder("image/jpeg")
            .field("width", width as i32)
            .field("height", height as i32)
            .field("framerate", frame_rate(fps))
            .build();

        let appsrc = gst_app::AppSrc::builder()
            .name("frames")
            .caps(&caps)
            .format(gst::Format::Time)
            .build();

        let muxer = muxer
            .map(|factory| {
                gst::ElementFactory::make(factory)
                    .build()
                    .map_err(|e| SinkError::Pipeline(format!("Failed to create {}: {}", factory, e)))
            })
            .transpose()?;

        let filesink = gst::ElementFactory::make("filesink")
            .property("location", path.to_string_lossy().to_string())
            .build()
            .map_err(|e| SinkError::Pipeline(format!("Failed to create filesink: {}", e)))?;

        let mut chain: Vec<&gst::Element> = vec![appsrc.upcast_ref()];
        chain.extend(muxer.as_ref());
        chain.push(&filesink);

        let pipeline = gst::Pipeline::new();
        pipeline
            .add_many(chain.iter().copied())
            .map_err(|e| SinkError::Pipeline(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many(chain.iter().copied())
            .map_err(|e| SinkError::Pipeline(format!("Failed to link elements: {}", e)))?;

        let bus = pipeline
            .bus()
            .ok_or_else(|| SinkError::Pipeline("pipeline has no bus".to_string()))?;

        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            let _ = pipeline.set_state(gst::State::Null);
            let detail = bus
                .pop_filtered(&[gst::MessageType::Error])
                .and_then(|msg| match msg.view() {
                    gst::MessageView::Error(err) => Some(err.error().to_string()),
                    _ => None,
                });
            return match detail {
                Some(detail) => Err(SinkError::Pipeline(format!(
                    "Failed to start {}: {}",
                    path.display(),
                    detail
                ))),
                None => Err(e.into()),
            };
        }
        debug!("Writer pipeline for {} started", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            pipeline,
            appsrc,
            bus,
            frame_ns: (1e9 / fps).round() as u64,
            frames: 0,
        })
    }

    /// Surface an error the streaming thread posted since the last call
    fn check_bus(&self) -> Result<(), SinkError> {
        match self.bus.pop_filtered(&[gst::MessageType::Error]) {
            Some(msg) => match msg.view() {
                gst::MessageView::Error(err) => Err(SinkError::Pipeline(format!(
                    "{}: {} ({:?})",
                    self.path.display(),
                    err.error(),
                    err.debug()
                ))),
                _ => Ok(()),
            },
            None => Ok(()),
        }
    }
}

impl ContainerWriter for PipelineWriter {
    fn write_frame(&mut self, jpeg: &[u8]) -> Result<(), SinkError> {
        self.check_bus()?;

        let mut buffer = gst::Buffer::from_slice(jpeg.to_vec());
        if let Some(buffer_ref) = buffer.get_mut() {
            buffer_ref.set_pts(gst::ClockTime::from_nseconds(self.frames * self.frame_ns));
            buffer_ref.set_duration(gst::ClockTime::from_nseconds(self.frame_ns));
        }

        self.appsrc.push_buffer(buffer).map_err(|flow| {
            SinkError::Pipeline(format!(
                "{} refused frame {}: {:?}",
                self.path.display(),
                self.frames,
                flow
            ))
        })?;
        self.frames += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<u64, SinkError> {
        if let Err(e) = self.appsrc.end_of_stream() {
            warn!("Failed to send EOS to {}: {:?}", self.path.display(), e);
        }

        let outcome = match self.bus.timed_pop_filtered(
            gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS),
            &[gst::MessageType::Eos, gst::MessageType::Error],
        ) {
            Some(msg) => match msg.view() {
                gst::MessageView::Error(err) => Err(SinkError::Pipeline(format!(
                    "{}: {} ({:?})",
                    self.path.display(),
                    err.error(),
                    err.debug()
                ))),
                _ => Ok(()),
            },
            None => Err(SinkError::Pipeline(format!(
                "{}: no end-of-stream after {}s",
                self.path.display(),
                EOS_TIMEOUT_SECS
            ))),
        };

        // The sink closes its file on the way to NULL
        self.pipeline.set_state(gst::State::Null)?;
        outcome?;

        File::open(&self.path)
            .and_then(|file| file.sync_all())
            .map_err(|e| SinkError::io(&self.path, e))?;
        let bytes = fs::metadata(&self.path)
            .map_err(|e| SinkError::io(&self.path, e))?
            .len();
        Ok(bytes)
    }
}

impl Drop for PipelineWriter {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

/// Nominal rate as a fraction with millihertz precision
fn frame_rate(fps: f64) -> gst::Fraction {
    gst::Fraction::new((fps * 1000.0).round() as i32, 1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::ExtendedColorType;
    use tempfile::TempDir;

    fn jpeg(shade: u8) -> Vec<u8> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 80)
            .encode(&[shade; 16 * 8 * 3], 16, 8, ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    #[test]
    fn test_frame_rate_fraction() {
        assert_eq!(frame_rate(8.4), gst::Fraction::new(8400, 1000));
        assert_eq!(frame_rate(30.0), gst::Fraction::new(30000, 1000));
    }

    #[test]
    fn test_avi_pipeline_writes_riff_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.avi");
        let mut writer = Box::new(PipelineWriter::create(&path, Container::Avi, 16, 8, 10.0).unwrap());
        for shade in [10, 120, 240] {
            writer.write_frame(&jpeg(shade)).unwrap();
        }
        let len = writer.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len() as u64, len);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"AVI ");
        assert!(bytes.windows(4).any(|w| w == b"00dc"));
    }

    #[test]
    fn test_mjpeg_pipeline_is_concatenated_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.mjpeg");
        let frames = [jpeg(30), jpeg(200)];
        let mut writer =
            Box::new(PipelineWriter::create(&path, Container::Mjpeg, 16, 8, 8.4).unwrap());
        for frame in &frames {
            writer.write_frame(frame).unwrap();
        }
        writer.finish().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), frames.concat());
    }

    #[test]
    fn test_unwritable_location_fails_to_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("clip.avi");
        assert!(PipelineWriter::create(&path, Container::Avi, 16, 8, 10.0).is_err());
    }

    #[test]
    fn test_mp4_has_no_muxer() {
        let dir = TempDir::new().unwrap();
        let result = PipelineWriter::create(&dir.path().join("clip.mp4"), Container::Mp4, 16, 8, 10.0);
        assert!(matches!(result, Err(SinkError::UnsupportedFormat(_))));
    }
}
