//! Recording File Writer
//!
//! `FrameSink` owns the active recording file. Frames are JPEG-compressed and
//! pushed into a GStreamer pipeline whose container is chosen from the file
//! extension:
//! - `.avi` → Motion-JPEG muxed by `avimux` (baseline)
//! - `.mjpeg` / `.mjpg` → raw concatenated JPEG stream
//!
//! Anything else is reported as `UnsupportedFormat`; `FrameSink::open` then
//! falls back to the baseline format.

mod format;
mod pipeline;
mod sink;

pub use format::{Container, FourCc, VideoFormat};
pub use sink::{FrameSink, SinkSettings, SinkSummary};

use std::path::PathBuf;

use gstreamer as gst;
use thiserror::Error;

/// Frame sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Frame encoding failed: {0}")]
    Encode(String),

    #[error("GStreamer error: {0}")]
    Gst(#[from] gst::glib::Error),

    #[error("GStreamer state error: {0}")]
    StateChange(#[from] gst::StateChangeError),

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl SinkError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SinkError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the recording can take no further frames.
    ///
    /// A rejected frame leaves the file usable; anything else means the
    /// pipeline or the file behind it is gone.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SinkError::Encode(_) | SinkError::UnsupportedFormat(_))
    }
}

/// Appends compressed frames to a container file
pub(crate) trait ContainerWriter: Send {
    /// Append one JPEG-compressed frame
    fn write_frame(&mut self, jpeg: &[u8]) -> Result<(), SinkError>;

    /// Write trailers, flush and sync. Returns the final file size.
    fn finish(self: Box<Self>) -> Result<u64, SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(!SinkError::Encode("short frame".into()).is_fatal());
        assert!(!SinkError::UnsupportedFormat("mkv".into()).is_fatal());
        assert!(SinkError::Pipeline("avimux: not-linked".into()).is_fatal());
        assert!(SinkError::io("/tmp/x.avi", std::io::ErrorKind::StorageFull.into()).is_fatal());
    }
}
