//! Container and codec selection

use std::fmt;
use std::path::Path;

use crate::SinkError;

/// Four-character codec code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const MJPG: FourCc = FourCc(*b"MJPG");
    pub const DIVX: FourCc = FourCc(*b"DIVX");
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Recording container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// RIFF AVI
    Avi,
    /// Raw concatenated JPEG frames
    Mjpeg,
    /// ISO base media (no encoder available)
    Mp4,
}

/// A container/codec pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub container: Container,
    pub codec: FourCc,
}

impl VideoFormat {
    /// Motion-JPEG in AVI; plays everywhere and is always available
    pub const BASELINE: VideoFormat = VideoFormat {
        container: Container::Avi,
        codec: FourCc::MJPG,
    };

    /// Validate a pairing
    pub fn new(container: Container, codec: FourCc) -> Result<Self, SinkError> {
        match (container, codec) {
            (Container::Avi, FourCc::MJPG) | (Container::Mjpeg, FourCc::MJPG) => {
                Ok(Self { container, codec })
            }
            _ => Err(SinkError::UnsupportedFormat(format!(
                "{:?}/{}",
                container, codec
            ))),
        }
    }

    /// Format for a file extension (without the dot, any case)
    pub fn from_extension(ext: &str) -> Result<Self, SinkError> {
        match ext.to_ascii_lowercase().as_str() {
            "avi" => Self::new(Container::Avi, FourCc::MJPG),
            "mjpeg" | "mjpg" => Self::new(Container::Mjpeg, FourCc::MJPG),
            "mp4" => Self::new(Container::Mp4, FourCc::DIVX),
            other => Err(SinkError::UnsupportedFormat(format!(
                "unknown extension {:?}",
                other
            ))),
        }
    }

    /// Format implied by a path's extension
    pub fn for_path(path: &Path) -> Result<Self, SinkError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| SinkError::UnsupportedFormat(format!("{} has no extension", path.display())))?;
        Self::from_extension(ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_table() {
        assert_eq!(VideoFormat::from_extension("avi").unwrap(), VideoFormat::BASELINE);
        assert_eq!(VideoFormat::from_extension("AVI").unwrap(), VideoFormat::BASELINE);
        assert_eq!(
            VideoFormat::from_extension("mjpg").unwrap().container,
            Container::Mjpeg
        );
    }

    #[test]
    fn test_unsupported_pairings() {
        assert!(matches!(
            VideoFormat::from_extension("mp4"),
            Err(SinkError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            VideoFormat::from_extension("mkv"),
            Err(SinkError::UnsupportedFormat(_))
        ));
        assert!(VideoFormat::new(Container::Avi, FourCc::DIVX).is_err());
    }

    #[test]
    fn test_for_path_without_extension() {
        assert!(VideoFormat::for_path(Path::new("/tmp/recording")).is_err());
        assert_eq!(
            VideoFormat::for_path(Path::new("/tmp/01-02-2025_10-00-00.avi")).unwrap(),
            VideoFormat::BASELINE
        );
    }

    #[test]
    fn test_fourcc_display() {
        assert_eq!(FourCc::MJPG.to_string(), "MJPG");
    }
}
