//! Single shared frame slot
//!
//! The capture thread publishes whole frames; the encoder loop takes a handle
//! to whatever is current. Publishing swaps an `Arc`, so a reader holds either
//! the previous frame or the new one, never a partial write.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::VideoFrame;

/// Last-writer-wins handoff between capture and encode
#[derive(Debug, Default, Clone)]
pub struct FrameSlot {
    inner: Arc<Mutex<Option<Arc<VideoFrame>>>>,
}

impl FrameSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame
    pub fn publish(&self, frame: VideoFrame) {
        let frame = Arc::new(frame);
        *self.lock() = Some(frame);
    }

    /// Most recently published frame, if any
    pub fn latest(&self) -> Option<Arc<VideoFrame>> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<VideoFrame>>> {
        // A panicked writer cannot leave a half-swapped Option behind
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
