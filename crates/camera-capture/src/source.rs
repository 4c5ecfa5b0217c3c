//! Background frame source
//!
//! Owns the camera device. Once started, a dedicated thread reads frames as
//! fast as the device delivers them and publishes each one to the shared
//! `FrameSlot`. Read failures are counted and otherwise ignored: readers keep
//! seeing the previous frame.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::{CameraConfig, CameraDevice, CameraError, CameraProvider, FrameSlot, VideoFrame};

/// Camera capture feeding a single shared slot
pub struct FrameSource {
    index: u32,
    slot: FrameSlot,
    /// Held until `start` moves it onto the capture thread
    device: Option<Box<dyn CameraDevice>>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    read_failures: Arc<AtomicU64>,
}

impl FrameSource {
    /// Open the camera described by `config`
    pub fn open(provider: &dyn CameraProvider, config: &CameraConfig) -> Result<Self, CameraError> {
        let device = provider.open(config)?;
        info!("Camera {} opened", config.index);

        Ok(Self {
            index: config.index,
            slot: FrameSlot::new(),
            device: Some(device),
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: None,
            read_failures: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Return the most recent frame.
    ///
    /// Before `start` this reads one frame from the device synchronously; once
    /// the capture thread runs it returns whatever that thread published last.
    pub fn capture(&mut self) -> Result<Arc<VideoFrame>, CameraError> {
        if let Some(device) = self.device.as_mut() {
            let frame = device.read_frame()?;
            self.slot.publish(frame);
        }
        self.slot.latest().ok_or(CameraError::NoFrame)
    }

    /// Spawn the capture thread. Calling it again while running is a no-op.
    pub fn start(&mut self) -> Result<(), CameraError> {
        let Some(mut device) = self.device.take() else {
            debug!("Frame source already started");
            return Ok(());
        };

        let slot = self.slot.clone();
        let shutdown = self.shutdown.clone();
        let failures = self.read_failures.clone();
        let index = self.index;

        let handle = std::thread::Builder::new()
            .name(format!("frame-source-{}", index))
            .spawn(move || {
                while !shutdown.load(Ordering::SeqCst) {
                    match device.read_frame() {
                        Ok(frame) => {
                            if shutdown.load(Ordering::SeqCst) {
                                break;
                            }
                            slot.publish(frame);
                        }
                        Err(e) => {
                            let count = failures.fetch_add(1, Ordering::Relaxed) + 1;
                            if count == 1 {
                                warn!("Camera {} read failed, reusing previous frame: {}", index, e);
                            } else {
                                debug!("Camera {} read failure #{}: {}", index, count, e);
                            }
                        }
                    }
                }
                // Device handle is released here, before `stop` returns
                drop(device);
                debug!("Frame source {} stopped", index);
            })
            .map_err(|e| CameraError::Thread(e.to_string()))?;

        self.worker = Some(handle);
        info!("Frame source {} started", index);
        Ok(())
    }

    /// Last published frame, without blocking on the device
    pub fn latest(&self) -> Option<Arc<VideoFrame>> {
        self.slot.latest()
    }

    /// Handle to the shared slot
    pub fn slot(&self) -> FrameSlot {
        self.slot.clone()
    }

    /// Stop capturing and release the device.
    ///
    /// Idempotent. When this returns the capture thread has exited and will
    /// not write to the slot again.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Frame source {} thread panicked", self.index);
            }
        }
        self.device = None;
    }

    /// Whether the capture thread is running
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Number of failed device reads since open
    pub fn read_failures(&self) -> u64 {
        self.read_failures.load(Ordering::Relaxed)
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}
