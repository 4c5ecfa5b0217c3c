//! Lifecycle Controller
//!
//! One controller runs one recording session:
//!
//! ```text
//! Starting ──▶ Recording ◀──▶ ShutdownPending ──▶ Terminated
//!                  │                 │
//!                  └──────┬──────────┘
//!                         ▼
//!                     Restarting
//! ```
//!
//! `Starting` opens the camera before anything touches the archive, so a
//! missing camera never costs old footage. Recordings a previous run left in
//! staging are archived before eviction runs. The restart deadline is armed once
//! per session and fires from either `Recording` or `ShutdownPending`; the
//! shutdown countdown is the only cancelable timer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use camera_capture::{annotate_power_off, CameraProvider, FrameSlot, FrameSource, VideoFrame};
use chrono::NaiveDateTime;
use ignition::IgnitionMonitor;
use metrics::counter;
use recorder::{FrameSink, SinkError, SinkSettings};
use storage::{EvictionReport, StorageManager};
use tokio::time::{interval, sleep, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::clock::{session_file_name, WallClock};
use crate::host::PowerControl;
use crate::{DashcamConfig, LifecycleError};

/// Shortest frame tick; guards against a zero-length interval
const MIN_FRAME_PERIOD: Duration = Duration::from_millis(1);

/// Controller states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Recording,
    ShutdownPending,
    Restarting,
    Terminated,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Restart interval elapsed, or the recording stopped taking frames; a
    /// fresh session should follow
    Restart,
    /// Ignition stayed off for the grace window; the host was told to power off
    PoweredOff,
}

/// Summary of a finished session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    /// Final location of the recording
    pub archived: PathBuf,
    pub frames: u64,
    /// Every phase entered, in order
    pub phases: Vec<Phase>,
    /// Startup eviction result; `None` if the pass failed
    pub eviction: Option<EvictionReport>,
}

/// The recording owned by the active session
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub path: PathBuf,
    pub created: NaiveDateTime,
    pub frames: u64,
    started: Instant,
}

impl RecordingSession {
    fn new(path: PathBuf, created: NaiveDateTime) -> Self {
        Self {
            path,
            created,
            frames: 0,
            started: Instant::now(),
        }
    }

    /// Time since the session's writer was opened
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Everything a session needs, shared across sessions of one process
#[derive(Clone)]
pub struct Components {
    pub config: Arc<DashcamConfig>,
    pub camera: Arc<dyn CameraProvider>,
    pub storage: Arc<StorageManager>,
    pub ignition: Arc<IgnitionMonitor>,
    pub power: Arc<dyn PowerControl>,
    pub clock: Arc<WallClock>,
}

/// Recording/shutdown state machine for a single session
pub struct LifecycleController {
    parts: Components,
    phase: Phase,
    phases: Vec<Phase>,
    write_failures: u64,
}

impl LifecycleController {
    pub fn new(parts: Components) -> Self {
        Self {
            parts,
            phase: Phase::Starting,
            phases: Vec::new(),
            write_failures: 0,
        }
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run one session from `Starting` until it restarts or powers off.
    ///
    /// Only startup failures are returned; a missing camera aborts before
    /// the archive is touched.
    pub async fn run(mut self) -> Result<SessionReport, LifecycleError> {
        self.enter(Phase::Starting);
        let config = self.parts.config.clone();

        let mut source = FrameSource::open(self.parts.camera.as_ref(), &config.camera)?;

        self.parts.storage.ensure_archive_dir()?;
        match self
            .parts
            .storage
            .recover_staged(&config.working_root, &config.container)
        {
            Ok(recovered) if !recovered.is_empty() => {
                info!("Archived {} recordings left by a previous run", recovered.len())
            }
            Ok(_) => {}
            Err(e) => warn!("Could not scan staging for leftover recordings: {}", e),
        }
        let eviction = match self
            .parts
            .storage
            .apply_policy(&config.storage, &config.working_root)
        {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Startup eviction failed, recording anyway: {}", e);
                None
            }
        };

        let created = self.parts.clock.now();
        let file_name = session_file_name(created, &config.container);
        let settings = SinkSettings::new(config.camera.fps, config.camera.resolution())
            .with_quality(config.lifecycle.jpeg_quality);
        let mut sink = FrameSink::open(config.staging_path(&file_name), settings)?;
        let mut session = RecordingSession::new(sink.path().to_path_buf(), created);

        if let Err(e) = source.capture() {
            warn!("First frame unavailable, waiting for the capture loop: {}", e);
        }
        source.start()?;

        let restart_at = Instant::now() + config.lifecycle.restart_interval();
        self.enter(Phase::Recording);

        let outcome = self
            .drive(&source.slot(), &mut sink, &mut session, restart_at)
            .await;
        if outcome == SessionOutcome::Restart {
            self.enter(Phase::Restarting);
        }

        let archived = self.finalize(source, sink, &session).await?;

        if outcome == SessionOutcome::PoweredOff {
            if let Err(e) = self.parts.power.power_off() {
                error!("Power-off request failed: {}", e);
            }
            self.enter(Phase::Terminated);
        }

        Ok(SessionReport {
            outcome,
            archived,
            frames: session.frames,
            phases: self.phases,
            eviction,
        })
    }

    /// Recording / ShutdownPending loop, paced at the encoder frame rate
    async fn drive(
        &mut self,
        slot: &FrameSlot,
        sink: &mut FrameSink,
        session: &mut RecordingSession,
        restart_at: Instant,
    ) -> SessionOutcome {
        let lifecycle = &self.parts.config.lifecycle;
        let grace = lifecycle.shutdown_grace();
        let annotate = lifecycle.annotate_shutdown;

        let mut ticker = interval(frame_period(self.parts.config.camera.fps));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let restart = sleep_until(restart_at);
        tokio::pin!(restart);

        let mut unpowered_since: Option<Instant> = None;
        loop {
            tokio::select! {
                biased;
                _ = &mut restart => {
                    info!("Restart interval reached after {} frames", session.frames);
                    return SessionOutcome::Restart;
                }
                _ = ticker.tick() => {}
            }

            let powered = self.parts.ignition.is_powered();
            match (powered, unpowered_since) {
                (true, Some(since)) => {
                    info!("Ignition back after {:?}, shutdown aborted", since.elapsed());
                    unpowered_since = None;
                    self.enter(Phase::Recording);
                }
                (false, None) => {
                    warn!("Ignition off, powering down in {:?} unless it returns", grace);
                    unpowered_since = Some(Instant::now());
                    self.enter(Phase::ShutdownPending);
                }
                (false, Some(since)) if since.elapsed() >= grace => {
                    info!("Ignition off for {:?}, shutting down", since.elapsed());
                    return SessionOutcome::PoweredOff;
                }
                _ => {}
            }

            let Some(frame) = slot.latest() else {
                continue;
            };
            let marked = unpowered_since.is_some() && annotate;
            if let Err(e) = self.write_frame(sink, session, &frame, marked) {
                error!("Recording stopped taking frames, restarting: {}", e);
                return SessionOutcome::Restart;
            }
        }
    }

    /// Write one frame. Rejected frames are counted and skipped; only an
    /// error that ends the recording is returned.
    fn write_frame(
        &mut self,
        sink: &mut FrameSink,
        session: &mut RecordingSession,
        frame: &VideoFrame,
        marked: bool,
    ) -> Result<(), SinkError> {
        // JPEG encoding runs on this worker; the file is written by the
        // pipeline's streaming thread
        let result = if marked {
            sink.write(&annotate_power_off(frame))
        } else {
            sink.write(frame)
        };

        match result {
            Ok(()) => session.frames = sink.frames(),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                self.write_failures += 1;
                if self.write_failures == 1 {
                    warn!("Frame write failed, continuing: {}", e);
                } else {
                    debug!("Frame write failure #{}: {}", self.write_failures, e);
                }
            }
        }
        Ok(())
    }

    /// Release the camera and writer, let the file settle, then archive it
    async fn finalize(
        &mut self,
        mut source: FrameSource,
        sink: FrameSink,
        session: &RecordingSession,
    ) -> Result<PathBuf, LifecycleError> {
        source.stop();
        if source.read_failures() > 0 {
            info!("Camera reported {} failed reads", source.read_failures());
        }
        drop(source);

        // A failed close still leaves whatever reached the file
        let staged = sink.path().to_path_buf();
        let (frames, bytes) = match sink.close() {
            Ok(summary) => (summary.frames, summary.bytes),
            Err(e) => {
                error!("Closing {} failed: {}", staged.display(), e);
                (session.frames, 0)
            }
        };
        if self.parts.config.debug {
            let secs = session.elapsed().as_secs_f64();
            if secs > 0.0 {
                info!(
                    "Measured {:.2} fps ({} frames in {:.1}s)",
                    frames as f64 / secs,
                    frames,
                    secs
                );
            }
        }

        sleep(self.parts.config.lifecycle.settle_delay()).await;
        let archived = self.parts.storage.archive(&staged)?;
        counter!("dashcam_sessions_finalized_total").increment(1);
        info!(
            "Session {} finalized: {} frames, {} bytes",
            session.created, frames, bytes
        );
        Ok(archived)
    }

    fn enter(&mut self, phase: Phase) {
        if self.phases.last() != Some(&phase) {
            info!("Lifecycle: {:?} -> {:?}", self.phase, phase);
        }
        self.phase = phase;
        self.phases.push(phase);
    }
}

/// Tick period for `fps`, never shorter than `MIN_FRAME_PERIOD`
fn frame_period(fps: f64) -> Duration {
    Duration::try_from_secs_f64(1.0 / fps)
        .unwrap_or(Duration::from_secs(1))
        .max(MIN_FRAME_PERIOD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::device::UnsupportedProvider;
    use camera_capture::{CameraBackend, CameraConfig, TestPatternProvider};
    use chrono::NaiveDate;
    use ignition::{FixedLine, IgnitionSense, ScriptedLine};
    use std::fs;
    use std::io;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;
    use storage::{SpaceProbe, StorageState};
    use tempfile::TempDir;

    use crate::host::HostError;
    use crate::LifecycleConfig;

    const MINUTE: Duration = Duration::from_secs(60);

    #[derive(Default)]
    struct CountingPower {
        calls: AtomicUsize,
    }

    impl PowerControl for CountingPower {
        fn power_off(&self) -> Result<(), HostError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FixedSpace(f64);

    impl SpaceProbe for FixedSpace {
        fn state(&self, _path: &Path) -> io::Result<StorageState> {
            Ok(StorageState {
                available_bytes: (self.0 * 1e9) as u64,
                total_bytes: 64_000_000_000,
            })
        }
    }

    struct Rig {
        root: TempDir,
        parts: Components,
        power: Arc<CountingPower>,
    }

    impl Rig {
        fn archive(&self) -> PathBuf {
            self.parts.config.archive_path()
        }

        fn archived_names(&self) -> Vec<String> {
            let mut names: Vec<String> = fs::read_dir(self.archive())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }

        /// Recordings left at the working root
        fn staged(&self) -> Vec<PathBuf> {
            fs::read_dir(self.root.path())
                .unwrap()
                .map(|e| e.unwrap().path())
                .filter(|p| p.is_file())
                .collect()
        }

        fn power_offs(&self) -> usize {
            self.power.calls.load(Ordering::SeqCst)
        }
    }

    fn test_config(root: &Path) -> DashcamConfig {
        DashcamConfig {
            working_root: root.to_path_buf(),
            camera: CameraConfig {
                backend: CameraBackend::TestPattern,
                fps: 1.0,
                resolution: "16x12".to_string(),
                ..Default::default()
            },
            lifecycle: LifecycleConfig {
                restart_interval_secs: 30 * 60,
                shutdown_grace_secs: 30,
                settle_delay_ms: 1000,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn rig_with(
        line: Arc<dyn IgnitionSense>,
        camera: Arc<dyn CameraProvider>,
        free_gb: f64,
        tweak: impl FnOnce(&mut DashcamConfig),
    ) -> Rig {
        let root = TempDir::new().unwrap();
        let mut config = test_config(root.path());
        tweak(&mut config);

        let power = Arc::new(CountingPower::default());
        let storage = StorageManager::with_probe(config.archive_path(), Arc::new(FixedSpace(free_gb)));
        let start = NaiveDate::from_ymd_opt(2025, 1, 2)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();

        let parts = Components {
            config: Arc::new(config),
            camera,
            storage: Arc::new(storage),
            ignition: Arc::new(IgnitionMonitor::new(line)),
            power: power.clone(),
            clock: Arc::new(WallClock::anchored_at(start)),
        };
        Rig { root, parts, power }
    }

    fn rig(line: Arc<dyn IgnitionSense>) -> Rig {
        rig_with(line, Arc::new(TestPatternProvider { unpaced: true }), 100.0, |_| {})
    }

    fn write_aged(dir: &Path, name: &str, age: Duration) {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, name).unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_camera_aborts_before_eviction() {
        let camera = Arc::new(UnsupportedProvider {
            reason: "unplugged".to_string(),
        });
        let rig = rig_with(Arc::new(FixedLine::new(true)), camera, 1.0, |_| {});
        write_aged(&rig.archive(), "crash.avi", 30 * 24 * 60 * MINUTE);

        let result = LifecycleController::new(rig.parts.clone()).run().await;

        assert!(matches!(
            result,
            Err(LifecycleError::Camera(camera_capture::CameraError::DeviceUnavailable { .. }))
        ));
        assert_eq!(rig.archived_names(), vec!["crash.avi"]);
        assert!(rig.staged().is_empty());
        assert_eq!(rig.power_offs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_interval_finalizes_session() {
        let rig = rig(Arc::new(FixedLine::new(true)));
        let started = Instant::now();

        let report = LifecycleController::new(rig.parts.clone()).run().await.unwrap();

        assert_eq!(report.outcome, SessionOutcome::Restart);
        assert!(started.elapsed() >= 30 * MINUTE);
        assert_eq!(
            report.phases,
            vec![Phase::Starting, Phase::Recording, Phase::Restarting]
        );
        assert!(report.frames >= 29 * 60);
        assert_eq!(rig.archived_names(), vec!["01-02-2025_10-00-00.avi"]);
        assert_eq!(report.archived, rig.archive().join("01-02-2025_10-00-00.avi"));
        assert!(rig.staged().is_empty());
        assert_eq!(rig.power_offs(), 0);

        let bytes = fs::read(&report.archived).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_ignition_dip_resumes_recording() {
        // Off at 5 min for 10 s, well inside the 30 s grace window
        let line = ScriptedLine::new(
            true,
            vec![(5 * MINUTE, false), (5 * MINUTE + Duration::from_secs(10), true)],
        );
        let rig = rig(Arc::new(line));

        let report = LifecycleController::new(rig.parts.clone()).run().await.unwrap();

        assert_eq!(report.outcome, SessionOutcome::Restart);
        assert_eq!(
            report.phases,
            vec![
                Phase::Starting,
                Phase::Recording,
                Phase::ShutdownPending,
                Phase::Recording,
                Phase::Restarting,
            ]
        );
        assert_eq!(rig.power_offs(), 0);
        assert_eq!(rig.archived_names().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_ignition_loss_powers_off_once() {
        let line = ScriptedLine::new(true, vec![(2 * MINUTE, false)]);
        let rig = rig(Arc::new(line));
        let started = Instant::now();

        let report = LifecycleController::new(rig.parts.clone()).run().await.unwrap();

        assert_eq!(report.outcome, SessionOutcome::PoweredOff);
        assert_eq!(
            report.phases,
            vec![
                Phase::Starting,
                Phase::Recording,
                Phase::ShutdownPending,
                Phase::Terminated,
            ]
        );
        // Drop at 2 min + 30 s grace + 1 s settle
        let elapsed = started.elapsed();
        assert!(elapsed >= 2 * MINUTE + Duration::from_secs(31));
        assert!(elapsed < 3 * MINUTE);

        assert_eq!(rig.power_offs(), 1);
        assert_eq!(rig.archived_names(), vec!["01-02-2025_10-00-00.avi"]);
        assert!(rig.staged().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_fires_during_shutdown_countdown() {
        let line = ScriptedLine::new(true, vec![(Duration::from_secs(50), false)]);
        let rig = rig_with(
            Arc::new(line),
            Arc::new(TestPatternProvider { unpaced: true }),
            100.0,
            |config| config.lifecycle.restart_interval_secs = 60,
        );

        let report = LifecycleController::new(rig.parts.clone()).run().await.unwrap();

        assert_eq!(report.outcome, SessionOutcome::Restart);
        assert_eq!(
            report.phases,
            vec![
                Phase::Starting,
                Phase::Recording,
                Phase::ShutdownPending,
                Phase::Restarting,
            ]
        );
        assert_eq!(rig.power_offs(), 0);
        assert_eq!(rig.archived_names().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_space_evicts_oldest_before_recording() {
        let line = ScriptedLine::new(false, Vec::new());
        let rig = rig_with(
            Arc::new(line),
            Arc::new(TestPatternProvider { unpaced: true }),
            1.0,
            |_| {},
        );
        for hours in 1..=5u32 {
            write_aged(&rig.archive(), &format!("old-{}.avi", hours), hours * 60 * MINUTE);
        }

        let report = LifecycleController::new(rig.parts.clone()).run().await.unwrap();

        let eviction = report.eviction.unwrap();
        assert!(eviction.aged_out.is_empty());
        assert_eq!(eviction.space_evicted.map(|v| v.len()), Some(3));
        assert_eq!(
            rig.archived_names(),
            vec!["01-02-2025_10-00-00.avi", "old-1.avi", "old-2.avi"]
        );
        assert_eq!(rig.power_offs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debug_mode_keeps_expired_files() {
        let rig = rig_with(
            Arc::new(ScriptedLine::new(false, Vec::new())),
            Arc::new(TestPatternProvider { unpaced: true }),
            100.0,
            |config| config.debug = true,
        );
        write_aged(&rig.archive(), "expired.avi", 8 * 24 * 60 * MINUTE);
        let parts = Components {
            storage: Arc::new(
                StorageManager::with_probe(rig.archive(), Arc::new(FixedSpace(100.0))).dry_run(true),
            ),
            ..rig.parts.clone()
        };

        let report = LifecycleController::new(parts).run().await.unwrap();

        let eviction = report.eviction.unwrap();
        assert_eq!(eviction.aged_out.len(), 1);
        assert_eq!(eviction.space_evicted.map(|v| v.len()), Some(1));
        assert!(rig.archive().join("expired.avi").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leftover_staging_recordings_are_archived() {
        let rig = rig(Arc::new(ScriptedLine::new(false, Vec::new())));
        // Same name the new session will use
        fs::write(rig.root.path().join("01-02-2025_10-00-00.avi"), b"power cut").unwrap();
        fs::write(rig.root.path().join("01-01-2025_18-30-00.avi"), b"crash").unwrap();

        let report = LifecycleController::new(rig.parts.clone()).run().await.unwrap();

        assert_eq!(
            rig.archived_names(),
            vec![
                "01-01-2025_18-30-00.avi",
                "01-02-2025_10-00-00-1.avi",
                "01-02-2025_10-00-00.avi",
            ]
        );
        assert_eq!(
            fs::read(rig.archive().join("01-02-2025_10-00-00.avi")).unwrap(),
            b"power cut"
        );
        assert_eq!(report.archived, rig.archive().join("01-02-2025_10-00-00-1.avi"));
        assert!(rig.staged().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unvalidated_extreme_timing_does_not_panic() {
        let rig = rig_with(
            Arc::new(ScriptedLine::new(false, Vec::new())),
            Arc::new(TestPatternProvider { unpaced: true }),
            100.0,
            |config| {
                config.camera.fps = 1e4;
                config.lifecycle.restart_interval_secs = u64::MAX;
                config.lifecycle.shutdown_grace_secs = 2;
            },
        );

        let report = LifecycleController::new(rig.parts.clone()).run().await.unwrap();

        assert_eq!(report.outcome, SessionOutcome::PoweredOff);
        assert_eq!(rig.power_offs(), 1);
    }

    #[test]
    fn test_frame_period_bounds() {
        assert_eq!(frame_period(10.0), Duration::from_millis(100));
        assert_eq!(frame_period(1e12), MIN_FRAME_PERIOD);
        assert_eq!(frame_period(0.0), Duration::from_secs(1));
    }

    #[test]
    fn test_fatal_write_error_is_returned() {
        let rig = rig(Arc::new(FixedLine::new(true)));
        let mut controller = LifecycleController::new(rig.parts.clone());
        let settings = SinkSettings {
            fps: 10.0,
            width: 16,
            height: 12,
            quality: 80,
        };
        // Every write to /dev/full fails with ENOSPC
        let mut sink =
            FrameSink::open_with_format("/dev/full", recorder::VideoFormat::BASELINE, settings)
                .unwrap();
        let mut session = RecordingSession::new(PathBuf::from("/dev/full"), rig.parts.clock.now());

        let mut failure = None;
        for seq in 0..5000 {
            let frame = VideoFrame::new(vec![(seq % 256) as u8; 16 * 12 * 3], 16, 12, 0, seq);
            if let Err(e) = controller.write_frame(&mut sink, &mut session, &frame, false) {
                failure = Some(e);
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        assert!(failure.expect("recording kept accepting frames").is_fatal());
        assert_eq!(controller.write_failures, 0);
    }

    #[test]
    fn test_rejected_frame_is_counted_and_skipped() {
        let rig = rig(Arc::new(FixedLine::new(true)));
        let mut controller = LifecycleController::new(rig.parts.clone());
        let path = rig.root.path().join("clip.avi");
        let settings = SinkSettings {
            fps: 10.0,
            width: 16,
            height: 12,
            quality: 80,
        };
        let mut sink = FrameSink::open(&path, settings).unwrap();
        let mut session = RecordingSession::new(path, rig.parts.clock.now());

        let short = VideoFrame::new(vec![0; 10], 16, 12, 0, 0);
        assert!(controller.write_frame(&mut sink, &mut session, &short, false).is_ok());
        assert_eq!(controller.write_failures, 1);
        sink.close().unwrap();
    }
}
