//! Recorder configuration
//!
//! Loaded once at startup from an optional TOML file layered under
//! `DASHCAM_*` environment variables (`DASHCAM_CAMERA__FPS=10` sets
//! `camera.fps`). Immutable afterwards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Config, Environment, File};
use camera_capture::CameraConfig;
use ignition::IgnitionConfig;
use serde::{Deserialize, Serialize};
use storage::EvictionPolicy;

use crate::LifecycleError;

/// Config file read when no path is given on the command line
pub const DEFAULT_CONFIG_FILE: &str = "dashcam.toml";

/// Upper bounds accepted by `DashcamConfig::validate`
pub const MAX_FPS: f64 = 240.0;
pub const MAX_RESTART_INTERVAL_SECS: u64 = 24 * 60 * 60;
pub const MAX_SHUTDOWN_GRACE_SECS: u64 = 60 * 60;
pub const MAX_SETTLE_DELAY_MS: u64 = 60_000;
pub const MAX_AGE_DAYS: u64 = 100 * 365;

/// How a session restart is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartMode {
    /// Replace the process with a fresh copy of itself
    #[default]
    Exec,
    /// Start a new controller inside the running process
    InProcess,
}

/// Session timing and frame treatment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Force a new session after this many seconds
    pub restart_interval_secs: u64,
    /// Seconds the ignition may stay off before the host is powered down
    pub shutdown_grace_secs: u64,
    /// Pause between releasing the writer and moving its file
    pub settle_delay_ms: u64,
    /// JPEG quality for encoded frames (1-100)
    pub jpeg_quality: u8,
    /// Mark frames recorded during the shutdown countdown
    pub annotate_shutdown: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            restart_interval_secs: 30 * 60,
            shutdown_grace_secs: 30,
            settle_delay_ms: 1000,
            jpeg_quality: 80,
            annotate_shutdown: true,
        }
    }
}

// Accessors clamp to the validated range
impl LifecycleConfig {
    pub fn restart_interval(&self) -> Duration {
        Duration::from_secs(self.restart_interval_secs.min(MAX_RESTART_INTERVAL_SECS))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs.min(MAX_SHUTDOWN_GRACE_SECS))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms.min(MAX_SETTLE_DELAY_MS))
    }
}

/// Top-level recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashcamConfig {
    /// Directory holding the staging file; relative paths resolve against it
    pub working_root: PathBuf,
    /// Archive directory for finalized recordings
    pub archive_dir: PathBuf,
    /// Recording file extension, which also selects the container
    pub container: String,
    /// Bench mode: fixed ignition, dry-run eviction, no real power-off
    pub debug: bool,
    pub restart_mode: RestartMode,
    /// Host power-off command and its arguments
    pub power_off_command: Vec<String>,
    pub camera: CameraConfig,
    pub storage: EvictionPolicy,
    pub ignition: IgnitionConfig,
    pub lifecycle: LifecycleConfig,
}

impl Default for DashcamConfig {
    fn default() -> Self {
        Self {
            working_root: PathBuf::from("."),
            archive_dir: PathBuf::from("cam_videos"),
            container: "avi".to_string(),
            debug: false,
            restart_mode: RestartMode::Exec,
            power_off_command: ["sudo", "shutdown", "-h", "now"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            camera: CameraConfig::default(),
            storage: EvictionPolicy::default(),
            ignition: IgnitionConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl DashcamConfig {
    /// Load `path` (if it exists) under the process environment, then validate
    pub fn load(path: &Path) -> Result<Self, LifecycleError> {
        Self::load_from(path, environment())
    }

    fn load_from(path: &Path, env: Environment) -> Result<Self, LifecycleError> {
        let config: DashcamConfig = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(env)
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the controller cannot run with
    pub fn validate(&self) -> Result<(), LifecycleError> {
        let invalid = |msg: String| Err(LifecycleError::InvalidConfig(msg));

        let fps = self.camera.fps;
        if !(fps.is_finite() && fps > 0.0 && fps <= MAX_FPS) {
            return invalid(format!("camera.fps must be in (0, {}], got {}", MAX_FPS, fps));
        }
        let lifecycle = &self.lifecycle;
        if !(1..=MAX_RESTART_INTERVAL_SECS).contains(&lifecycle.restart_interval_secs) {
            return invalid(format!(
                "lifecycle.restart_interval_secs must be in 1..={}, got {}",
                MAX_RESTART_INTERVAL_SECS, lifecycle.restart_interval_secs
            ));
        }
        if !(1..=MAX_SHUTDOWN_GRACE_SECS).contains(&lifecycle.shutdown_grace_secs) {
            return invalid(format!(
                "lifecycle.shutdown_grace_secs must be in 1..={}, got {}",
                MAX_SHUTDOWN_GRACE_SECS, lifecycle.shutdown_grace_secs
            ));
        }
        if lifecycle.settle_delay_ms > MAX_SETTLE_DELAY_MS {
            return invalid(format!(
                "lifecycle.settle_delay_ms must be at most {}, got {}",
                MAX_SETTLE_DELAY_MS, lifecycle.settle_delay_ms
            ));
        }
        if self.storage.max_age_days > MAX_AGE_DAYS {
            return invalid(format!(
                "storage.max_age_days must be at most {}, got {}",
                MAX_AGE_DAYS, self.storage.max_age_days
            ));
        }
        if self.container.trim().is_empty() {
            return invalid("container must name a file extension".to_string());
        }
        if !self.debug && self.power_off_command.is_empty() {
            return invalid("power_off_command is empty".to_string());
        }
        Ok(())
    }

    /// Archive directory, resolved against the working root
    pub fn archive_path(&self) -> PathBuf {
        self.working_root.join(&self.archive_dir)
    }

    /// Staging location for a recording named `file_name`
    pub fn staging_path(&self, file_name: &str) -> PathBuf {
        self.working_root.join(file_name)
    }
}

fn environment() -> Environment {
    Environment::with_prefix("DASHCAM")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(" ")
        .with_list_parse_key("power_off_command")
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::CameraBackend;
    use tempfile::TempDir;

    fn no_env() -> Environment {
        environment().source(Some(Default::default()))
    }

    #[test]
    fn test_defaults() {
        let config = DashcamConfig::default();
        assert_eq!(config.archive_path(), Path::new("./cam_videos"));
        assert_eq!(config.lifecycle.restart_interval(), Duration::from_secs(1800));
        assert_eq!(config.lifecycle.shutdown_grace(), Duration::from_secs(30));
        assert_eq!(config.storage.evict_batch, 3);
        assert_eq!(config.restart_mode, RestartMode::Exec);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = DashcamConfig::load_from(&dir.path().join("absent.toml"), no_env()).unwrap();
        assert_eq!(config.container, "avi");
        assert_eq!(config.camera.resolution, "720p");
    }

    #[test]
    fn test_file_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dashcam.toml");
        std::fs::write(
            &path,
            r#"
working_root = "/var/lib/dashcam"
debug = true
restart_mode = "in-process"

[camera]
backend = "test-pattern"
fps = 10.0
resolution = "1080p"

[storage]
max_age_days = 3

[lifecycle]
shutdown_grace_secs = 45
"#,
        )
        .unwrap();

        let config = DashcamConfig::load_from(&path, no_env()).unwrap();
        assert!(config.debug);
        assert_eq!(config.restart_mode, RestartMode::InProcess);
        assert_eq!(config.camera.backend, CameraBackend::TestPattern);
        assert_eq!(config.camera.dimensions(), (1920, 1080));
        assert_eq!(config.storage.max_age_days, 3);
        assert!(config.storage.clear_space);
        assert_eq!(config.lifecycle.shutdown_grace_secs, 45);
        assert_eq!(config.lifecycle.restart_interval_secs, 1800);
        assert_eq!(
            config.archive_path(),
            Path::new("/var/lib/dashcam/cam_videos")
        );
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dashcam.toml");
        std::fs::write(&path, "[camera]\nfps = 10.0\n").unwrap();

        let vars = [
            ("DASHCAM_CAMERA__FPS", "12.5"),
            ("DASHCAM_POWER_OFF_COMMAND", "systemctl poweroff"),
            ("DASHCAM_STORAGE__CLEAR_SPACE", "false"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let env = environment().source(Some(vars));

        let config = DashcamConfig::load_from(&path, env).unwrap();
        assert!((config.camera.fps - 12.5).abs() < f64::EPSILON);
        assert_eq!(config.power_off_command, vec!["systemctl", "poweroff"]);
        assert!(!config.storage.clear_space);
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = DashcamConfig::default();
        config.camera.fps = 0.0;
        assert!(matches!(config.validate(), Err(LifecycleError::InvalidConfig(_))));

        let mut config = DashcamConfig::default();
        config.lifecycle.restart_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = DashcamConfig::default();
        config.power_off_command.clear();
        assert!(config.validate().is_err());
        config.debug = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_out_of_range_values() {
        let out_of_range: [fn(&mut DashcamConfig); 6] = [
            |c| c.camera.fps = 1e10,
            |c| c.camera.fps = f64::INFINITY,
            |c| c.lifecycle.restart_interval_secs = u64::MAX,
            |c| c.lifecycle.shutdown_grace_secs = u64::MAX,
            |c| c.lifecycle.settle_delay_ms = u64::MAX,
            |c| c.storage.max_age_days = u64::MAX,
        ];
        for tweak in out_of_range {
            let mut config = DashcamConfig::default();
            tweak(&mut config);
            assert!(matches!(config.validate(), Err(LifecycleError::InvalidConfig(_))));
        }

        let mut config = DashcamConfig::default();
        config.camera.fps = MAX_FPS;
        config.lifecycle.restart_interval_secs = MAX_RESTART_INTERVAL_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lifecycle_durations_are_clamped() {
        let lifecycle = LifecycleConfig {
            restart_interval_secs: u64::MAX,
            shutdown_grace_secs: u64::MAX,
            settle_delay_ms: u64::MAX,
            ..Default::default()
        };
        assert_eq!(
            lifecycle.restart_interval(),
            Duration::from_secs(MAX_RESTART_INTERVAL_SECS)
        );
        assert_eq!(lifecycle.shutdown_grace(), Duration::from_secs(MAX_SHUTDOWN_GRACE_SECS));
        assert_eq!(lifecycle.settle_delay(), Duration::from_millis(MAX_SETTLE_DELAY_MS));
    }
}
