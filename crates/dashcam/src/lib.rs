//! Dashcam Recorder
//!
//! Records from the attached camera while the ignition line reports vehicle
//! power, restarts on a fixed cadence to bound file length, and shuts the
//! host down after the ignition has been off for a grace window.
//!
//! - `config`: layered file + environment configuration
//! - `controller`: per-session lifecycle state machine
//! - `orchestrator`: builds the components and runs sessions back to back
//! - `host`: power-off and self re-exec

pub mod clock;
pub mod config;
pub mod controller;
pub mod host;
pub mod orchestrator;

pub use crate::clock::{session_file_name, WallClock};
pub use crate::config::{DashcamConfig, LifecycleConfig, RestartMode};
pub use crate::controller::{
    Components, LifecycleController, Phase, RecordingSession, SessionOutcome, SessionReport,
};
pub use crate::host::{CommandPower, HostError, LoggedPower, PowerControl};
pub use crate::orchestrator::Orchestrator;

use camera_capture::CameraError;
use ignition::IgnitionError;
use recorder::SinkError;
use storage::StorageError;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Lifecycle error types
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Recording error: {0}")]
    Sink(#[from] SinkError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Ignition error: {0}")]
    Ignition(#[from] IgnitionError),

    #[error("Host control error: {0}")]
    Host(#[from] HostError),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Install the global fmt subscriber; DEBUG level in debug mode
pub fn init_logging(debug: bool) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}
