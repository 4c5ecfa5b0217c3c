//! Orchestrator
//!
//! Builds the components from configuration and runs sessions until one
//! ends in power-off. Restarts either re-exec the process or start a new
//! controller in place.

use std::sync::Arc;

use ignition::IgnitionMonitor;
use storage::{SpaceProbe, StatvfsProbe, StorageManager};
use tracing::{error, info};

use crate::clock::WallClock;
use crate::controller::{Components, LifecycleController, SessionOutcome, SessionReport};
use crate::host;
use crate::{DashcamConfig, LifecycleError, RestartMode};

pub struct Orchestrator {
    parts: Components,
}

impl Orchestrator {
    /// Build the production components for `config`
    pub fn from_config(config: DashcamConfig) -> Result<Self, LifecycleError> {
        Self::with_space_probe(config, Arc::new(StatvfsProbe))
    }

    /// As `from_config`, with a custom free-space probe
    pub fn with_space_probe(
        config: DashcamConfig,
        probe: Arc<dyn SpaceProbe>,
    ) -> Result<Self, LifecycleError> {
        config.validate()?;

        let camera = camera_capture::provider_for(&config.camera);
        let storage = StorageManager::with_probe(config.archive_path(), probe).dry_run(config.debug);
        let ignition = IgnitionMonitor::from_config(&config.ignition, config.debug)?;
        let power = host::power_control_for(&config);

        info!(
            "Recording to {} (archive {}), {} at {} fps",
            config.working_root.display(),
            config.archive_path().display(),
            config.camera.resolution,
            config.camera.fps
        );

        Ok(Self::new(Components {
            config: Arc::new(config),
            camera,
            storage: Arc::new(storage),
            ignition: Arc::new(ignition),
            power,
            clock: Arc::new(WallClock::starting_now()),
        }))
    }

    pub fn new(parts: Components) -> Self {
        Self { parts }
    }

    /// Run a single session from `Starting`
    pub async fn run_session(&self) -> Result<SessionReport, LifecycleError> {
        LifecycleController::new(self.parts.clone()).run().await
    }

    /// Run sessions back to back until the host is powered off.
    ///
    /// Returns the report of the final session. A failed re-exec falls back
    /// to an in-process restart.
    pub async fn run(&self) -> Result<SessionReport, LifecycleError> {
        let mut session = 1u64;
        loop {
            info!("Starting session {}", session);
            let report = self.run_session().await?;
            match report.outcome {
                SessionOutcome::PoweredOff => return Ok(report),
                SessionOutcome::Restart => {}
            }

            match self.parts.config.restart_mode {
                RestartMode::Exec => {
                    let err = host::exec_self();
                    error!("{}; restarting in process instead", err);
                }
                RestartMode::InProcess => info!("Restarting in process"),
            }
            session += 1;
        }
    }
}
