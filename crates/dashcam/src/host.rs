//! Host control: power-off and process restart

use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::DashcamConfig;

/// Host control error types
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Power-off command is empty")]
    EmptyCommand,

    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Cannot locate the running executable: {0}")]
    CurrentExe(#[source] io::Error),

    #[error("Re-exec of {path} failed: {source}")]
    Exec {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Powers the host down
pub trait PowerControl: Send + Sync {
    /// Request power-off. Returns once the request is issued.
    fn power_off(&self) -> Result<(), HostError>;
}

/// Runs a privileged shutdown command without waiting for it
#[derive(Debug, Clone)]
pub struct CommandPower {
    command: Vec<String>,
}

impl CommandPower {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl PowerControl for CommandPower {
    fn power_off(&self) -> Result<(), HostError> {
        let (program, args) = self.command.split_first().ok_or(HostError::EmptyCommand)?;
        let command = self.command.join(" ");
        info!("Powering off: {}", command);

        let child = Command::new(program)
            .args(args)
            .spawn()
            .map_err(|source| HostError::Spawn { command, source })?;
        info!("Power-off command started (pid {})", child.id());
        Ok(())
    }
}

/// Debug stand-in that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggedPower;

impl PowerControl for LoggedPower {
    fn power_off(&self) -> Result<(), HostError> {
        warn!("Debug mode: skipping host power-off");
        Ok(())
    }
}

/// Power control for the configured mode
pub fn power_control_for(config: &DashcamConfig) -> Arc<dyn PowerControl> {
    if config.debug {
        Arc::new(LoggedPower)
    } else {
        Arc::new(CommandPower::new(config.power_off_command.clone()))
    }
}

/// Replace this process with a fresh copy started with the same arguments.
///
/// Only returns on failure.
pub fn exec_self() -> HostError {
    let path = match std::env::current_exe() {
        Ok(path) => path,
        Err(e) => return HostError::CurrentExe(e),
    };
    info!("Re-executing {}", path.display());

    let source = Command::new(&path).args(std::env::args_os().skip(1)).exec();
    HostError::Exec { path, source }
}
