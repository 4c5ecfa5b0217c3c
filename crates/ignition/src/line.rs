//! Ignition line implementations

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use crate::{IgnitionError, IgnitionSense};

/// Active-high input read through the sysfs GPIO interface
#[derive(Debug, Clone)]
pub struct SysfsGpioLine {
    pin: u32,
    value_path: PathBuf,
}

impl SysfsGpioLine {
    /// Export `pin` under `gpio_root` if needed and configure it as an input
    pub fn open(gpio_root: impl AsRef<Path>, pin: u32) -> Result<Self, IgnitionError> {
        let root = gpio_root.as_ref();
        let pin_dir = root.join(format!("gpio{}", pin));
        let setup = |source| IgnitionError::Setup { pin, source };

        if !pin_dir.exists() {
            fs::write(root.join("export"), pin.to_string()).map_err(setup)?;
            info!("Exported GPIO {}", pin);
        }
        fs::write(pin_dir.join("direction"), "in").map_err(setup)?;

        Ok(Self {
            pin,
            value_path: pin_dir.join("value"),
        })
    }

    /// BCM pin number
    pub fn pin(&self) -> u32 {
        self.pin
    }
}

impl IgnitionSense for SysfsGpioLine {
    fn read(&self) -> Result<bool, IgnitionError> {
        let raw = fs::read_to_string(&self.value_path).map_err(|source| IgnitionError::Read {
            pin: self.pin,
            source,
        })?;
        match raw.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(IgnitionError::InvalidValue {
                pin: self.pin,
                value: other.to_string(),
            }),
        }
    }
}

/// Line stuck at one value (bench setups without a wired ignition)
#[derive(Debug, Clone, Copy)]
pub struct FixedLine(bool);

impl FixedLine {
    pub fn new(powered: bool) -> Self {
        Self(powered)
    }
}

impl IgnitionSense for FixedLine {
    fn read(&self) -> Result<bool, IgnitionError> {
        Ok(self.0)
    }
}

/// Line that follows a timetable relative to its creation.
///
/// Uses the tokio clock, so paused-time tests can fast-forward through it.
#[derive(Debug, Clone)]
pub struct ScriptedLine {
    start: Instant,
    initial: bool,
    changes: Vec<(Duration, bool)>,
}

impl ScriptedLine {
    /// `changes` are `(offset, value)` pairs; each value holds from its offset on
    pub fn new(initial: bool, mut changes: Vec<(Duration, bool)>) -> Self {
        changes.sort_by_key(|(offset, _)| *offset);
        Self {
            start: Instant::now(),
            initial,
            changes,
        }
    }

    /// Value the line has `elapsed` after creation
    pub fn value_at(&self, elapsed: Duration) -> bool {
        self.changes
            .iter()
            .take_while(|(offset, _)| *offset <= elapsed)
            .last()
            .map_or(self.initial, |(_, value)| *value)
    }
}

impl IgnitionSense for ScriptedLine {
    fn read(&self) -> Result<bool, IgnitionError> {
        Ok(self.value_at(self.start.elapsed()))
    }
}
