//! Ignition Line Monitoring
//!
//! Reports whether the host is running on vehicle power. The physical line
//! is a single active-high GPIO input; bench and test setups substitute a
//! fixed or scripted line behind the same `IgnitionSense` trait.

mod line;

pub use line::{FixedLine, ScriptedLine, SysfsGpioLine};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Ignition error types
#[derive(Error, Debug)]
pub enum IgnitionError {
    #[error("GPIO {pin} setup failed: {source}")]
    Setup {
        pin: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("GPIO {pin} read failed: {source}")]
    Read {
        pin: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("GPIO {pin} returned unexpected value {value:?}")]
    InvalidValue { pin: u32, value: String },
}

/// Ignition line configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnitionConfig {
    /// BCM pin number of the ignition input
    pub pin: u32,
    /// sysfs GPIO root
    pub gpio_root: String,
}

impl Default for IgnitionConfig {
    fn default() -> Self {
        Self {
            pin: 21,
            gpio_root: "/sys/class/gpio".to_string(),
        }
    }
}

/// A digital input reporting vehicle power
pub trait IgnitionSense: Send + Sync {
    /// Sample the line; `true` means powered
    fn read(&self) -> Result<bool, IgnitionError>;
}

/// Ignition state as seen by the lifecycle controller
pub struct IgnitionMonitor {
    line: Arc<dyn IgnitionSense>,
    last: AtomicBool,
    failing: AtomicBool,
}

impl IgnitionMonitor {
    /// Monitor an arbitrary line
    pub fn new(line: Arc<dyn IgnitionSense>) -> Self {
        Self {
            line,
            // Assume powered until the first successful read says otherwise
            last: AtomicBool::new(true),
            failing: AtomicBool::new(false),
        }
    }

    /// Bench monitor that always reports powered
    pub fn always_powered() -> Self {
        Self::new(Arc::new(FixedLine::new(true)))
    }

    /// Open the physical line, or a fixed powered line in debug mode
    pub fn from_config(config: &IgnitionConfig, debug_mode: bool) -> Result<Self, IgnitionError> {
        if debug_mode {
            debug!("Debug mode: ignition reads fixed powered");
            return Ok(Self::always_powered());
        }
        let line = SysfsGpioLine::open(&config.gpio_root, config.pin)?;
        Ok(Self::new(Arc::new(line)))
    }

    /// Current reading. A failed read repeats the last good one.
    pub fn is_powered(&self) -> bool {
        match self.line.read() {
            Ok(powered) => {
                if self.failing.swap(false, Ordering::Relaxed) {
                    debug!("Ignition line readable again");
                }
                self.last.store(powered, Ordering::Relaxed);
                powered
            }
            Err(e) => {
                if !self.failing.swap(true, Ordering::Relaxed) {
                    warn!("Ignition read failed, keeping last reading: {}", e);
                }
                self.last.load(Ordering::Relaxed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FlakyLine {
        readings: Mutex<Vec<Option<bool>>>,
    }

    impl IgnitionSense for FlakyLine {
        fn read(&self) -> Result<bool, IgnitionError> {
            match self.readings.lock().unwrap().remove(0) {
                Some(v) => Ok(v),
                None => Err(IgnitionError::InvalidValue {
                    pin: 21,
                    value: "?".to_string(),
                }),
            }
        }
    }

    #[test]
    fn test_debug_mode_always_powered() {
        let monitor = IgnitionMonitor::from_config(&IgnitionConfig::default(), true).unwrap();
        assert!(monitor.is_powered());
    }

    #[test]
    fn test_failed_read_repeats_last_value() {
        let line = FlakyLine {
            readings: Mutex::new(vec![None, Some(false), None, Some(true)]),
        };
        let monitor = IgnitionMonitor::new(Arc::new(line));

        assert!(monitor.is_powered());
        assert!(!monitor.is_powered());
        assert!(!monitor.is_powered());
        assert!(monitor.is_powered());
    }

    #[test]
    fn test_missing_gpio_root_fails_setup() {
        let config = IgnitionConfig {
            pin: 21,
            gpio_root: "/nonexistent/gpio".to_string(),
        };
        assert!(matches!(
            IgnitionMonitor::from_config(&config, false),
            Err(IgnitionError::Setup { pin: 21, .. })
        ));
    }
}
