//! Motion sensor input over the sysfs GPIO interface.
//!
//! The line is exported and configured as an input on open. If this process
//! exported it, it is unexported again on drop, returning the pin to the
//! state it was found in.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";

/// udev applies permissions to a freshly exported line asynchronously.
const CONFIGURE_ATTEMPTS: u32 = 20;
const CONFIGURE_BACKOFF: Duration = Duration::from_millis(25);

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("failed to export GPIO {pin}: {source}")]
    Export {
        pin: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to configure GPIO {pin} as input: {source}")]
    Direction {
        pin: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read GPIO {pin}: {source}")]
    Read {
        pin: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("GPIO {pin} returned unexpected value {value:?}")]
    InvalidValue { pin: u32, value: String },
}

/// A boolean presence signal.
pub trait MotionSensor {
    fn is_active(&mut self) -> Result<bool, SensorError>;
}

impl<T: MotionSensor + ?Sized> MotionSensor for Box<T> {
    fn is_active(&mut self) -> Result<bool, SensorError> {
        (**self).is_active()
    }
}

/// Sysfs GPIO input line.
///
/// `pin` is the sysfs line number, which is the chip base plus the BCM pin.
/// The base is 0 on older Raspberry Pi kernels and 512 from 6.6 onwards.
pub struct SysfsGpioSensor {
    root: PathBuf,
    pin: u32,
    active_low: bool,
    exported_here: bool,
}

impl SysfsGpioSensor {
    /// Acquire `pin` under `root` (normally [`DEFAULT_GPIO_ROOT`]).
    ///
    /// `active_low` inverts the reading for sensors that pull the line low
    /// on detection.
    pub fn open(root: impl AsRef<Path>, pin: u32, active_low: bool) -> Result<Self, SensorError> {
        let root = root.as_ref().to_path_buf();
        let exported_here = !root.join(format!("gpio{pin}")).exists();
        if exported_here {
            fs::write(root.join("export"), pin.to_string())
                .map_err(|source| SensorError::Export { pin, source })?;
        }

        // Built before configuring so a failure below still unexports on drop.
        let sensor = Self {
            root,
            pin,
            active_low,
            exported_here,
        };
        sensor.configure_input()?;

        tracing::info!(pin, active_low, exported = exported_here, "motion sensor ready");
        Ok(sensor)
    }

    fn line(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin))
    }

    fn configure_input(&self) -> Result<(), SensorError> {
        let direction = self.line().join("direction");
        let mut attempt = 1;
        loop {
            match fs::write(&direction, "in") {
                Ok(()) => return Ok(()),
                Err(source) if attempt >= CONFIGURE_ATTEMPTS => {
                    return Err(SensorError::Direction { pin: self.pin, source })
                }
                Err(_) => {
                    attempt += 1;
                    std::thread::sleep(CONFIGURE_BACKOFF);
                }
            }
        }
    }
}

impl MotionSensor for SysfsGpioSensor {
    fn is_active(&mut self) -> Result<bool, SensorError> {
        let raw = fs::read_to_string(self.line().join("value"))
            .map_err(|source| SensorError::Read { pin: self.pin, source })?;
        let level = match raw.trim() {
            "1" => true,
            "0" => false,
            other => {
                return Err(SensorError::InvalidValue {
                    pin: self.pin,
                    value: other.to_string(),
                })
            }
        };
        Ok(level != self.active_low)
    }
}

impl Drop for SysfsGpioSensor {
    fn drop(&mut self) {
        if !self.exported_here {
            return;
        }
        match fs::write(self.root.join("unexport"), self.pin.to_string()) {
            Ok(()) => tracing::info!(pin = self.pin, "motion sensor released"),
            Err(e) => tracing::warn!(pin = self.pin, error = %e, "failed to unexport GPIO"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exported_line(root: &Path, pin: u32, value: &str) -> PathBuf {
        let line = root.join(format!("gpio{pin}"));
        fs::create_dir_all(&line).unwrap();
        fs::write(line.join("value"), value).unwrap();
        line
    }

    #[test]
    fn test_reads_active_high() {
        let dir = tempfile::tempdir().unwrap();
        let line = exported_line(dir.path(), 17, "0\n");

        let mut sensor = SysfsGpioSensor::open(dir.path(), 17, false).unwrap();
        assert_eq!(fs::read_to_string(line.join("direction")).unwrap(), "in");
        assert!(!sensor.is_active().unwrap());

        fs::write(line.join("value"), "1\n").unwrap();
        assert!(sensor.is_active().unwrap());
    }

    #[test]
    fn test_active_low_inverts() {
        let dir = tempfile::tempdir().unwrap();
        let line = exported_line(dir.path(), 4, "0\n");

        let mut sensor = SysfsGpioSensor::open(dir.path(), 4, true).unwrap();
        assert!(sensor.is_active().unwrap());

        fs::write(line.join("value"), "1\n").unwrap();
        assert!(!sensor.is_active().unwrap());
    }

    #[test]
    fn test_invalid_value() {
        let dir = tempfile::tempdir().unwrap();
        exported_line(dir.path(), 17, "high\n");

        let mut sensor = SysfsGpioSensor::open(dir.path(), 17, false).unwrap();
        assert!(matches!(sensor.is_active(), Err(SensorError::InvalidValue { .. })));
    }

    #[test]
    fn test_preexisting_line_is_not_unexported() {
        let dir = tempfile::tempdir().unwrap();
        exported_line(dir.path(), 17, "0\n");

        drop(SysfsGpioSensor::open(dir.path(), 17, false).unwrap());
        assert!(!dir.path().join("unexport").exists());
    }

    #[test]
    fn test_export_failure_releases_line() {
        // The export write succeeds but no gpio17 directory appears, so
        // configuring the direction fails and the drop path must unexport.
        let dir = tempfile::tempdir().unwrap();

        let result = SysfsGpioSensor::open(dir.path(), 17, false);
        assert!(matches!(result, Err(SensorError::Direction { pin: 17, .. })));
        assert_eq!(fs::read_to_string(dir.path().join("export")).unwrap(), "17");
        assert_eq!(fs::read_to_string(dir.path().join("unexport")).unwrap(), "17");
    }

    #[test]
    fn test_missing_root_is_export_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = SysfsGpioSensor::open(dir.path().join("nope"), 17, false);
        assert!(matches!(result, Err(SensorError::Export { .. })));
    }
}
