use crate::controller::ErrorPolicy;
use doorsight_core::{MatchPolicy, DEFAULT_TOLERANCE};
use doorsight_hw::CaptureSettings;
use serde::Deserialize;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Upper bounds that keep derived deadlines representable.
const MAX_COOLDOWN_SECS: u64 = 24 * 60 * 60;
const MAX_POLL_INTERVAL_MS: u64 = 60_000;
const MAX_CAPTURE_TIMEOUT_MS: u64 = 600_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Still capture backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackend {
    /// `libcamera-still` subprocess (Raspberry Pi camera module).
    #[default]
    Libcamera,
    /// V4L2 device (USB webcam).
    V4l2,
}

impl FromStr for CaptureBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "libcamera" => Ok(CaptureBackend::Libcamera),
            "v4l2" => Ok(CaptureBackend::V4l2),
            other => Err(format!("unknown capture backend {other:?} (expected libcamera or v4l2)")),
        }
    }
}

/// Daemon configuration.
///
/// Built from defaults, then the TOML file named by `DOORSIGHT_CONFIG` (if
/// set), then `DOORSIGHT_*` environment variables.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root folder with one subfolder of reference photos per person.
    pub gallery_dir: PathBuf,
    /// Fixed path the captured photo is written to on every trigger.
    pub image_path: PathBuf,
    /// Directory containing the SCRFD and ArcFace ONNX models.
    pub model_dir: PathBuf,
    /// BCM GPIO pin the motion sensor is wired to.
    pub sensor_pin: u32,
    /// First sysfs GPIO number of the pin's chip. 0 on older kernels; 512 on
    /// Raspberry Pi kernels from 6.6, where BCM 17 is `gpio529`.
    pub gpio_chip_base: u32,
    pub sensor_active_low: bool,
    pub gpio_root: PathBuf,
    pub poll_interval_ms: u64,
    /// Quiet period after each trigger.
    pub cooldown_secs: u64,
    pub capture_backend: CaptureBackend,
    /// V4L2 device path, used with the `v4l2` backend.
    pub camera_device: String,
    pub libcamera_program: String,
    pub capture_width: u32,
    pub capture_height: u32,
    pub capture_timeout_ms: u64,
    /// Frames discarded before a V4L2 still (auto-exposure settling).
    pub warmup_frames: usize,
    /// Maximum Euclidean distance for a positive match.
    pub match_tolerance: f32,
    pub match_policy: MatchPolicy,
    pub error_policy: ErrorPolicy,
    pub telegram_token: String,
    pub telegram_chat_id: String,
    pub telegram_api_base: String,
}

impl Default for Config {
    fn default() -> Self {
        let capture = CaptureSettings::default();
        Self {
            gallery_dir: PathBuf::from("dataset"),
            image_path: std::env::temp_dir().join("doorsight/detected.jpg"),
            model_dir: doorsight_core::default_model_dir(),
            sensor_pin: 17,
            gpio_chip_base: 0,
            sensor_active_low: false,
            gpio_root: PathBuf::from(doorsight_hw::DEFAULT_GPIO_ROOT),
            poll_interval_ms: 100,
            cooldown_secs: 5,
            capture_backend: CaptureBackend::default(),
            camera_device: "/dev/video0".to_string(),
            libcamera_program: "libcamera-still".to_string(),
            capture_width: capture.width,
            capture_height: capture.height,
            capture_timeout_ms: capture.timeout_ms,
            warmup_frames: 4,
            match_tolerance: DEFAULT_TOLERANCE,
            match_policy: MatchPolicy::default(),
            error_policy: ErrorPolicy::default(),
            telegram_token: String::new(),
            telegram_chat_id: String::new(),
            telegram_api_base: "https://api.telegram.org".to_string(),
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using `var` as the environment lookup.
    pub fn load_with(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match var("DOORSIGHT_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(&var)?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self, var: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        env_parse(var, "DOORSIGHT_GALLERY_DIR", &mut self.gallery_dir)?;
        env_parse(var, "DOORSIGHT_IMAGE_PATH", &mut self.image_path)?;
        env_parse(var, "DOORSIGHT_MODEL_DIR", &mut self.model_dir)?;
        env_parse(var, "DOORSIGHT_SENSOR_PIN", &mut self.sensor_pin)?;
        env_parse(var, "DOORSIGHT_GPIO_CHIP_BASE", &mut self.gpio_chip_base)?;
        env_flag(var, "DOORSIGHT_SENSOR_ACTIVE_LOW", &mut self.sensor_active_low)?;
        env_parse(var, "DOORSIGHT_GPIO_ROOT", &mut self.gpio_root)?;
        env_parse(var, "DOORSIGHT_POLL_INTERVAL_MS", &mut self.poll_interval_ms)?;
        env_parse(var, "DOORSIGHT_COOLDOWN_SECS", &mut self.cooldown_secs)?;
        env_parse(var, "DOORSIGHT_CAPTURE_BACKEND", &mut self.capture_backend)?;
        env_parse(var, "DOORSIGHT_CAMERA_DEVICE", &mut self.camera_device)?;
        env_parse(var, "DOORSIGHT_LIBCAMERA_PROGRAM", &mut self.libcamera_program)?;
        env_parse(var, "DOORSIGHT_CAPTURE_WIDTH", &mut self.capture_width)?;
        env_parse(var, "DOORSIGHT_CAPTURE_HEIGHT", &mut self.capture_height)?;
        env_parse(var, "DOORSIGHT_CAPTURE_TIMEOUT_MS", &mut self.capture_timeout_ms)?;
        env_parse(var, "DOORSIGHT_WARMUP_FRAMES", &mut self.warmup_frames)?;
        env_parse(var, "DOORSIGHT_MATCH_TOLERANCE", &mut self.match_tolerance)?;
        env_parse(var, "DOORSIGHT_MATCH_POLICY", &mut self.match_policy)?;
        env_parse(var, "DOORSIGHT_ERROR_POLICY", &mut self.error_policy)?;
        env_parse(var, "DOORSIGHT_TELEGRAM_TOKEN", &mut self.telegram_token)?;
        env_parse(var, "DOORSIGHT_TELEGRAM_CHAT_ID", &mut self.telegram_chat_id)?;
        env_parse(var, "DOORSIGHT_TELEGRAM_API_BASE", &mut self.telegram_api_base)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram_token.trim().is_empty() {
            return Err(ConfigError::Missing("DOORSIGHT_TELEGRAM_TOKEN"));
        }
        if self.telegram_chat_id.trim().is_empty() {
            return Err(ConfigError::Missing("DOORSIGHT_TELEGRAM_CHAT_ID"));
        }
        if !(1..=MAX_POLL_INTERVAL_MS).contains(&self.poll_interval_ms) {
            return Err(invalid(
                "poll_interval_ms",
                format!("must be between 1 and {MAX_POLL_INTERVAL_MS}"),
            ));
        }
        if self.cooldown_secs > MAX_COOLDOWN_SECS {
            return Err(invalid("cooldown_secs", format!("must be at most {MAX_COOLDOWN_SECS}")));
        }
        if !(1..=MAX_CAPTURE_TIMEOUT_MS).contains(&self.capture_timeout_ms) {
            return Err(invalid(
                "capture_timeout_ms",
                format!("must be between 1 and {MAX_CAPTURE_TIMEOUT_MS}"),
            ));
        }
        if self.gpio_chip_base.checked_add(self.sensor_pin).is_none() {
            return Err(invalid("gpio_chip_base", "chip base plus sensor pin overflows"));
        }
        if !self.match_tolerance.is_finite() || self.match_tolerance < 0.0 {
            return Err(invalid("match_tolerance", "must be a non-negative number"));
        }
        if self.capture_width == 0 || self.capture_height == 0 {
            return Err(invalid("capture_width/capture_height", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Sysfs GPIO number of the sensor line.
    pub fn sensor_line(&self) -> u32 {
        self.gpio_chip_base.saturating_add(self.sensor_pin)
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            width: self.capture_width,
            height: self.capture_height,
            timeout_ms: self.capture_timeout_ms,
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join(doorsight_core::SCRFD_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join(doorsight_core::ARCFACE_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

fn invalid(key: &str, message: impl Display) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn env_parse<T>(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(raw) = var(key) {
        *slot = raw.trim().parse().map_err(|e| invalid(key, e))?;
    }
    Ok(())
}

fn env_flag(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut bool) -> Result<(), ConfigError> {
    if let Some(raw) = var(key) {
        *slot = match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => return Err(invalid(key, format!("{other:?} is not a boolean"))),
        };
    }
    Ok(())
}
