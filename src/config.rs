// Defaults, topics and the telemetry configuration file
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::motor::control_table::{Field, MotorSpec};
use crate::motor::protocol::MotorId;
use crate::reader::ErrorFlagPolicy;

// Polling loop frequency
pub const LOOP_HZ: u64 = 50;
// The loop period is kept in whole milliseconds
pub const MAX_LOOP_HZ: u64 = 1000;

// Serial defaults for Protocol 1.0 motors
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

// Zenoh topics
pub const TOPIC_TELEMETRY: &str = "servo/telemetry"; // + "/<field>"
pub const TOPIC_HEALTH: &str = "servo/state/health";

/// Topic carrying samples of `field`
pub fn telemetry_topic(field: Field) -> String {
    format!("{}/{}", TOPIC_TELEMETRY, field)
}

/// How the reader talks to the bus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    /// One bulk read for all motors
    #[default]
    Sync,
    /// One read per motor (AX-12A positions)
    Single,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Config lists no motors")]
    NoMotors,

    #[error("Loop rate must be above zero")]
    ZeroRate,

    #[error("Loop rate {hz}Hz is above the {max}Hz limit")]
    RateTooHigh { hz: u64, max: u64 },
}

/// Telemetry setup, usually loaded from a JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub port: String,
    pub baudrate: u32,
    pub loop_hz: u64,
    pub field: Field,
    pub mode: ReadMode,
    pub error_flags: ErrorFlagPolicy,
    pub motors: Vec<MotorSpec>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baudrate: DEFAULT_BAUDRATE,
            loop_hz: LOOP_HZ,
            field: Field::PresentPos,
            mode: ReadMode::default(),
            error_flags: ErrorFlagPolicy::default(),
            motors: Vec::new(),
        }
    }
}

impl TelemetryConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Check what serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.motors.is_empty() {
            return Err(ConfigError::NoMotors);
        }
        if self.loop_hz == 0 {
            return Err(ConfigError::ZeroRate);
        }
        if self.loop_hz > MAX_LOOP_HZ {
            return Err(ConfigError::RateTooHigh {
                hz: self.loop_hz,
                max: MAX_LOOP_HZ,
            });
        }
        Ok(())
    }

    /// Time between two polls
    pub fn loop_period(&self) -> Duration {
        Duration::from_millis(1000 / self.loop_hz)
    }

    pub fn motor_ids(&self) -> Vec<MotorId> {
        self.motors.iter().map(|m| m.id).collect()
    }
}
