//! Error taxonomy for catalog loading, acquisition, persistence and poll cycles
//!
//! None of these terminate the process. Configuration errors exclude a single
//! device or sensor from scheduling; everything else ends one poll cycle and
//! is logged by the scheduler.

use super::types::{DeviceId, SensorId};

/// Bad device or sensor definition found while loading the catalog
#[derive(Debug)]
pub enum ConfigError {
    /// The cron expression of a device could not be parsed
    Schedule { device: String, message: String },

    /// A device or sensor config column is not a valid JSON object
    InvalidJson { entity: String, message: String },

    /// No driver is registered for the device type tag
    UnknownDeviceType { device: String, kind: String },

    /// Two devices share the same name (trigger key)
    DuplicateTrigger(String),

    /// A required config key is missing or has the wrong type
    MissingKey { entity: String, key: String },

    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Schedule { device, message } => {
                write!(f, "Bad cron expression for device {}: {}", device, message)
            }
            ConfigError::InvalidJson { entity, message } => {
                write!(f, "Bad config JSON for {}: {}", entity, message)
            }
            ConfigError::UnknownDeviceType { device, kind } => {
                write!(f, "Unknown device type '{}' for device {}", kind, device)
            }
            ConfigError::DuplicateTrigger(name) => {
                write!(f, "A trigger named '{}' is already registered", name)
            }
            ConfigError::MissingKey { entity, key } => {
                write!(f, "Missing or invalid config key '{}' for {}", key, entity)
            }
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Device could not be read (unreachable, malformed response, ...)
#[derive(Debug)]
pub enum AcquisitionError {
    Http(reqwest::Error),

    /// Device answered with a non-success HTTP status
    Status { url: String, status: u16 },

    /// Response body did not have the expected shape
    Parse(String),

    /// The driver rejected the device or sensor config
    Config(ConfigError),
}

impl From<reqwest::Error> for AcquisitionError {
    fn from(err: reqwest::Error) -> Self {
        AcquisitionError::Http(err)
    }
}

impl From<ConfigError> for AcquisitionError {
    fn from(err: ConfigError) -> Self {
        AcquisitionError::Config(err)
    }
}

impl std::fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquisitionError::Http(e) => write!(f, "HTTP error: {}", e),
            AcquisitionError::Status { url, status } => {
                write!(f, "Device at {} answered with status {}", url, status)
            }
            AcquisitionError::Parse(msg) => write!(f, "Malformed device response: {}", msg),
            AcquisitionError::Config(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AcquisitionError {}

/// Storage unavailable or a write failed
#[derive(Debug)]
pub enum StoreError {
    Database(rusqlite::Error),
    Io(std::io::Error),

    /// The blocking database task panicked or was cancelled
    Task(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Task(err.to_string())
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::Task(msg) => write!(f, "Database task failed: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Why a single poll cycle ended without completing
#[derive(Debug)]
pub enum PollError {
    /// The device id is not in the startup catalog
    UnknownDevice(DeviceId),

    /// A sample referenced a sensor that does not belong to the polled device
    ForeignSensor { device: DeviceId, sensor: SensorId },

    Configuration(ConfigError),
    Acquisition(AcquisitionError),
    Persistence(StoreError),
}

impl From<ConfigError> for PollError {
    fn from(err: ConfigError) -> Self {
        PollError::Configuration(err)
    }
}

impl From<AcquisitionError> for PollError {
    fn from(err: AcquisitionError) -> Self {
        match err {
            AcquisitionError::Config(e) => PollError::Configuration(e),
            other => PollError::Acquisition(other),
        }
    }
}

impl From<StoreError> for PollError {
    fn from(err: StoreError) -> Self {
        PollError::Persistence(err)
    }
}

impl std::fmt::Display for PollError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollError::UnknownDevice(id) => write!(f, "Device {} is not registered", id),
            PollError::ForeignSensor { device, sensor } => {
                write!(f, "Device {} returned a sample for foreign sensor {}", device, sensor)
            }
            PollError::Configuration(e) => write!(f, "Configuration error: {}", e),
            PollError::Acquisition(e) => write!(f, "Acquisition error: {}", e),
            PollError::Persistence(e) => write!(f, "Persistence error: {}", e),
        }
    }
}

impl std::error::Error for PollError {}
