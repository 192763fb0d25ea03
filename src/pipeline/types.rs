//! Core data types shared by the poll pipeline
//!
//! Devices and sensors are loaded once at startup and never change afterwards.
//! Samples are immutable value objects produced by device drivers.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use cron::Schedule;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;

/// Unique device identifier (primary key of the `device` table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub i64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique sensor identifier (primary key of the `sensor` table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SensorId(pub i64);

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A piece of hardware that is polled for sensor readings
///
/// The `kind` tag selects the driver that knows how to talk to the device.
/// `config` is the driver-specific JSON object (host, port, api key, ...).
#[derive(Debug, Clone)]
pub struct Device {
    pub id: DeviceId,

    /// Human-readable name, unique across all devices (used as trigger key)
    pub name: String,

    /// Device type tag, resolved against the driver registry
    pub kind: String,

    /// Parsed poll schedule (6/7 field cron, seconds first)
    pub schedule: Schedule,

    /// Original schedule expression, kept for logging
    pub schedule_expr: String,

    pub config: serde_json::Value,
}

/// How a sensor's readings are reduced before they reach storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionPolicy {
    /// Every reading is stored
    Disabled,

    /// Unchanged readings are suppressed.
    ///
    /// With `max_unchanged` set, an unchanged run is force-stored once it
    /// has lasted that long, which bounds how stale storage can get.
    Enabled { max_unchanged: Option<Duration> },
}

impl CompactionPolicy {
    pub fn is_enabled(&self) -> bool {
        matches!(self, CompactionPolicy::Enabled { .. })
    }

    pub fn max_unchanged(&self) -> Option<Duration> {
        match self {
            CompactionPolicy::Enabled { max_unchanged } => *max_unchanged,
            CompactionPolicy::Disabled => None,
        }
    }
}

/// A single sensor attached to a device
#[derive(Debug, Clone)]
pub struct Sensor {
    pub id: SensorId,
    pub device_id: DeviceId,
    pub name: String,

    /// Physical unit of the readings (e.g. "°C", "hPa")
    pub unit: String,

    /// Driver-specific JSON object describing where to find the value
    pub config: serde_json::Value,

    pub compaction: CompactionPolicy,
}

impl PartialEq for Sensor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Sensor {}

/// The reading of one sensor at one instant
#[derive(Debug, Clone)]
pub struct Sample {
    pub sensor: Arc<Sensor>,
    pub timestamp: DateTime<Utc>,
    pub value: Decimal,
}

impl Sample {
    pub fn new(sensor: Arc<Sensor>, timestamp: DateTime<Utc>, value: Decimal) -> Self {
        Self {
            sensor,
            timestamp,
            value,
        }
    }

    pub fn sensor_id(&self) -> SensorId {
        self.sensor.id
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sensor {} ({}): {} {} @ {}",
            self.sensor.id,
            self.sensor.name,
            self.value.round_dp(2),
            self.sensor.unit,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }
}
