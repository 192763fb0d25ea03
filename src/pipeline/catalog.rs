//! Startup snapshot of all pollable devices
//!
//! Loaded once from a [`DeviceCatalog`] and read-only afterwards. A device is
//! left out if its row is malformed (bad cron, bad JSON), its type has no
//! driver, or its sensors cannot be listed. A malformed sensor row only drops
//! that sensor.

use super::db::{DeviceCatalog, DeviceRow, SensorRow};
use super::error::{ConfigError, StoreError};
use super::types::{CompactionPolicy, Device, DeviceId, Sensor, SensorId};
use crate::devices::{DeviceDriver, DriverRegistry};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

/// A device ready to be polled
#[derive(Clone)]
pub struct RegisteredDevice {
    pub device: Arc<Device>,
    pub sensors: Vec<Arc<Sensor>>,
    pub driver: Arc<dyn DeviceDriver>,
}

#[derive(Clone, Default)]
pub struct Catalog {
    devices: BTreeMap<DeviceId, RegisteredDevice>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every usable device from `source`
    ///
    /// Only a failure to list the devices at all is returned as an error.
    pub fn load(source: &dyn DeviceCatalog, registry: &DriverRegistry) -> Result<Self, StoreError> {
        let mut catalog = Self::new();

        for row in source.list_devices()? {
            let device = match parse_device(&row) {
                Ok(device) => device,
                Err(e) => {
                    log::warn!("Skipping device {} ({}): {}", row.id, row.name, e);
                    continue;
                }
            };

            let driver = match registry.resolve(&device) {
                Ok(driver) => driver,
                Err(e) => {
                    log::warn!("Skipping device {} ({}): {}", device.id, device.name, e);
                    continue;
                }
            };

            let sensor_rows = match source.list_sensors(device.id) {
                Ok(rows) => rows,
                Err(e) => {
                    log::warn!(
                        "Skipping device {} ({}): cannot list sensors: {}",
                        device.id,
                        device.name,
                        e
                    );
                    continue;
                }
            };

            let sensors = sensor_rows
                .iter()
                .filter_map(|row| match parse_sensor(row) {
                    Ok(sensor) => Some(Arc::new(sensor)),
                    Err(e) => {
                        log::warn!("Skipping sensor {} of device {}: {}", row.id, device.name, e);
                        None
                    }
                })
                .collect();

            catalog.insert(RegisteredDevice {
                device: Arc::new(device),
                sensors,
                driver,
            });
        }

        Ok(catalog)
    }

    /// Add or replace a device
    pub fn insert(&mut self, entry: RegisteredDevice) {
        self.devices.insert(entry.device.id, entry);
    }

    pub fn get(&self, id: DeviceId) -> Option<&RegisteredDevice> {
        self.devices.get(&id)
    }

    /// All devices in ascending id order
    pub fn devices(&self) -> impl Iterator<Item = &RegisteredDevice> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Parse a `device` row, validating its schedule and config
pub fn parse_device(row: &DeviceRow) -> Result<Device, ConfigError> {
    let schedule = cron::Schedule::from_str(row.cron.trim()).map_err(|e| ConfigError::Schedule {
        device: row.name.clone(),
        message: e.to_string(),
    })?;

    Ok(Device {
        id: DeviceId(row.id),
        name: row.name.clone(),
        kind: row.kind.clone(),
        schedule,
        schedule_expr: row.cron.clone(),
        config: parse_config(&row.config, &format!("device {}", row.name))?,
    })
}

/// Parse a `sensor` row into a sensor with its compaction policy
pub fn parse_sensor(row: &SensorRow) -> Result<Sensor, ConfigError> {
    let compaction = match (row.compact, row.max_unchanged_secs) {
        (false, _) => CompactionPolicy::Disabled,
        (true, None) => CompactionPolicy::Enabled { max_unchanged: None },
        (true, Some(secs)) => match chrono::Duration::try_seconds(secs).filter(|_| secs > 0) {
            Some(max) => CompactionPolicy::Enabled {
                max_unchanged: Some(max),
            },
            None => {
                return Err(ConfigError::InvalidValue(format!(
                    "max_unchanged_secs of sensor {} must be a positive duration, got {}",
                    row.id, secs
                )))
            }
        },
    };

    Ok(Sensor {
        id: SensorId(row.id),
        device_id: DeviceId(row.device_id),
        name: row.name.clone(),
        unit: row.unit.clone(),
        config: parse_config(&row.config, &format!("sensor {}", row.name))?,
        compaction,
    })
}

fn parse_config(text: &str, entity: &str) -> Result<serde_json::Value, ConfigError> {
    if text.trim().is_empty() {
        return Ok(serde_json::Value::Object(Default::default()));
    }

    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| ConfigError::InvalidJson {
        entity: entity.to_string(),
        message: e.to_string(),
    })?;

    if !value.is_object() {
        return Err(ConfigError::InvalidJson {
            entity: entity.to_string(),
            message: "expected a JSON object".to_string(),
        });
    }
    Ok(value)
}
