//! Device drivers - acquisition of raw sensor readings
//!
//! Every device type implements [`DeviceDriver`]. The [`DriverRegistry`] maps
//! the `type` tag of a device row to its driver and is built once at startup;
//! supporting a new kind of hardware means adding one more driver here, the
//! poll pipeline stays untouched.
//!
//! Drivers share a single `reqwest::Client` whose timeout guarantees that an
//! unreachable device fails the cycle instead of hanging it.

pub mod aquaero;
pub mod dusty;
pub mod helpers;
pub mod kaminari;

use crate::pipeline::error::{AcquisitionError, ConfigError};
use crate::pipeline::types::{Device, Sample, Sensor};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use aquaero::AquaeroDriver;
pub use dusty::DustyDriver;
pub use kaminari::KaminariDriver;

/// Reads the current values of all sensors of one device
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Type tag this driver is registered under (e.g. `"dusty"`)
    fn kind(&self) -> &'static str;

    /// Read current sensor values
    ///
    /// May legitimately return an empty list when the device has nothing new.
    async fn read_sensors(
        &self,
        device: &Device,
        sensors: &[Arc<Sensor>],
    ) -> Result<Vec<Sample>, AcquisitionError>;
}

/// Lookup table from device type tag to driver
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn DeviceDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all built-in drivers sharing one HTTP client
    pub fn with_defaults(http_timeout: Duration) -> Result<Self, AcquisitionError> {
        let client = reqwest::Client::builder().timeout(http_timeout).build()?;

        let mut registry = Self::new();
        registry.register(Arc::new(AquaeroDriver::new(client.clone())));
        registry.register(Arc::new(DustyDriver::new(client.clone())));
        registry.register(Arc::new(KaminariDriver::new(client)));
        Ok(registry)
    }

    /// Add a driver; a driver with the same kind is replaced
    pub fn register(&mut self, driver: Arc<dyn DeviceDriver>) {
        self.drivers.insert(driver.kind().to_string(), driver);
    }

    /// Resolve the driver for a device
    pub fn resolve(&self, device: &Device) -> Result<Arc<dyn DeviceDriver>, ConfigError> {
        self.drivers
            .get(&device.kind)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownDeviceType {
                device: device.name.clone(),
                kind: device.kind.clone(),
            })
    }

    /// Registered type tags, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}
