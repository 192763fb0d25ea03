//! # Poll pipeline
//!
//! Periodically polls devices, drops redundant readings and persists the rest.
//!
//! ## Data flow
//!
//! 1. [`scheduler`] fires one trigger per device on its cron schedule
//! 2. [`engine::PollPipeline`] reads the device through its driver
//! 3. [`compaction`] classifies every reading as store or suppress
//! 4. Anchors, then stored readings go to the [`db::SampleStore`]
//! 5. Compaction state is committed for every stored reading
//!
//! Failures end a single cycle and are logged; the next firing retries.
//!
//! ## Schema Reference
//!
//! The SQLite schema lives in `/sql/`:
//! - `device` → [`types::Device`]
//! - `sensor` → [`types::Sensor`]
//! - `sample` → [`types::Sample`]
//!
//! ## Module Organization
//!
//! - `types` - Devices, sensors, samples, compaction policies
//! - `compaction` - Per-sensor store/suppress/anchor state machine
//! - `engine` - One poll cycle of one device
//! - `scheduler` - Cron triggers and the bounded worker pool
//! - `catalog` - Startup snapshot of devices and sensors
//! - `db` - Storage traits and the SQLite implementation
//! - `config` - Environment and CLI settings
//! - `error` - Error types

pub mod catalog;
pub mod compaction;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod types;

// Re-export commonly used types
pub use catalog::{Catalog, RegisteredDevice};
pub use compaction::{CompactionEngine, CompactionState, Decision};
pub use config::{DatabaseSettings, PollerConfig};
pub use db::{DeviceCatalog, SampleStore, SqliteStore};
pub use engine::{CycleReport, PollPipeline};
pub use error::{AcquisitionError, ConfigError, PollError, StoreError};
pub use scheduler::{DeviceTrigger, Scheduler, SchedulerHandle};
pub use types::{CompactionPolicy, Device, DeviceId, Sample, Sensor, SensorId};
