//! Fakes shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sensorflow::devices::DeviceDriver;
use sensorflow::pipeline::{
    AcquisitionError, CompactionPolicy, Device, DeviceId, Sample, SampleStore, Sensor, SensorId,
    StoreError,
};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn d(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

pub enum Step {
    Read(Vec<(i64, i64, &'static str)>),
    Fail(&'static str),
    Panic,
}

/// Driver that plays back one step per poll: `(sensor id, secs, value)` readings,
/// an acquisition error or a panic. Once the script is exhausted it repeats `idle`.
pub struct ScriptedDriver {
    steps: Mutex<VecDeque<Step>>,
    idle: Vec<(i64, i64, &'static str)>,
    calls: AtomicUsize,
}

impl ScriptedDriver {
    pub fn new(steps: Vec<Step>) -> Self {
        Self::with_idle(steps, Vec::new())
    }

    pub fn with_idle(steps: Vec<Step>, idle: Vec<(i64, i64, &'static str)>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            idle,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceDriver for ScriptedDriver {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    async fn read_sensors(
        &self,
        _device: &Device,
        sensors: &[Arc<Sensor>],
    ) -> Result<Vec<Sample>, AcquisitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let step = self.steps.lock().unwrap().pop_front();
        let readings = match step {
            Some(Step::Read(readings)) => readings,
            Some(Step::Fail(msg)) => return Err(AcquisitionError::Parse(msg.to_string())),
            Some(Step::Panic) => panic!("driver exploded"),
            None => self.idle.clone(),
        };

        Ok(readings
            .into_iter()
            .map(|(id, secs, value)| {
                let sensor = sensors.iter().find(|s| s.id == SensorId(id)).unwrap();
                Sample::new(sensor.clone(), t(secs), d(value))
            })
            .collect())
    }
}

/// Sample store keeping every batch in memory
#[derive(Default)]
pub struct MemoryStore {
    pub batches: Mutex<Vec<Vec<Sample>>>,
}

impl MemoryStore {
    pub fn stored(&self) -> usize {
        self.batches.lock().unwrap().iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl SampleStore for MemoryStore {
    async fn store_samples(&self, samples: &[Sample]) -> Result<(), StoreError> {
        self.batches.lock().unwrap().push(samples.to_vec());
        Ok(())
    }
}

pub fn device(id: i64, name: &str, cron: &str) -> Arc<Device> {
    Arc::new(Device {
        id: DeviceId(id),
        name: name.to_string(),
        kind: "scripted".to_string(),
        schedule: cron::Schedule::from_str(cron).unwrap(),
        schedule_expr: cron.to_string(),
        config: serde_json::json!({}),
    })
}

pub fn sensor(id: i64, device_id: i64, compaction: CompactionPolicy) -> Arc<Sensor> {
    Arc::new(Sensor {
        id: SensorId(id),
        device_id: DeviceId(device_id),
        name: format!("sensor_{}", id),
        unit: "W".to_string(),
        config: serde_json::json!({}),
        compaction,
    })
}
