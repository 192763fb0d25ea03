//! Poll pipeline - one poll cycle of one device
//!
//! ```text
//! run_cycle(device id)
//!     ↓
//! Catalog lookup → DeviceDriver::read_sensors()
//!     ↓
//! CompactionSession::classify()  →  to_store | suppressed
//!     ↓
//! pending anchors (one per sensor, last run reading)
//!     ↓
//! SampleStore: anchors batch, then to_store batch
//!     ↓
//! CompactionSession::commit() for every stored sample
//! ```
//!
//! The compaction session is held from the first `classify` to the last
//! `commit`, so overlapping cycles of the same device serialize per sensor.
//! Errors are returned to the caller; nothing already persisted is undone.

use super::catalog::Catalog;
use super::compaction::{CompactionEngine, CompactionSession, Decision};
use super::db::SampleStore;
use super::error::PollError;
use super::types::{DeviceId, Sample, SensorId};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// What a completed poll cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub device: DeviceId,

    /// Samples returned by the driver
    pub read: usize,

    /// Samples classified `Store` and persisted
    pub stored: usize,

    pub suppressed: usize,

    /// Anchor samples persisted ahead of the stored batch
    pub anchors: usize,
}

impl CycleReport {
    fn empty(device: DeviceId) -> Self {
        Self {
            device,
            read: 0,
            stored: 0,
            suppressed: 0,
            anchors: 0,
        }
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "device {}: read {}, stored {}, suppressed {}, anchors {}",
            self.device, self.read, self.stored, self.suppressed, self.anchors
        )
    }
}

/// Runs poll cycles against the startup catalog
pub struct PollPipeline {
    catalog: Arc<Catalog>,
    compaction: CompactionEngine,
    store: Arc<dyn SampleStore>,
}

impl PollPipeline {
    pub fn new(catalog: Arc<Catalog>, store: Arc<dyn SampleStore>) -> Self {
        Self::with_compaction(catalog, store, CompactionEngine::new())
    }

    /// Create a pipeline around an existing compaction engine (custom clock)
    pub fn with_compaction(
        catalog: Arc<Catalog>,
        store: Arc<dyn SampleStore>,
        compaction: CompactionEngine,
    ) -> Self {
        Self {
            catalog,
            compaction,
            store,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn compaction(&self) -> &CompactionEngine {
        &self.compaction
    }

    /// Poll one device, compact its readings and persist the result
    pub async fn run_cycle(&self, device_id: DeviceId) -> Result<CycleReport, PollError> {
        let entry = self
            .catalog
            .get(device_id)
            .ok_or(PollError::UnknownDevice(device_id))?;

        let samples = entry
            .driver
            .read_sensors(&entry.device, &entry.sensors)
            .await?;

        if let Some(foreign) = samples.iter().find(|s| s.sensor.device_id != device_id) {
            return Err(PollError::ForeignSensor {
                device: device_id,
                sensor: foreign.sensor_id(),
            });
        }

        if samples.is_empty() {
            return Ok(CycleReport::empty(device_id));
        }

        let mut session = self.compaction.session(&samples).await;

        let read = samples.len();
        let mut to_store = Vec::with_capacity(read);
        let mut suppressed = 0;
        for sample in samples {
            match session.classify(&sample) {
                Decision::Store => to_store.push(sample),
                Decision::Suppress => {
                    log::trace!("Suppressed {}", sample);
                    suppressed += 1;
                }
            }
        }

        let anchors = collect_anchors(&session, &to_store);

        if !anchors.is_empty() {
            for anchor in &anchors {
                log::trace!("Anchor {}", anchor);
            }
            self.store.store_samples(&anchors).await?;
        }

        if !to_store.is_empty() {
            self.store.store_samples(&to_store).await?;
        }

        for sample in &to_store {
            session.commit(sample);
        }

        Ok(CycleReport {
            device: device_id,
            read,
            stored: to_store.len(),
            suppressed,
            anchors: anchors.len(),
        })
    }
}

/// Pending anchors for the sensors about to be stored, at most one per sensor
///
/// Evaluated after every sample of the cycle has been classified, so an
/// anchor carries the last unchanged reading seen in this cycle.
fn collect_anchors(session: &CompactionSession<'_>, to_store: &[Sample]) -> Vec<Sample> {
    let mut seen: HashSet<SensorId> = HashSet::new();
    to_store
        .iter()
        .filter(|sample| seen.insert(sample.sensor_id()))
        .filter_map(|sample| session.pending_anchor(sample))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::DeviceDriver;
    use crate::pipeline::catalog::RegisteredDevice;
    use crate::pipeline::error::{AcquisitionError, StoreError};
    use crate::pipeline::types::{CompactionPolicy, Device, Sensor};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::collections::VecDeque;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Driver returning one scripted batch of `(sensor index, secs, value)` per call
    struct ScriptedDriver {
        batches: Mutex<VecDeque<Result<Vec<(usize, i64, &'static str)>, String>>>,
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
            let next = self.batches.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()));
            let batch = next.map_err(AcquisitionError::Parse)?;
            Ok(batch
                .into_iter()
                .map(|(idx, secs, value)| {
                    Sample::new(sensors[idx].clone(), t(secs), Decimal::from_str(value).unwrap())
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        batches: Mutex<Vec<Vec<(SensorId, i64, Decimal)>>>,
        fail: Mutex<bool>,
    }

    #[async_trait]
    impl SampleStore for RecordingStore {
        async fn store_samples(&self, samples: &[Sample]) -> Result<(), StoreError> {
            if *self.fail.lock().unwrap() {
                return Err(StoreError::Task("disk full".to_string()));
            }
            self.batches.lock().unwrap().push(
                samples
                    .iter()
                    .map(|s| (s.sensor_id(), s.timestamp.timestamp() - 1_700_000_000, s.value))
                    .collect(),
            );
            Ok(())
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn d(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn pipeline(
        batches: Vec<Result<Vec<(usize, i64, &'static str)>, String>>,
    ) -> (PollPipeline, Arc<RecordingStore>) {
        let store = Arc::new(RecordingStore::default());
        (pipeline_with_store(batches, store.clone()), store)
    }

    fn pipeline_with_store(
        batches: Vec<Result<Vec<(usize, i64, &'static str)>, String>>,
        store: Arc<dyn SampleStore>,
    ) -> PollPipeline {
        let device = Arc::new(Device {
            id: DeviceId(1),
            name: "garden".to_string(),
            kind: "scripted".to_string(),
            schedule: cron::Schedule::from_str("0 * * * * *").unwrap(),
            schedule_expr: "0 * * * * *".to_string(),
            config: serde_json::json!({}),
        });
        let sensor = |id: i64, compaction| {
            Arc::new(Sensor {
                id: SensorId(id),
                device_id: DeviceId(1),
                name: format!("sensor_{}", id),
                unit: "°C".to_string(),
                config: serde_json::json!({}),
                compaction,
            })
        };

        let mut catalog = Catalog::new();
        catalog.insert(RegisteredDevice {
            device,
            sensors: vec![
                sensor(10, CompactionPolicy::Enabled { max_unchanged: None }),
                sensor(11, CompactionPolicy::Disabled),
            ],
            driver: Arc::new(ScriptedDriver {
                batches: Mutex::new(batches.into()),
            }),
        });

        PollPipeline::with_compaction(
            Arc::new(catalog),
            store,
            CompactionEngine::with_clock(Box::new(|| t(0))),
        )
    }

    /// Store whose first write blocks until released
    #[derive(Default)]
    struct GatedStore {
        armed: AtomicBool,
        entered: Notify,
        release: Notify,
        inner: RecordingStore,
    }

    #[async_trait]
    impl SampleStore for GatedStore {
        async fn store_samples(&self, samples: &[Sample]) -> Result<(), StoreError> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.store_samples(samples).await
        }
    }

    #[tokio::test]
    async fn test_anchor_written_before_changed_value() {
        let (pipeline, store) = pipeline(vec![
            Ok(vec![(0, 1, "10")]),
            Ok(vec![(0, 2, "10")]),
            Ok(vec![(0, 3, "10.00")]),
            Ok(vec![(0, 4, "12")]),
        ]);

        for _ in 0..4 {
            pipeline.run_cycle(DeviceId(1)).await.unwrap();
        }

        let batches = store.batches.lock().unwrap().clone();
        assert_eq!(
            batches,
            vec![
                vec![(SensorId(10), 1, d("10"))],
                vec![(SensorId(10), 3, d("10"))],
                vec![(SensorId(10), 4, d("12"))],
            ]
        );
    }

    #[tokio::test]
    async fn test_one_anchor_per_sensor_per_cycle() {
        let (pipeline, store) = pipeline(vec![
            Ok(vec![(0, 1, "10")]),
            Ok(vec![(0, 2, "10"), (0, 3, "10"), (0, 4, "12"), (0, 5, "13")]),
        ]);

        pipeline.run_cycle(DeviceId(1)).await.unwrap();
        let report = pipeline.run_cycle(DeviceId(1)).await.unwrap();
        assert_eq!((report.stored, report.suppressed, report.anchors), (2, 2, 1));

        let batches = store.batches.lock().unwrap().clone();
        assert_eq!(
            batches,
            vec![
                vec![(SensorId(10), 1, d("10"))],
                vec![(SensorId(10), 3, d("10"))],
                vec![(SensorId(10), 4, d("12")), (SensorId(10), 5, d("13"))],
            ]
        );
    }

    #[tokio::test]
    async fn test_overlapping_cycles_see_each_others_commits() {
        let store = Arc::new(GatedStore::default());
        store.armed.store(true, Ordering::SeqCst);
        let pipeline = Arc::new(pipeline_with_store(
            vec![Ok(vec![(0, 1, "10")]), Ok(vec![(0, 2, "10")])],
            store.clone(),
        ));

        let first = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.run_cycle(DeviceId(1)).await }
        });
        store.entered.notified().await;

        // The second cycle reads, then waits for the sensor lock held by the first
        let second = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.run_cycle(DeviceId(1)).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        store.release.notify_one();
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        assert_eq!((first.stored, first.suppressed), (1, 0));
        assert_eq!((second.stored, second.suppressed), (0, 1));
        assert_eq!(store.inner.batches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cycle_report_counts() {
        let (pipeline, _store) = pipeline(vec![
            Ok(vec![(0, 1, "5"), (1, 1, "7")]),
            Ok(vec![(0, 2, "5"), (1, 2, "7")]),
            Ok(vec![(0, 3, "6"), (1, 3, "7")]),
        ]);

        let first = pipeline.run_cycle(DeviceId(1)).await.unwrap();
        assert_eq!((first.read, first.stored, first.suppressed, first.anchors), (2, 2, 0, 0));

        let second = pipeline.run_cycle(DeviceId(1)).await.unwrap();
        assert_eq!((second.read, second.stored, second.suppressed, second.anchors), (2, 1, 1, 0));

        let third = pipeline.run_cycle(DeviceId(1)).await.unwrap();
        assert_eq!((third.read, third.stored, third.suppressed, third.anchors), (2, 2, 0, 1));
        assert_eq!(third.to_string(), "device 1: read 2, stored 2, suppressed 0, anchors 1");
    }

    #[tokio::test]
    async fn test_empty_read_submits_nothing() {
        let (pipeline, store) = pipeline(vec![Ok(Vec::new())]);

        let report = pipeline.run_cycle(DeviceId(1)).await.unwrap();
        assert_eq!(report, CycleReport::empty(DeviceId(1)));
        assert!(store.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let (pipeline, _store) = pipeline(Vec::new());
        let err = pipeline.run_cycle(DeviceId(99)).await.unwrap_err();
        assert!(matches!(err, PollError::UnknownDevice(DeviceId(99))));
    }

    #[tokio::test]
    async fn test_acquisition_error_leaves_state_untouched() {
        let (pipeline, store) = pipeline(vec![
            Ok(vec![(0, 1, "10")]),
            Err("timeout".to_string()),
            Ok(vec![(0, 3, "11")]),
        ]);

        pipeline.run_cycle(DeviceId(1)).await.unwrap();
        let err = pipeline.run_cycle(DeviceId(1)).await.unwrap_err();
        assert!(matches!(err, PollError::Acquisition(_)));

        let report = pipeline.run_cycle(DeviceId(1)).await.unwrap();
        assert_eq!(report.stored, 1);
        assert_eq!(store.batches.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_store_failure_skips_commit() {
        let (pipeline, store) = pipeline(vec![Ok(vec![(0, 1, "10")]), Ok(vec![(0, 2, "10")])]);

        *store.fail.lock().unwrap() = true;
        let err = pipeline.run_cycle(DeviceId(1)).await.unwrap_err();
        assert!(matches!(err, PollError::Persistence(_)));
        assert_eq!(
            pipeline.compaction().snapshot(SensorId(10)).await.unwrap().last_stored_value,
            None
        );

        // Nothing was committed, so the repeated value is stored again
        *store.fail.lock().unwrap() = false;
        let report = pipeline.run_cycle(DeviceId(1)).await.unwrap();
        assert_eq!(report.stored, 1);
    }
}
