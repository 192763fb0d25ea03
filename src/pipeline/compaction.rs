//! Compaction engine - decides which readings reach permanent storage
//!
//! For sensors with compaction enabled, a reading that is numerically equal to
//! the last stored value is suppressed. When the value finally changes, the
//! last suppressed reading is re-emitted as an *anchor* right before the new
//! value, so interpolation downstream starts at the end of the unchanged run
//! instead of its beginning. An optional max-unchanged interval force-stores
//! a run that has lasted too long.
//!
//! ## Concurrency
//!
//! State lives in one table keyed by sensor id. Every entry has its own async
//! mutex. A poll cycle opens a [`CompactionSession`] which holds the locks of
//! all sensors it touches from the first `classify` to the last `commit`, so
//! overlapping cycles of the same device are serialized per sensor while
//! unrelated sensors never contend.

use super::types::{Sample, SensorId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Outcome of classifying a single sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Store,
    Suppress,
}

/// Per-sensor bookkeeping of the compaction state machine
///
/// Invariants:
/// - `last_unchanged_at` is set iff an anchor is pending
/// - `first_unchanged_at` is cleared when a new value is stored
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompactionState {
    pub last_stored_value: Option<Decimal>,
    pub first_unchanged_at: Option<DateTime<Utc>>,
    pub last_unchanged_at: Option<DateTime<Utc>>,
}

impl CompactionState {
    /// Classify a sample of a compacting sensor
    ///
    /// `now` is wall-clock time. The max-unchanged check compares
    /// it (not the sample timestamp) against the start of the run.
    pub fn classify(&mut self, sample: &Sample, now: DateTime<Utc>) -> Decision {
        if !sample.sensor.compaction.is_enabled() {
            return Decision::Store;
        }

        let last = match self.last_stored_value {
            Some(last) => last,
            None => return Decision::Store,
        };

        if last != sample.value {
            return Decision::Store;
        }

        if let (Some(max), Some(first)) = (
            sample.sensor.compaction.max_unchanged(),
            self.first_unchanged_at,
        ) {
            if now >= first + max {
                // Restart the run as if this reading were a new baseline
                self.first_unchanged_at = Some(sample.timestamp);
                self.last_unchanged_at = None;
                return Decision::Store;
            }
        }

        if self.first_unchanged_at.is_none() {
            self.first_unchanged_at = Some(sample.timestamp);
        }
        self.last_unchanged_at = Some(sample.timestamp);
        Decision::Suppress
    }

    /// The last reading of the pending unchanged run, if there is one
    pub fn pending_anchor(&self, sample: &Sample) -> Option<Sample> {
        if !sample.sensor.compaction.is_enabled() {
            return None;
        }

        match (self.last_unchanged_at, self.last_stored_value) {
            (Some(ts), Some(value)) => Some(Sample::new(sample.sensor.clone(), ts, value)),
            _ => None,
        }
    }

    /// Remember a sample that is actually being stored
    pub fn commit(&mut self, sample: &Sample) {
        if !sample.sensor.compaction.is_enabled() {
            return;
        }

        if self.last_stored_value != Some(sample.value) {
            self.first_unchanged_at = None;
        }
        self.last_stored_value = Some(sample.value);
        self.last_unchanged_at = None;
    }
}

type SharedState = Arc<AsyncMutex<CompactionState>>;

/// Lock-guarded state table of all compacting sensors
///
/// Entries are created lazily on first use and live for the whole process.
pub struct CompactionEngine {
    states: Mutex<HashMap<SensorId, SharedState>>,

    /// Wall clock (replaceable for deterministic tests)
    now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl CompactionEngine {
    pub fn new() -> Self {
        Self::with_clock(Box::new(Utc::now))
    }

    /// Create an engine with a custom clock
    pub fn with_clock(now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            now_fn,
        }
    }

    fn entry(&self, sensor: SensorId) -> SharedState {
        // A poisoned table only means another task panicked mid-insert;
        // the map itself is still consistent.
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.entry(sensor).or_default().clone()
    }

    /// Lock the state of every compacting sensor referenced by `samples`
    ///
    /// Locks are taken in ascending sensor id order, so two sessions can
    /// never deadlock on each other.
    pub async fn session(&self, samples: &[Sample]) -> CompactionSession<'_> {
        let ids: BTreeSet<SensorId> = samples
            .iter()
            .filter(|s| s.sensor.compaction.is_enabled())
            .map(|s| s.sensor_id())
            .collect();

        let mut guards = HashMap::with_capacity(ids.len());
        for id in ids {
            let guard = self.entry(id).lock_owned().await;
            guards.insert(id, guard);
        }

        CompactionSession {
            engine: self,
            guards,
        }
    }

    /// Copy of the current state of a sensor (waits for running sessions)
    pub async fn snapshot(&self, sensor: SensorId) -> Option<CompactionState> {
        let entry = {
            let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            states.get(&sensor).cloned()
        }?;
        let state = entry.lock().await;
        Some(state.clone())
    }

    /// Number of sensors with compaction state
    pub fn tracked_sensors(&self) -> usize {
        self.states.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_fn)()
    }
}

impl Default for CompactionEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to the compaction state of a set of sensors
///
/// Dropping the session releases all locks.
pub struct CompactionSession<'a> {
    engine: &'a CompactionEngine,
    guards: HashMap<SensorId, OwnedMutexGuard<CompactionState>>,
}

impl CompactionSession<'_> {
    pub fn classify(&mut self, sample: &Sample) -> Decision {
        if !sample.sensor.compaction.is_enabled() {
            return Decision::Store;
        }

        let now = self.engine.now();
        match self.guards.get_mut(&sample.sensor_id()) {
            Some(state) => state.classify(sample, now),
            None => {
                // Sensor was not part of the session; never drop data for it
                log::warn!(
                    "Sensor {} classified outside its session, storing unconditionally",
                    sample.sensor_id()
                );
                Decision::Store
            }
        }
    }

    pub fn pending_anchor(&self, sample: &Sample) -> Option<Sample> {
        self.guards
            .get(&sample.sensor_id())
            .and_then(|state| state.pending_anchor(sample))
    }

    pub fn commit(&mut self, sample: &Sample) {
        if let Some(state) = self.guards.get_mut(&sample.sensor_id()) {
            state.commit(sample);
        }
    }
}
