//! Cron driven scheduler - one recurring trigger per device
//!
//! Each trigger is its own tokio task: it fires once right after start, then
//! sleeps until the next occurrence of the device's cron schedule. Firing
//! never waits for the poll it dispatches; polls run on a bounded worker pool
//! (a shared semaphore), so a slow device can overlap with its own next cycle.
//! Such an overlapping cycle holds its permit while it waits for the sensor
//! locks of the running one, so a device that is slower than its schedule
//! takes one more permit with every firing until its cycles catch up.
//!
//! A failed or panicking cycle is logged with the device identity and has no
//! effect on the trigger: the next scheduled firing is the only retry.

use super::engine::PollPipeline;
use super::error::ConfigError;
use super::types::{Device, DeviceId};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Recurring trigger of one device, keyed by the device name
#[derive(Debug, Clone)]
pub struct DeviceTrigger {
    pub name: String,
    pub device: DeviceId,
    pub schedule: cron::Schedule,

    /// Schedule as configured, for logging
    pub expr: String,
}

impl DeviceTrigger {
    pub fn for_device(device: &Device) -> Self {
        Self {
            name: device.name.clone(),
            device: device.id,
            schedule: device.schedule.clone(),
            expr: device.schedule_expr.clone(),
        }
    }

    /// First occurrence strictly after `instant`
    pub fn next_after(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&instant).next()
    }
}

pub struct Scheduler {
    pipeline: Arc<PollPipeline>,
    workers: Arc<Semaphore>,
    triggers: BTreeMap<String, DeviceTrigger>,
}

impl Scheduler {
    /// Create a scheduler whose worker pool runs at most `max_concurrent_polls` cycles
    pub fn new(pipeline: Arc<PollPipeline>, max_concurrent_polls: usize) -> Self {
        Self {
            pipeline,
            workers: Arc::new(Semaphore::new(max_concurrent_polls.max(1))),
            triggers: BTreeMap::new(),
        }
    }

    /// Register a trigger; names must be unique
    pub fn register(&mut self, trigger: DeviceTrigger) -> Result<(), ConfigError> {
        if self.triggers.contains_key(&trigger.name) {
            return Err(ConfigError::DuplicateTrigger(trigger.name));
        }

        log::info!(
            "📅 Registered device {} ({}) with schedule {}",
            trigger.device,
            trigger.name,
            trigger.expr
        );
        self.triggers.insert(trigger.name.clone(), trigger);
        Ok(())
    }

    /// Register a trigger for every device of the pipeline's catalog
    ///
    /// Devices whose trigger cannot be registered are logged and skipped.
    /// Returns the number of registered triggers.
    pub fn register_catalog(&mut self) -> usize {
        let triggers: Vec<DeviceTrigger> = self
            .pipeline
            .catalog()
            .devices()
            .map(|entry| DeviceTrigger::for_device(&entry.device))
            .collect();

        for trigger in triggers {
            let device = trigger.device;
            if let Err(e) = self.register(trigger) {
                log::warn!("Skipping device {}: {}", device, e);
            }
        }

        self.triggers.len()
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }

    /// Spawn one task per trigger
    pub fn start(self) -> SchedulerHandle {
        let tasks = self
            .triggers
            .into_values()
            .map(|trigger| {
                let pipeline = self.pipeline.clone();
                let workers = self.workers.clone();
                tokio::spawn(run_trigger(trigger, pipeline, workers))
            })
            .collect();

        SchedulerHandle { tasks }
    }
}

/// Running triggers; dropping the handle leaves them running
pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn trigger_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stop all triggers; cycles already dispatched run to completion
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        log::info!("Scheduler stopped ({} triggers)", self.tasks.len());
    }
}

async fn run_trigger(trigger: DeviceTrigger, pipeline: Arc<PollPipeline>, workers: Arc<Semaphore>) {
    let mut previous = Utc::now();

    loop {
        dispatch(&trigger, &pipeline, &workers);

        // Never compute from before the last firing, the wall clock may lag the timer
        let now = Utc::now().max(previous);
        let next = match trigger.next_after(now) {
            Some(next) => next,
            None => {
                log::warn!(
                    "Schedule of device {} ({}) has no further occurrences",
                    trigger.device,
                    trigger.name
                );
                return;
            }
        };

        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;
        previous = next;
    }
}

fn dispatch(trigger: &DeviceTrigger, pipeline: &Arc<PollPipeline>, workers: &Arc<Semaphore>) {
    let pipeline = pipeline.clone();
    let workers = workers.clone();
    let device = trigger.device;
    let name = trigger.name.clone();

    tokio::spawn(async move {
        let _permit = match workers.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let cycle = tokio::spawn(async move { pipeline.run_cycle(device).await });

        match cycle.await {
            Ok(Ok(report)) => log::debug!("Poll of {} finished: {}", name, report),
            Ok(Err(e)) => log::error!("❌ Poll of device {} ({}) failed: {}", device, name, e),
            Err(e) if e.is_panic() => log::error!("❌ Poll of device {} ({}) panicked", device, name),
            Err(_) => log::debug!("Poll of device {} ({}) cancelled", device, name),
        }
    });
}
