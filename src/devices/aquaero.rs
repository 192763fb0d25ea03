//! Driver for Aquaero fan controllers, read through a pyquaero server
//!
//! Device config: `host`, `port`. Sensor config: `type` (path to the data
//! array, separated by `/` or `.`), `index` into that array and `value`, the
//! key inside the selected entry.

use super::helpers::{config_str, config_u64, device_config, response_decimal};
use super::DeviceDriver;
use crate::pipeline::error::AcquisitionError;
use crate::pipeline::types::{Device, Sample, Sensor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct AquaeroConfig {
    host: String,
    port: u16,
}

pub struct AquaeroDriver {
    client: reqwest::Client,
}

impl AquaeroDriver {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeviceDriver for AquaeroDriver {
    fn kind(&self) -> &'static str {
        "aquaero"
    }

    async fn read_sensors(
        &self,
        device: &Device,
        sensors: &[Arc<Sensor>],
    ) -> Result<Vec<Sample>, AcquisitionError> {
        let config: AquaeroConfig = device_config(device)?;
        let url = format!("http://{}:{}/status", config.host, config.port);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AcquisitionError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        let json: Value = response.json().await?;
        parse_response(&json, sensors)
    }
}

/// Turn a pyquaero status document into samples
///
/// The controller reports its own local time without zone; it is taken as UTC.
pub fn parse_response(json: &Value, sensors: &[Arc<Sensor>]) -> Result<Vec<Sample>, AcquisitionError> {
    let time = json
        .get("time")
        .and_then(Value::as_str)
        .ok_or_else(|| AcquisitionError::Parse("missing 'time'".to_string()))?;
    let ts = DateTime::parse_from_rfc3339(&format!("{}Z", time))
        .map_err(|e| AcquisitionError::Parse(format!("bad time '{}': {}", time, e)))?
        .with_timezone(&Utc);

    let mut result = Vec::with_capacity(sensors.len());
    for sensor in sensors {
        let entity = format!("sensor {}", sensor.name);
        let path = config_str(&sensor.config, "type", &entity)?;
        let index = config_u64(&sensor.config, "index", &entity)? as usize;
        let key = config_str(&sensor.config, "value", &entity)?;

        let entry = locate(json, path)?
            .get(index)
            .ok_or_else(|| AcquisitionError::Parse(format!("no entry {} in '{}'", index, path)))?;
        let value = response_decimal(entry, key)?;

        // A Raspberry Pi 1 running pyquaero occasionally misreads the
        // controller and reports 0; such a poll is discarded entirely.
        if value.is_zero() {
            log::debug!("Aquaero reported 0 for sensor {}, discarding poll", sensor.name);
            return Ok(Vec::new());
        }

        result.push(Sample::new(sensor.clone(), ts, value));
    }

    Ok(result)
}

fn locate<'a>(json: &'a Value, path: &str) -> Result<&'a Vec<Value>, AcquisitionError> {
    let parts: Vec<&str> = path.split(['/', '.']).collect();
    let (last, parents) = parts
        .split_last()
        .ok_or_else(|| AcquisitionError::Parse("empty sensor path".to_string()))?;

    let mut current = json;
    for part in parents {
        current = current
            .get(*part)
            .ok_or_else(|| AcquisitionError::Parse(format!("no object '{}' in '{}'", part, path)))?;
    }

    current
        .get(*last)
        .and_then(Value::as_array)
        .ok_or_else(|| AcquisitionError::Parse(format!("no array '{}' in '{}'", last, path)))
}
