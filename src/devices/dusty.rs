//! Driver for luftdaten.info particulate sensors ("dusty")
//!
//! Besides the particulate readings, the device reports whatever else is
//! attached (temperature, humidity, air pressure). Sensor config:
//! - `value_type` (required): key in `sensordatavalues`
//! - `divisor`: divide the raw value (e.g. Pa -> hPa)
//! - `height`: convert absolute to relative pressure, meters above sea level
//! - `dewpoint`: compute the dew point from this temperature and `humidity`

use super::helpers::{
    config_decimal, config_str, config_u64, device_config, reported_timestamp, rounded, to_decimal,
};
use super::DeviceDriver;
use crate::pipeline::error::AcquisitionError;
use crate::pipeline::types::{Device, Sample, Sensor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct DustyConfig {
    host: String,
}

pub struct DustyDriver {
    client: reqwest::Client,
}

impl DustyDriver {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeviceDriver for DustyDriver {
    fn kind(&self) -> &'static str {
        "dusty"
    }

    async fn read_sensors(
        &self,
        device: &Device,
        sensors: &[Arc<Sensor>],
    ) -> Result<Vec<Sample>, AcquisitionError> {
        let config: DustyConfig = device_config(device)?;
        let url = format!("http://{}/data.json", config.host);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AcquisitionError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        let json: Value = response.json().await?;
        parse_response(&json, sensors, Utc::now())
    }
}

/// Turn a `data.json` document into samples for the given sensors
pub fn parse_response(
    json: &Value,
    sensors: &[Arc<Sensor>],
    now: DateTime<Utc>,
) -> Result<Vec<Sample>, AcquisitionError> {
    let age = json
        .get("age")
        .and_then(to_decimal)
        .and_then(|d| d.trunc().to_i64())
        .ok_or_else(|| AcquisitionError::Parse("missing 'age'".to_string()))?;
    let ts = reported_timestamp(now, age)?;

    let values = json
        .get("sensordatavalues")
        .and_then(Value::as_array)
        .ok_or_else(|| AcquisitionError::Parse("missing 'sensordatavalues'".to_string()))?;

    let mut result = Vec::new();
    for sensor in sensors {
        if let Some(value) = sensor_value(values, sensor)? {
            result.push(Sample::new(sensor.clone(), ts, value));
        }
    }
    Ok(result)
}

fn sensor_value(values: &[Value], sensor: &Sensor) -> Result<Option<Decimal>, AcquisitionError> {
    let entity = format!("sensor {}", sensor.name);
    let config = &sensor.config;

    let key = config_str(config, "value_type", &entity)?;
    let mut result = find_value(values, key);

    if let Some(divisor) = config_decimal(config, "divisor", &entity)? {
        result = match result {
            Some(v) => Some(v.checked_div(divisor).ok_or_else(|| {
                AcquisitionError::Parse(format!("cannot divide {} by {} for {}", v, divisor, entity))
            })?),
            None => None,
        };
    }

    if config.get("height").is_some() {
        let height = config_u64(config, "height", &entity)?;
        let temp = match find_value(values, "BMP_temperature").and_then(|t| t.to_f64()) {
            Some(temp) => temp,
            None => return Ok(None),
        };
        result = result
            .and_then(|v| v.to_f64())
            .and_then(|v| rounded(relative_pressure(v, temp, height as f64)));
    }

    if config.get("dewpoint").and_then(Value::as_bool) == Some(true) {
        let humidity = match find_value(values, "humidity") {
            Some(h) if !h.is_zero() => h.to_f64(),
            // Zero humidity would give an infinite dew point
            _ => return Ok(None),
        };
        result = match (result.and_then(|v| v.to_f64()), humidity) {
            (Some(temp), Some(humid)) => rounded(dewpoint(temp, humid)),
            _ => None,
        };
    }

    Ok(result)
}

fn find_value(values: &[Value], key: &str) -> Option<Decimal> {
    values
        .iter()
        .find(|v| v.get("value_type").and_then(Value::as_str) == Some(key))
        .and_then(|v| v.get("value"))
        .and_then(to_decimal)
}

/// Absolute pressure (mbar) at `height` meters to sea-level pressure
fn relative_pressure(absolute: f64, temperature: f64, height: f64) -> f64 {
    absolute * (1.0 - (0.0065 * height) / (temperature + 0.0065 * height + 273.15)).powf(-5.257)
}

/// Magnus formula, temperature in °C and relative humidity in percent
fn dewpoint(temp: f64, humid: f64) -> f64 {
    const K2: f64 = 17.62;
    const K3: f64 = 243.12;

    let d1 = (K2 * temp) / (K3 + temp) + (humid / 100.0).ln();
    let d2 = (K2 * K3) / (K3 + temp) - (humid / 100.0).ln();
    K3 * (d1 / d2)
}
