//! Driver for the Kaminari lightning detector
//!
//! `GET /status` returns the detector state plus the lightnings recorded
//! since the last poll; `GET /clear` then empties the lightning buffer.
//! Device config: `host`, optional `apikey`. Sensor config: either
//! `lightning_key` (one sample per recorded lightning) or `key` (one sample
//! of the current status).

use super::helpers::{device_config, reported_timestamp, to_decimal};
use super::DeviceDriver;
use crate::pipeline::error::AcquisitionError;
use crate::pipeline::types::{Device, Sample, Sensor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct KaminariConfig {
    host: String,
    apikey: Option<String>,
}

pub struct KaminariDriver {
    client: reqwest::Client,
}

impl KaminariDriver {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn request(&self, device: &Device, target: &str) -> Result<reqwest::Response, AcquisitionError> {
        let config: KaminariConfig = device_config(device)?;
        let url = format!("http://{}/{}", config.host, target);

        let mut request = self.client.get(&url);
        if let Some(apikey) = &config.apikey {
            request = request.header("X-API-Key", apikey.as_str());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(AcquisitionError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl DeviceDriver for KaminariDriver {
    fn kind(&self) -> &'static str {
        "kaminari"
    }

    async fn read_sensors(
        &self,
        device: &Device,
        sensors: &[Arc<Sensor>],
    ) -> Result<Vec<Sample>, AcquisitionError> {
        let json: Value = self.request(device, "status").await?.json().await?;
        let samples = parse_response(&json, sensors, Utc::now())?;

        // Only clear once the lightnings are safely parsed
        self.request(device, "clear").await?.bytes().await?;

        Ok(samples)
    }
}

/// Turn a Kaminari status document into samples
pub fn parse_response(
    json: &Value,
    sensors: &[Arc<Sensor>],
    now: DateTime<Utc>,
) -> Result<Vec<Sample>, AcquisitionError> {
    let mut result = Vec::new();

    let lightnings: &[Value] = match json.get("lightnings") {
        Some(Value::Array(list)) => list.as_slice(),
        None | Some(Value::Null) => &[],
        Some(_) => return Err(AcquisitionError::Parse("'lightnings' is not an array".to_string())),
    };

    for lightning in lightnings {
        let age = lightning
            .get("age")
            .and_then(to_decimal)
            .and_then(|d| d.trunc().to_i64())
            .ok_or_else(|| AcquisitionError::Parse("lightning without 'age'".to_string()))?;
        let ts = reported_timestamp(now, age)?;

        for sensor in sensors {
            let key = match sensor.config.get("lightning_key").and_then(Value::as_str) {
                Some(key) => key,
                None => continue,
            };
            if let Some(value) = lightning.get(key).and_then(to_decimal) {
                result.push(Sample::new(sensor.clone(), ts, value));
            }
        }
    }

    for sensor in sensors {
        let key = match sensor.config.get("key").and_then(Value::as_str) {
            Some(key) => key,
            None => continue,
        };
        if let Some(value) = json.get(key).and_then(to_decimal) {
            result.push(Sample::new(sensor.clone(), now, value));
        }
    }

    Ok(result)
}
