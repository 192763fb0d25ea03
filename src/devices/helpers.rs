//! Small helpers shared by the JSON based drivers

use crate::pipeline::error::{AcquisitionError, ConfigError};
use crate::pipeline::types::Device;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::str::FromStr;

/// Deserialize the config object of a device into the driver's config type
pub fn device_config<T: DeserializeOwned>(device: &Device) -> Result<T, ConfigError> {
    T::deserialize(&device.config).map_err(|e| ConfigError::InvalidJson {
        entity: format!("device {}", device.name),
        message: e.to_string(),
    })
}

/// Required string key of a config object
pub fn config_str<'a>(config: &'a Value, key: &str, entity: &str) -> Result<&'a str, ConfigError> {
    config
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| missing(key, entity))
}

/// Required integer key of a config object
pub fn config_u64(config: &Value, key: &str, entity: &str) -> Result<u64, ConfigError> {
    config
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| missing(key, entity))
}

/// Optional decimal key of a config object (number or numeric string)
pub fn config_decimal(config: &Value, key: &str, entity: &str) -> Result<Option<Decimal>, ConfigError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => to_decimal(v).map(Some).ok_or_else(|| missing(key, entity)),
    }
}

fn missing(key: &str, entity: &str) -> ConfigError {
    ConfigError::MissingKey {
        entity: entity.to_string(),
        key: key.to_string(),
    }
}

/// Convert a JSON number or numeric string to a decimal, keeping its precision
pub fn to_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Convert a computed float to a decimal rounded half-up to 2 places
///
/// Returns `None` for NaN and infinite results.
pub fn rounded(value: f64) -> Option<Decimal> {
    Decimal::from_f64(value).map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

/// Required decimal field of a device response
pub fn response_decimal(value: &Value, key: &str) -> Result<Decimal, AcquisitionError> {
    value
        .get(key)
        .and_then(to_decimal)
        .ok_or_else(|| AcquisitionError::Parse(format!("missing numeric field '{}'", key)))
}

/// Timestamp of a reading that is `age_secs` old, truncated to 2 second slots
///
/// Devices that only report the age of their last measurement have clocks
/// that are not synchronized with ours. Rounding to even seconds makes
/// repeated polls of the same measurement map to the same timestamp, which
/// the idempotent sample store then ignores.
///
/// Returns `None` if the age is out of the representable time range.
pub fn aged_timestamp(now: DateTime<Utc>, age_secs: i64) -> Option<DateTime<Utc>> {
    let measured = Duration::try_seconds(age_secs).and_then(|age| now.checked_sub_signed(age))?;
    let slot = ((measured.timestamp() + 1) / 2) * 2;
    DateTime::from_timestamp(slot, 0)
}

/// [`aged_timestamp`] for a device-reported age, out of range ages are a parse error
pub fn reported_timestamp(now: DateTime<Utc>, age_secs: i64) -> Result<DateTime<Utc>, AcquisitionError> {
    aged_timestamp(now, age_secs)
        .ok_or_else(|| AcquisitionError::Parse(format!("age {} out of range", age_secs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_to_decimal_accepts_numbers_and_strings() {
        assert_eq!(to_decimal(&json!(12)), Some(Decimal::from(12)));
        assert_eq!(to_decimal(&json!("21.40")), Decimal::from_str("21.4").ok());
        assert_eq!(to_decimal(&json!(" 3.5 ")), Decimal::from_str("3.5").ok());
        assert_eq!(to_decimal(&json!(true)), None);
        assert_eq!(to_decimal(&json!("n/a")), None);
    }

    #[test]
    fn test_to_decimal_keeps_scale() {
        let d = to_decimal(&json!("5.00")).unwrap();
        assert_eq!(d.scale(), 2);
        assert_eq!(d, Decimal::from(5));
    }

    #[test]
    fn test_rounded_half_up() {
        assert_eq!(rounded(1.005_f64 + 1e-9), Decimal::from_str("1.01").ok());
        assert_eq!(rounded(2.344), Decimal::from_str("2.34").ok());
        assert_eq!(rounded(f64::NAN), None);
    }

    #[test]
    fn test_aged_timestamp_truncates_to_even_seconds() {
        let now = Utc.timestamp_opt(1_700_000_011, 0).unwrap();

        // 1_700_000_011 - 4 = 1_700_000_007 -> (7 + 1) / 2 * 2 = 8
        assert_eq!(aged_timestamp(now, 4).unwrap().timestamp(), 1_700_000_008);
        // Even results stay put
        assert_eq!(aged_timestamp(now, 5).unwrap().timestamp(), 1_700_000_006);
    }

    #[test]
    fn test_aged_timestamp_out_of_range() {
        let now = Utc.timestamp_opt(1_700_000_011, 0).unwrap();

        assert_eq!(aged_timestamp(now, i64::MAX), None);
        assert_eq!(aged_timestamp(now, 10_000_000_000_000_000), None);
        // Valid duration, but before the earliest representable date
        assert_eq!(aged_timestamp(now, 1_000_000_000_000_000), None);
        assert!(matches!(
            reported_timestamp(now, -10_000_000_000_000_000),
            Err(AcquisitionError::Parse(_))
        ));
    }

    #[test]
    fn test_config_accessors() {
        let config = json!({"host": "10.0.0.5", "port": 8080, "divisor": "10"});

        assert_eq!(config_str(&config, "host", "device x").unwrap(), "10.0.0.5");
        assert_eq!(config_u64(&config, "port", "device x").unwrap(), 8080);
        assert_eq!(
            config_decimal(&config, "divisor", "sensor y").unwrap(),
            Some(Decimal::from(10))
        );
        assert_eq!(config_decimal(&config, "height", "sensor y").unwrap(), None);

        let err = config_str(&config, "apikey", "device x").unwrap_err();
        assert_eq!(err.to_string(), "Missing or invalid config key 'apikey' for device x");
    }

    #[derive(Debug, serde::Deserialize)]
    struct HostPort {
        host: String,
        port: u16,
    }

    #[test]
    fn test_device_config() {
        let mut device = Device {
            id: crate::pipeline::types::DeviceId(4),
            name: "pump".to_string(),
            kind: "aquaero".to_string(),
            schedule: cron::Schedule::from_str("0 * * * * *").unwrap(),
            schedule_expr: "0 * * * * *".to_string(),
            config: json!({"host": "10.0.0.9", "port": 8001, "extra": true}),
        };

        let config: HostPort = device_config(&device).unwrap();
        assert_eq!((config.host.as_str(), config.port), ("10.0.0.9", 8001));

        device.config = json!({"host": "10.0.0.9"});
        let err = device_config::<HostPort>(&device).unwrap_err();
        assert!(err.to_string().starts_with("Bad config JSON for device pump"));
    }
}
