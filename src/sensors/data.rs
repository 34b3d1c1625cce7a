//! Data structures for sensor readings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A calibrated temperature observed on one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    /// One-wire device id (e.g. "28-0316a2794dff")
    pub sensor_id: String,
    /// Temperature in degrees Celsius with the calibration offset applied
    pub temperature_c: f64,
    /// When the hardware produced this value
    pub observed_at: DateTime<Utc>,
    /// Set when this is a last-known-good value served after a failed read
    pub stale: bool,
}

impl SensorReading {
    /// Create a fresh reading observed now.
    pub fn new(sensor_id: impl Into<String>, temperature_c: f64) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            temperature_c,
            observed_at: Utc::now(),
            stale: false,
        }
    }

    /// The same value, flagged as a last-known-good fallback.
    pub fn into_stale(self) -> Self {
        Self {
            stale: true,
            ..self
        }
    }
}

/// Readings of the two sensors the control decision depends on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlReadings {
    pub room: Option<SensorReading>,
    pub safety: Option<SensorReading>,
}

/// All display-tier readings keyed by sensor id.
pub type SensorMap = BTreeMap<String, SensorReading>;
