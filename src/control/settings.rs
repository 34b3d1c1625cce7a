//! Persisted control documents and the published control state.

use crate::config::ThermoConfig;
use crate::error::{Result, ThermoError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Target band and sensor roles, stored under the `settings` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlSettings {
    pub target_c: f64,
    pub deadband_c: f64,
    pub room_sensor_id: String,
    pub safety_sensor_id: String,
}

impl ControlSettings {
    /// Settings used when no document has been saved yet.
    pub fn from_config(config: &ThermoConfig) -> Self {
        Self {
            target_c: config.default_target_c,
            deadband_c: config.default_deadband_c,
            room_sensor_id: config.room_sensor_id.clone(),
            safety_sensor_id: config.safety_sensor_id.clone(),
        }
    }

    /// Reject settings the control loop cannot act on.
    ///
    /// `known_sensors` is the configured sensor set; when it is empty sensor
    /// ids are only checked for being present.
    pub fn validate(&self, known_sensors: &[String]) -> Result<()> {
        if !self.target_c.is_finite() {
            return Err(ThermoError::invalid_settings("targetC must be a finite number"));
        }
        if !self.deadband_c.is_finite() || self.deadband_c <= 0.0 {
            return Err(ThermoError::invalid_settings(format!(
                "deadbandC must be positive, got {}",
                self.deadband_c
            )));
        }
        for (role, id) in [
            ("roomSensorId", &self.room_sensor_id),
            ("safetySensorId", &self.safety_sensor_id),
        ] {
            if id.trim().is_empty() {
                return Err(ThermoError::invalid_settings(format!("{} is required", role)));
            }
            if !known_sensors.is_empty() && !known_sensors.contains(id) {
                return Err(ThermoError::invalid_settings(format!(
                    "{} refers to unknown sensor {}",
                    role, id
                )));
            }
        }
        Ok(())
    }

    /// Overlay the fields present in `patch`.
    pub fn merged(&self, patch: &SettingsPatch) -> Self {
        Self {
            target_c: patch.target_c.unwrap_or(self.target_c),
            deadband_c: patch.deadband_c.unwrap_or(self.deadband_c),
            room_sensor_id: patch
                .room_sensor_id
                .clone()
                .unwrap_or_else(|| self.room_sensor_id.clone()),
            safety_sensor_id: patch
                .safety_sensor_id
                .clone()
                .unwrap_or_else(|| self.safety_sensor_id.clone()),
        }
    }
}

/// Partial settings update as accepted from API clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub target_c: Option<f64>,
    pub deadband_c: Option<f64>,
    pub room_sensor_id: Option<String>,
    pub safety_sensor_id: Option<String>,
}

/// Stored under the `controlEnable` key. Control is on unless switched off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEnable {
    pub enabled: bool,
}

impl Default for ControlEnable {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Stored under the `lightState` key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightState {
    pub on: bool,
}

/// Outcome of the most recent control tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlState {
    pub heating: bool,
    pub cooling: bool,
    pub enabled: bool,
    pub last_decision_at: Option<DateTime<Utc>>,
    /// Heating suppressed because the safety sensor is too warm
    pub heating_blocked: bool,
    /// Relays forced off because control readings are missing or out of range
    pub fail_safe: bool,
}
