//! Controller configuration.
//!
//! Pin numbers, sensor roles and timing are deployment concerns; the binary
//! fills a [`ThermoConfig`] from its command line and hands it to
//! [`ThermoService::start`](crate::ThermoService::start).

use crate::error::{Result, ThermoError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Safe operating range and heating block thresholds for the safety sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Below this the zone is considered out of range and relays are forced off
    pub min_c: f64,
    /// Above this the zone is considered out of range and relays are forced off
    pub max_c: f64,
    /// Heating is blocked once the safety sensor reaches this value
    pub heat_block_above_c: f64,
    /// Heating is allowed again once the safety sensor drops to this value
    pub heat_resume_below_c: f64,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            min_c: -10.0,
            max_c: 45.0,
            heat_block_above_c: 28.0,
            heat_resume_below_c: 25.0,
        }
    }
}

impl SafetyLimits {
    /// Whether a safety reading lies inside the operating range.
    pub fn in_range(&self, celsius: f64) -> bool {
        celsius.is_finite() && celsius >= self.min_c && celsius <= self.max_c
    }
}

/// BCM pin numbers of the three relay outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayPins {
    pub heating: u8,
    pub cooling: u8,
    pub light: u8,
}

impl Default for RelayPins {
    fn default() -> Self {
        Self {
            heating: 17,
            cooling: 27,
            light: 22,
        }
    }
}

/// Configuration for the sensor and control subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThermoConfig {
    /// Directory holding the persisted JSON documents and the history log
    pub data_dir: PathBuf,
    /// Root of the one-wire sysfs tree
    pub w1_base_dir: PathBuf,
    /// Sensors served by the display tier; empty means discover at start-up
    pub sensor_ids: Vec<String>,
    /// Room sensor used when no settings document exists yet
    pub room_sensor_id: String,
    /// Safety sensor used when no settings document exists yet
    pub safety_sensor_id: String,
    /// Target used when no settings document exists yet
    pub default_target_c: f64,
    /// Deadband used when no settings document exists yet
    pub default_deadband_c: f64,
    /// Control-tier TTL, also the control loop period
    pub control_ttl_ms: u64,
    /// Display-tier TTL
    pub display_ttl_ms: u64,
    /// Upper bound on a single hardware read
    pub read_timeout_ms: u64,
    /// Oldest last-known-good value a cache may serve after a failed read
    pub max_staleness_ms: u64,
    /// Watchdog reports unhealthy after this long without sensor access
    pub watchdog_threshold_secs: u64,
    /// Minimum spacing between history appends
    pub history_interval_secs: u64,
    /// Consecutive ticks without control readings before forcing relays off
    pub missing_tick_limit: u32,
    pub safety: SafetyLimits,
    pub pins: RelayPins,
}

impl Default for ThermoConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            w1_base_dir: PathBuf::from(crate::DEFAULT_W1_BASE_DIR),
            sensor_ids: Vec::new(),
            room_sensor_id: String::new(),
            safety_sensor_id: String::new(),
            default_target_c: 12.0,
            default_deadband_c: 0.5,
            control_ttl_ms: crate::DEFAULT_CONTROL_INTERVAL_MS,
            display_ttl_ms: 10_000,
            read_timeout_ms: 1_500,
            max_staleness_ms: 60_000,
            watchdog_threshold_secs: 10,
            history_interval_secs: 60,
            missing_tick_limit: 3,
            safety: SafetyLimits::default(),
            pins: RelayPins::default(),
        }
    }
}

impl ThermoConfig {
    /// Create a configuration rooted at the given data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Set the one-wire sysfs root.
    pub fn with_w1_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.w1_base_dir = dir.into();
        self
    }

    /// Set the sensors served by the display tier.
    pub fn with_sensor_ids(mut self, ids: Vec<String>) -> Self {
        self.sensor_ids = ids;
        self
    }

    /// Set the default room and safety sensor roles.
    pub fn with_control_sensors(
        mut self,
        room: impl Into<String>,
        safety: impl Into<String>,
    ) -> Self {
        self.room_sensor_id = room.into();
        self.safety_sensor_id = safety.into();
        self
    }

    /// Set the control-tier TTL (and loop period) in milliseconds.
    pub fn with_control_ttl_ms(mut self, ms: u64) -> Self {
        self.control_ttl_ms = ms;
        self
    }

    /// Set the display-tier TTL in milliseconds.
    pub fn with_display_ttl_ms(mut self, ms: u64) -> Self {
        self.display_ttl_ms = ms;
        self
    }

    /// Set the hardware read timeout in milliseconds.
    pub fn with_read_timeout_ms(mut self, ms: u64) -> Self {
        self.read_timeout_ms = ms;
        self
    }

    /// Set the staleness ceiling in milliseconds.
    pub fn with_max_staleness_ms(mut self, ms: u64) -> Self {
        self.max_staleness_ms = ms;
        self
    }

    /// Set the watchdog threshold in seconds.
    pub fn with_watchdog_threshold_secs(mut self, secs: u64) -> Self {
        self.watchdog_threshold_secs = secs;
        self
    }

    /// Set the history interval in seconds.
    pub fn with_history_interval_secs(mut self, secs: u64) -> Self {
        self.history_interval_secs = secs;
        self
    }

    /// Set the safety limits.
    pub fn with_safety(mut self, safety: SafetyLimits) -> Self {
        self.safety = safety;
        self
    }

    /// Set the relay pins.
    pub fn with_pins(mut self, pins: RelayPins) -> Self {
        self.pins = pins;
        self
    }

    pub fn control_ttl(&self) -> Duration {
        Duration::from_millis(self.control_ttl_ms)
    }

    pub fn display_ttl(&self) -> Duration {
        Duration::from_millis(self.display_ttl_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn max_staleness(&self) -> Duration {
        Duration::from_millis(self.max_staleness_ms)
    }

    pub fn watchdog_threshold(&self) -> Duration {
        Duration::from_secs(self.watchdog_threshold_secs)
    }

    pub fn history_interval(&self) -> Duration {
        Duration::from_secs(self.history_interval_secs)
    }

    /// Check the configuration for values the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.control_ttl_ms == 0 || self.display_ttl_ms == 0 {
            return Err(ThermoError::config_error("cache TTLs must be non-zero"));
        }
        if self.read_timeout_ms == 0 {
            return Err(ThermoError::config_error("read timeout must be non-zero"));
        }
        if self.watchdog_threshold_secs == 0 {
            return Err(ThermoError::config_error(
                "watchdog threshold must be non-zero",
            ));
        }
        if self.missing_tick_limit == 0 {
            return Err(ThermoError::config_error(
                "missing tick limit must be at least 1",
            ));
        }
        if !self.default_deadband_c.is_finite() || self.default_deadband_c <= 0.0 {
            return Err(ThermoError::config_error("default deadband must be positive"));
        }
        if self.safety.min_c >= self.safety.max_c {
            return Err(ThermoError::config_error(format!(
                "safety range is empty: {} >= {}",
                self.safety.min_c, self.safety.max_c
            )));
        }
        if self.safety.heat_resume_below_c >= self.safety.heat_block_above_c {
            return Err(ThermoError::config_error(
                "heat resume threshold must be below the block threshold",
            ));
        }
        let RelayPins {
            heating,
            cooling,
            light,
        } = self.pins;
        if heating == cooling || heating == light || cooling == light {
            return Err(ThermoError::config_error(format!(
                "relay pins must be distinct (heating {}, cooling {}, light {})",
                heating, cooling, light
            )));
        }
        Ok(())
    }
}
