//! Calibrated, time-bounded access to the one-wire sensors.

use crate::error::{Result, SensorError, ThermoError};
use crate::hardware::HardwareBackend;
use crate::sensors::data::SensorReading;
use crate::storage::{PersistentStore, SENSOR_OFFSETS_KEY};
use crate::watchdog::WatchdogMonitor;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Sensor id to calibration offset in degrees Celsius.
pub type SensorOffsets = HashMap<String, f64>;

/// Single entry point for physical sensor reads.
///
/// The bus supports only one conversion at a time, so every read goes through
/// `bus`; the gateway never retries, that policy belongs to the caches.
pub struct SensorGateway {
    backend: Arc<dyn HardwareBackend>,
    store: Arc<PersistentStore>,
    watchdog: Arc<WatchdogMonitor>,
    offsets: RwLock<SensorOffsets>,
    bus: Mutex<()>,
    read_timeout: Duration,
}

impl SensorGateway {
    /// Create a gateway; calibration offsets are loaded once here.
    pub fn new(
        backend: Arc<dyn HardwareBackend>,
        store: Arc<PersistentStore>,
        watchdog: Arc<WatchdogMonitor>,
        read_timeout: Duration,
    ) -> Self {
        let offsets: SensorOffsets = store.load(SENSOR_OFFSETS_KEY);
        debug!("Loaded calibration offsets for {} sensors", offsets.len());

        Self {
            backend,
            store,
            watchdog,
            offsets: RwLock::new(offsets),
            bus: Mutex::new(()),
            read_timeout,
        }
    }

    pub fn backend(&self) -> &Arc<dyn HardwareBackend> {
        &self.backend
    }

    /// Read one sensor and apply its calibration offset.
    pub async fn read(&self, sensor_id: &str) -> std::result::Result<SensorReading, SensorError> {
        let raw = {
            let _bus = self.bus.lock().await;
            let result =
                tokio::time::timeout(self.read_timeout, self.backend.read_celsius(sensor_id)).await;
            self.watchdog.record_access();
            match result {
                Ok(result) => result,
                Err(_) => Err(SensorError::Timeout {
                    sensor_id: sensor_id.to_string(),
                    after_ms: self.read_timeout.as_millis() as u64,
                }),
            }
        };

        let celsius = match raw {
            Ok(celsius) => celsius,
            Err(e) => {
                debug!("Read of {} failed: {}", sensor_id, e);
                return Err(e);
            }
        };
        if !celsius.is_finite() {
            return Err(SensorError::parse(sensor_id, "non-finite temperature"));
        }

        Ok(SensorReading::new(sensor_id, celsius + self.offset(sensor_id)))
    }

    /// Calibration offset applied to `sensor_id`.
    pub fn offset(&self, sensor_id: &str) -> f64 {
        self.offsets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(sensor_id)
            .copied()
            .unwrap_or(0.0)
    }

    /// All configured calibration offsets.
    pub fn offsets(&self) -> SensorOffsets {
        self.offsets.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Persist a new offset for one sensor, then apply it to later reads.
    pub fn set_offset(&self, sensor_id: &str, offset: f64) -> Result<()> {
        if sensor_id.trim().is_empty() {
            return Err(ThermoError::invalid_settings("sensorId is required"));
        }
        if !offset.is_finite() {
            return Err(ThermoError::invalid_settings(format!(
                "offset for {} must be a finite number",
                sensor_id
            )));
        }

        let mut updated = self.offsets();
        updated.insert(sensor_id.to_string(), offset);
        self.store.save(SENSOR_OFFSETS_KEY, &updated)?;

        *self.offsets.write().unwrap_or_else(|e| e.into_inner()) = updated;
        info!("Calibration offset for {} set to {:+.3}", sensor_id, offset);
        Ok(())
    }

    /// Re-read the offsets document, discarding the in-memory copy.
    pub fn reload_offsets(&self) {
        let offsets: SensorOffsets = self.store.load(SENSOR_OFFSETS_KEY);
        *self.offsets.write().unwrap_or_else(|e| e.into_inner()) = offsets;
    }

    /// Sensor ids currently present on the bus.
    pub async fn discover(&self) -> Result<Vec<String>> {
        self.backend.list_sensors().await
    }
}
