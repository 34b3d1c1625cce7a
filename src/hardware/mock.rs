//! In-memory hardware backend for tests and development hosts.
//!
//! Records every read and output write so tests can assert on exactly how
//! often the bus was touched and what the relays were told.

use super::{HardwareBackend, OutputChannel};
use crate::error::{Result, SensorError, ThermoError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
enum MockSensor {
    Celsius(f64),
    Failing(SensorError),
}

#[derive(Default)]
struct MockState {
    sensors: BTreeMap<String, MockSensor>,
    reads: HashMap<String, usize>,
    outputs: HashMap<OutputChannel, bool>,
    writes: Vec<(OutputChannel, bool)>,
    failing_outputs: Vec<OutputChannel>,
}

/// Mock backend with programmable temperatures and failures.
pub struct MockBackend {
    state: Mutex<MockState>,
    read_delay: Mutex<Duration>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create an empty mock bus.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            read_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Mock bus populated with the two development sensors.
    pub fn with_demo_sensors() -> Self {
        let backend = Self::new();
        backend.set_temperature("28-mock001", 12.0);
        backend.set_temperature("28-mock002", 20.0);
        backend
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simulate the time a physical conversion takes.
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Attach (or update) a sensor reporting the given raw temperature.
    pub fn set_temperature(&self, sensor_id: &str, celsius: f64) {
        self.state()
            .sensors
            .insert(sensor_id.to_string(), MockSensor::Celsius(celsius));
    }

    /// Make every subsequent read of this sensor fail with `error`.
    pub fn fail_sensor(&self, sensor_id: &str, error: SensorError) {
        self.state()
            .sensors
            .insert(sensor_id.to_string(), MockSensor::Failing(error));
    }

    /// Detach a sensor from the bus; reads report `NotFound`.
    pub fn remove_sensor(&self, sensor_id: &str) {
        self.state().sensors.remove(sensor_id);
    }

    /// Make writes to one output channel fail.
    pub fn fail_output(&self, channel: OutputChannel) {
        self.state().failing_outputs.push(channel);
    }

    /// Number of physical reads issued for a sensor.
    pub fn read_count(&self, sensor_id: &str) -> usize {
        self.state().reads.get(sensor_id).copied().unwrap_or(0)
    }

    /// Number of physical reads issued across all sensors.
    pub fn total_reads(&self) -> usize {
        self.state().reads.values().sum()
    }

    /// Last level written to an output; `None` if never written.
    pub fn output(&self, channel: OutputChannel) -> Option<bool> {
        self.state().outputs.get(&channel).copied()
    }

    /// Every output write in order.
    pub fn writes(&self) -> Vec<(OutputChannel, bool)> {
        self.state().writes.clone()
    }
}

#[async_trait]
impl HardwareBackend for MockBackend {
    async fn read_celsius(&self, sensor_id: &str) -> std::result::Result<f64, SensorError> {
        let sensor = {
            let mut state = self.state();
            *state.reads.entry(sensor_id.to_string()).or_insert(0) += 1;
            state.sensors.get(sensor_id).cloned()
        };

        let delay = *self.read_delay.lock().unwrap_or_else(|e| e.into_inner());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match sensor {
            Some(MockSensor::Celsius(celsius)) => Ok(celsius),
            Some(MockSensor::Failing(error)) => Err(error),
            None => Err(SensorError::not_found(sensor_id)),
        }
    }

    async fn list_sensors(&self) -> Result<Vec<String>> {
        Ok(self.state().sensors.keys().cloned().collect())
    }

    fn set_output(&self, channel: OutputChannel, on: bool) -> Result<()> {
        let mut state = self.state();
        if state.failing_outputs.contains(&channel) {
            return Err(ThermoError::hardware_error(format!(
                "simulated failure driving {} relay",
                channel
            )));
        }
        state.outputs.insert(channel, on);
        state.writes.push((channel, on));
        Ok(())
    }
}
