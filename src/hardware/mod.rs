//! Hardware capability interface.
//!
//! Everything above this module talks to sensors and relays through
//! [`HardwareBackend`]. Two implementations exist: [`RaspberryPiBackend`]
//! (one-wire sysfs plus GPIO relays) and [`MockBackend`] for tests and
//! development on machines without the hardware attached.

pub mod gpio;
pub mod mock;
pub mod w1;

pub use gpio::RelayOutputs;
pub use mock::MockBackend;
pub use w1::OneWireBus;

use crate::config::RelayPins;
use crate::error::{Result, SensorError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One of the three digital outputs driven by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputChannel {
    Heating,
    Cooling,
    Light,
}

impl OutputChannel {
    pub const ALL: [OutputChannel; 3] = [Self::Heating, Self::Cooling, Self::Light];

    /// BCM pin for this channel.
    pub fn pin(self, pins: &RelayPins) -> u8 {
        match self {
            Self::Heating => pins.heating,
            Self::Cooling => pins.cooling,
            Self::Light => pins.light,
        }
    }
}

impl fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Heating => "heating",
            Self::Cooling => "cooling",
            Self::Light => "light",
        };
        f.write_str(name)
    }
}

/// Trait for the physical sensor bus and relay outputs.
///
/// Reads are raw: calibration, timeouts and bus serialization are applied by
/// [`SensorGateway`](crate::sensors::SensorGateway).
#[async_trait]
pub trait HardwareBackend: Send + Sync {
    /// Read the uncalibrated temperature of one sensor in degrees Celsius.
    async fn read_celsius(&self, sensor_id: &str) -> std::result::Result<f64, SensorError>;

    /// List the sensor ids currently present on the bus.
    async fn list_sensors(&self) -> Result<Vec<String>>;

    /// Drive one output high (`true`) or low (`false`).
    fn set_output(&self, channel: OutputChannel, on: bool) -> Result<()>;
}

/// Raspberry Pi backend: DS18B20 sensors on the kernel one-wire bus and
/// relays on GPIO pins.
pub struct RaspberryPiBackend {
    bus: OneWireBus,
    outputs: RelayOutputs,
}

impl RaspberryPiBackend {
    /// Open the one-wire tree at `w1_base_dir` and claim the relay pins.
    pub fn new(w1_base_dir: impl Into<PathBuf>, pins: RelayPins) -> Result<Self> {
        Ok(Self {
            bus: OneWireBus::new(w1_base_dir),
            outputs: RelayOutputs::new(pins)?,
        })
    }
}

#[async_trait]
impl HardwareBackend for RaspberryPiBackend {
    async fn read_celsius(&self, sensor_id: &str) -> std::result::Result<f64, SensorError> {
        self.bus.read_celsius(sensor_id).await
    }

    async fn list_sensors(&self) -> Result<Vec<String>> {
        self.bus.list_sensors().await
    }

    fn set_output(&self, channel: OutputChannel, on: bool) -> Result<()> {
        self.outputs.set(channel, on)
    }
}
