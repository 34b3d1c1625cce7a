//! Sensor access: the calibrated gateway and the two cache tiers above it.

pub mod cache;
pub mod data;
pub mod gateway;

pub use cache::{CacheTier, TieredCache};
pub use data::{ControlReadings, SensorMap, SensorReading};
pub use gateway::{SensorGateway, SensorOffsets};
