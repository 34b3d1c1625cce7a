//! # thermo_pi - One-wire thermostat for Raspberry Pi
//!
//! Reads DS18B20 temperature sensors on the kernel one-wire bus and holds one
//! zone inside a target band by driving heating and cooling relays, with a
//! third relay for a light. A small JSON API exposes readings, settings and
//! history.
//!
//! ## Features
//!
//! - **Tiered sensor cache**: a fast control tier and a slower display tier,
//!   each collapsing concurrent reads of a sensor into one bus access
//! - **Last-known-good fallback**: failed reads serve the previous value,
//!   flagged stale, up to a bounded age
//! - **Hysteresis control**: deadband around the target with a fail-safe that
//!   switches relays off when control readings disappear
//! - **Persisted state**: settings, enable flag, light and calibration offsets
//!   survive restarts
//! - **GPIO relays**: feature-gated so the daemon also runs on development hosts
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use thermo_pi::{hardware::MockBackend, ThermoConfig, ThermoService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ThermoConfig::new("data");
//!     let service = ThermoService::start(config, Arc::new(MockBackend::with_demo_sensors())).await?;
//!
//!     let (_stop, shutdown) = tokio::sync::watch::channel(false);
//!     service.spawn_control_loop(shutdown);
//!
//!     println!("{:?}", service.get_control_sensors().await);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod hardware;
pub mod sensors;
pub mod service;
pub mod storage;
pub mod watchdog;
pub mod web;

// Re-export public API
pub use config::{RelayPins, SafetyLimits, ThermoConfig};
pub use control::{ControlLoop, ControlSettings, ControlState, LightState, RelayMode};
pub use error::{Result, SensorError, ThermoError};
pub use hardware::{HardwareBackend, MockBackend, OutputChannel, RaspberryPiBackend};
pub use sensors::{ControlReadings, SensorMap, SensorReading};
pub use service::{StatusReport, ThermoService};
pub use storage::{HistoryRange, HistoryRecord};
pub use watchdog::WatchdogStatus;
pub use web::{start_web_server, WebConfig};

/// Root of the kernel one-wire device tree
pub const DEFAULT_W1_BASE_DIR: &str = "/sys/bus/w1/devices";

/// The default control interval (and control-tier TTL) in milliseconds
pub const DEFAULT_CONTROL_INTERVAL_MS: u64 = 2000;

/// The default web server port
pub const DEFAULT_WEB_PORT: u16 = 5000;
