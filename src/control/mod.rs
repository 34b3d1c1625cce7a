//! Control decisions and relay outputs.

pub mod controller;
pub mod hysteresis;
pub mod relay;
pub mod settings;

pub use controller::ControlLoop;
pub use hysteresis::RelayMode;
pub use relay::RelayActuator;
pub use settings::{ControlEnable, ControlSettings, ControlState, LightState, SettingsPatch};
