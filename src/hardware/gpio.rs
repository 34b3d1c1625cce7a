//! GPIO relay outputs for Raspberry Pi.
//!
//! Feature-gated so the controller still builds and runs on machines without
//! GPIO; there the outputs are only logged.

use super::OutputChannel;
use crate::config::RelayPins;
use crate::error::Result;

#[cfg(feature = "gpio")]
mod raspberry_pi {
    use super::*;
    use crate::error::ThermoError;
    use rppal::gpio::{Gpio, OutputPin};
    use std::sync::Mutex;

    /// Relay outputs driven through rppal.
    pub struct GpioRelayOutputs {
        heating: Mutex<OutputPin>,
        cooling: Mutex<OutputPin>,
        light: Mutex<OutputPin>,
    }

    fn claim(gpio: &Gpio, pin: u8) -> Result<Mutex<OutputPin>> {
        let mut output = gpio
            .get(pin)
            .map_err(|e| ThermoError::hardware_error(format!("Failed to access pin {}: {}", pin, e)))?
            .into_output_low();
        // Relays keep their last level if the process dies; shutdown handling
        // drives them low explicitly.
        output.set_reset_on_drop(false);
        Ok(Mutex::new(output))
    }

    impl GpioRelayOutputs {
        pub fn new(pins: RelayPins) -> Result<Self> {
            let gpio = Gpio::new().map_err(|e| {
                ThermoError::hardware_error(format!("Failed to initialize GPIO: {}", e))
            })?;

            Ok(Self {
                heating: claim(&gpio, pins.heating)?,
                cooling: claim(&gpio, pins.cooling)?,
                light: claim(&gpio, pins.light)?,
            })
        }

        pub fn set(&self, channel: OutputChannel, on: bool) -> Result<()> {
            let pin = match channel {
                OutputChannel::Heating => &self.heating,
                OutputChannel::Cooling => &self.cooling,
                OutputChannel::Light => &self.light,
            };
            let mut pin = pin.lock().unwrap_or_else(|e| e.into_inner());
            if on {
                pin.set_high();
            } else {
                pin.set_low();
            }
            Ok(())
        }
    }
}

#[cfg(not(feature = "gpio"))]
mod logging {
    use super::*;

    /// Stand-in for hosts without GPIO support: records intent in the log.
    pub struct LoggedRelayOutputs {
        pins: RelayPins,
    }

    impl LoggedRelayOutputs {
        pub fn new(pins: RelayPins) -> Result<Self> {
            tracing::warn!("GPIO support not compiled in, relay outputs are simulated");
            Ok(Self { pins })
        }

        pub fn set(&self, channel: OutputChannel, on: bool) -> Result<()> {
            tracing::info!(
                "{} relay (GPIO {}) -> {}",
                channel,
                channel.pin(&self.pins),
                if on { "HIGH" } else { "LOW" }
            );
            Ok(())
        }
    }
}

// Re-export the appropriate relay output driver
#[cfg(feature = "gpio")]
pub use raspberry_pi::GpioRelayOutputs as RelayOutputs;

#[cfg(not(feature = "gpio"))]
pub use logging::LoggedRelayOutputs as RelayOutputs;

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "gpio"))]
    #[test]
    fn test_logged_outputs_accept_writes() {
        let outputs = RelayOutputs::new(RelayPins::default()).unwrap();
        for channel in OutputChannel::ALL {
            assert!(outputs.set(channel, true).is_ok());
            assert!(outputs.set(channel, false).is_ok());
        }
    }
}
