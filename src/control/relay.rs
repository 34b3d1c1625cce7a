//! Idempotent relay outputs.

use crate::control::hysteresis::RelayMode;
use crate::error::Result;
use crate::hardware::{HardwareBackend, OutputChannel};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Drives the heating, cooling and light outputs.
///
/// Remembers the last level written successfully per channel and skips
/// writes that would not change it, so callers can re-assert the desired
/// state every tick.
pub struct RelayActuator {
    backend: Arc<dyn HardwareBackend>,
    levels: Mutex<HashMap<OutputChannel, bool>>,
}

impl RelayActuator {
    pub fn new(backend: Arc<dyn HardwareBackend>) -> Self {
        Self {
            backend,
            levels: Mutex::new(HashMap::new()),
        }
    }

    fn write(&self, channel: OutputChannel, on: bool, force: bool) -> Result<()> {
        let mut levels = self.levels.lock().unwrap_or_else(|e| e.into_inner());
        if !force && levels.get(&channel) == Some(&on) {
            return Ok(());
        }

        match self.backend.set_output(channel, on) {
            Ok(()) => {
                debug!("{} relay {}", channel, if on { "on" } else { "off" });
                levels.insert(channel, on);
                Ok(())
            }
            Err(e) => {
                // Unknown level now, so the next request must write again.
                levels.remove(&channel);
                Err(e)
            }
        }
    }

    pub fn set_heating(&self, on: bool) -> Result<()> {
        self.write(OutputChannel::Heating, on, false)
    }

    pub fn set_cooling(&self, on: bool) -> Result<()> {
        self.write(OutputChannel::Cooling, on, false)
    }

    pub fn set_light(&self, on: bool) -> Result<()> {
        self.write(OutputChannel::Light, on, false)
    }

    /// Drive the heating/cooling pair to `mode`, switching the inactive
    /// relay off before the active one goes on.
    ///
    /// Both writes are attempted; the first failure is returned.
    pub fn apply(&self, mode: RelayMode) -> Result<()> {
        let (off, on) = match mode {
            RelayMode::Idle => {
                let heating = self.set_heating(false);
                let cooling = self.set_cooling(false);
                return heating.and(cooling);
            }
            RelayMode::Heating => (OutputChannel::Cooling, OutputChannel::Heating),
            RelayMode::Cooling => (OutputChannel::Heating, OutputChannel::Cooling),
        };
        // Never energise one side unless the other is known to be off.
        self.write(off, false, false)?;
        self.write(on, true, false)
    }

    /// Start-up state: heating and cooling off, light as last persisted.
    pub fn initialize(&self, light_on: bool) -> Result<()> {
        let heating = self.write(OutputChannel::Heating, false, true);
        let cooling = self.write(OutputChannel::Cooling, false, true);
        let light = self.write(OutputChannel::Light, light_on, true);
        info!(
            "Relays initialized (light {})",
            if light_on { "on" } else { "off" }
        );
        heating.and(cooling).and(light)
    }

    /// Force heating and cooling off; the light keeps its level.
    pub fn shutdown(&self) -> Result<()> {
        let heating = self.write(OutputChannel::Heating, false, true);
        let cooling = self.write(OutputChannel::Cooling, false, true);
        if let Err(e) = heating.as_ref().and(cooling.as_ref()) {
            warn!("Failed to switch relays off on shutdown: {}", e);
        } else {
            info!("Heating and cooling relays switched off");
        }
        heating.and(cooling)
    }

    /// Last level written successfully to `channel`.
    pub fn level(&self, channel: OutputChannel) -> Option<bool> {
        self.levels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&channel)
            .copied()
    }
}
