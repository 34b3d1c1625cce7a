//! Periodic hysteresis control over the control-tier cache.

use crate::config::{SafetyLimits, ThermoConfig};
use crate::control::hysteresis::RelayMode;
use crate::control::relay::RelayActuator;
use crate::control::settings::{ControlEnable, ControlSettings, ControlState, SettingsPatch};
use crate::error::Result;
use crate::sensors::{SensorReading, TieredCache};
use crate::storage::{HistoryLogger, PersistentStore, CONTROL_ENABLE_KEY, SETTINGS_KEY};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Decision state carried from one tick to the next.
#[derive(Debug, Default)]
struct LoopState {
    mode: RelayMode,
    missing_ticks: u32,
    heating_blocked: bool,
    fail_safe: bool,
}

/// The thermostat: reads room and safety temperatures, decides, drives relays.
pub struct ControlLoop {
    control: TieredCache,
    display: TieredCache,
    relays: Arc<RelayActuator>,
    store: Arc<PersistentStore>,
    history: Arc<HistoryLogger>,
    settings: RwLock<ControlSettings>,
    enabled: AtomicBool,
    safety: SafetyLimits,
    missing_tick_limit: u32,
    period: Duration,
    // Serializes ticks against enable/disable so a running tick cannot
    // re-energise a relay that was just switched off.
    state: tokio::sync::Mutex<LoopState>,
    published: Mutex<ControlState>,
}

impl ControlLoop {
    /// Create the loop; the enable flag is loaded from the store.
    pub fn new(
        config: &ThermoConfig,
        settings: ControlSettings,
        control: TieredCache,
        display: TieredCache,
        relays: Arc<RelayActuator>,
        store: Arc<PersistentStore>,
        history: Arc<HistoryLogger>,
    ) -> Self {
        let enabled = store.load::<ControlEnable>(CONTROL_ENABLE_KEY).enabled;
        control.set_sensors(vec![
            settings.room_sensor_id.clone(),
            settings.safety_sensor_id.clone(),
        ]);

        Self {
            control,
            display,
            relays,
            store,
            history,
            settings: RwLock::new(settings),
            enabled: AtomicBool::new(enabled),
            safety: config.safety,
            missing_tick_limit: config.missing_tick_limit,
            period: config.control_ttl(),
            state: tokio::sync::Mutex::new(LoopState::default()),
            published: Mutex::new(ControlState {
                enabled,
                ..Default::default()
            }),
        }
    }

    pub fn settings(&self) -> ControlSettings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// State published by the most recent tick.
    pub fn state(&self) -> ControlState {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn relays(&self) -> &Arc<RelayActuator> {
        &self.relays
    }

    /// Validate, persist, then apply new settings.
    ///
    /// On any error the previous settings stay in effect.
    pub fn update_settings(&self, settings: ControlSettings) -> Result<ControlSettings> {
        self.commit_settings(|_| settings)
    }

    /// Merge a partial update into the current settings and apply it.
    pub fn apply_settings_patch(&self, patch: &SettingsPatch) -> Result<ControlSettings> {
        self.commit_settings(|current| current.merged(patch))
    }

    // The write guard is held from merge to assignment, so the saved document
    // and the running settings always come from the same update.
    fn commit_settings<F>(&self, build: F) -> Result<ControlSettings>
    where
        F: FnOnce(&ControlSettings) -> ControlSettings,
    {
        let mut current = self.settings.write().unwrap_or_else(|e| e.into_inner());
        let settings = build(&*current);
        settings.validate(&self.display.sensors())?;
        self.store.save(SETTINGS_KEY, &settings)?;

        *current = settings.clone();
        self.control.set_sensors(vec![
            settings.room_sensor_id.clone(),
            settings.safety_sensor_id.clone(),
        ]);
        drop(current);

        info!(
            "Settings updated: target {:.2}°C, deadband {:.2}°C, room {}, safety {}",
            settings.target_c, settings.deadband_c, settings.room_sensor_id, settings.safety_sensor_id
        );
        Ok(settings)
    }

    /// Switch automatic control on or off.
    ///
    /// Disabling turns both relays off immediately. A failure to persist the
    /// flag is logged; the in-memory flag still changes.
    pub async fn set_enabled(&self, enabled: bool) -> ControlState {
        let mut state = self.state.lock().await;
        self.enabled.store(enabled, Ordering::SeqCst);
        if let Err(e) = self.store.save(CONTROL_ENABLE_KEY, &ControlEnable { enabled }) {
            warn!("Failed to persist control enable flag: {}", e);
        }
        info!("Control {}", if enabled { "enabled" } else { "disabled" });

        if enabled {
            self.publish(&state, false)
        } else {
            state.mode = RelayMode::Idle;
            state.fail_safe = false;
            self.drive(RelayMode::Idle);
            self.publish(&state, true)
        }
    }

    /// Run one control decision.
    pub async fn tick(&self) -> ControlState {
        let mut state = self.state.lock().await;

        if !self.is_enabled() {
            state.mode = RelayMode::Idle;
            state.missing_ticks = 0;
            state.fail_safe = false;
            self.drive(RelayMode::Idle);
            return self.publish(&state, true);
        }

        let settings = self.settings();
        // Both readings are in hand before any relay is touched.
        let (room, safety) = tokio::join!(
            self.control.get(&settings.room_sensor_id),
            self.control.get(&settings.safety_sensor_id)
        );

        let (room, safety) = match (room, safety) {
            (Ok(room), Ok(safety)) => (room, safety),
            (room, safety) => {
                for e in [room.err(), safety.err()].into_iter().flatten() {
                    debug!("Control reading unavailable: {}", e);
                }
                return self.on_missing_readings(&mut state);
            }
        };

        // A last-known-good copy may steer the relays, but only for as long
        // as a missing reading would hold them.
        if room.stale || safety.stale {
            debug!(
                "Control reading stale (room {}, safety {})",
                room.stale, safety.stale
            );
            state.missing_ticks = state.missing_ticks.saturating_add(1);
            if state.missing_ticks >= self.missing_tick_limit {
                if !state.fail_safe {
                    warn!(
                        "No fresh control reading for {} ticks; relays forced off",
                        state.missing_ticks
                    );
                }
                return self.force_off(&mut state);
            }
        } else {
            state.missing_ticks = 0;
        }

        if !self.safety.in_range(safety.temperature_c) {
            if !state.fail_safe {
                warn!(
                    "Safety sensor {} reads {:.2}°C, outside {:.1}..{:.1}°C; relays forced off",
                    safety.sensor_id, safety.temperature_c, self.safety.min_c, self.safety.max_c
                );
            }
            return self.force_off(&mut state);
        }

        self.update_heating_block(&mut state, &safety);

        let deviation = room.temperature_c - settings.target_c;
        let mut next = state.mode.next(deviation, settings.deadband_c);
        if next == RelayMode::Heating && state.heating_blocked {
            next = RelayMode::Idle;
        }
        if next != state.mode {
            info!(
                "{} -> {} (room {:.2}°C{}, target {:.2}°C)",
                state.mode,
                next,
                room.temperature_c,
                if room.stale { " stale" } else { "" },
                settings.target_c
            );
        }

        state.mode = next;
        state.fail_safe = false;
        self.drive(next);
        self.publish(&state, true)
    }

    /// Run until `shutdown` flips to true, then switch heating and cooling off.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Control loop started ({}ms period)", self.period.as_millis());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                    self.record_history().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Hold the state lock so no tick can race the final switch-off.
        let mut state = self.state.lock().await;
        state.mode = RelayMode::Idle;
        if let Err(e) = self.relays.shutdown() {
            error!("Relays may still be energised: {}", e);
        }
        self.publish(&state, true);
        info!("Control loop stopped");
    }

    async fn record_history(&self) {
        if !self.history.is_due() {
            return;
        }
        let readings: Vec<SensorReading> = self.display.get_all().await.into_values().collect();
        self.history.maybe_log(&readings).await;
    }

    fn on_missing_readings(&self, state: &mut LoopState) -> ControlState {
        state.missing_ticks = state.missing_ticks.saturating_add(1);
        if state.missing_ticks < self.missing_tick_limit {
            debug!(
                "Holding {} with control readings missing ({}/{})",
                state.mode, state.missing_ticks, self.missing_tick_limit
            );
            return self.publish(state, false);
        }

        if !state.fail_safe {
            warn!(
                "Control readings missing for {} ticks; relays forced off",
                state.missing_ticks
            );
        }
        self.force_off(state)
    }

    fn force_off(&self, state: &mut LoopState) -> ControlState {
        state.mode = RelayMode::Idle;
        state.fail_safe = true;
        self.drive(RelayMode::Idle);
        self.publish(state, true)
    }

    fn update_heating_block(&self, state: &mut LoopState, safety: &SensorReading) {
        let celsius = safety.temperature_c;
        if state.heating_blocked {
            if celsius <= self.safety.heat_resume_below_c {
                state.heating_blocked = false;
                info!("Safety sensor at {:.2}°C, heating allowed again", celsius);
            }
        } else if celsius >= self.safety.heat_block_above_c {
            state.heating_blocked = true;
            warn!("Safety sensor at {:.2}°C, heating blocked", celsius);
        }
    }

    fn drive(&self, mode: RelayMode) {
        if let Err(e) = self.relays.apply(mode) {
            error!("Failed to drive relays to {}: {}", mode, e);
        }
    }

    fn publish(&self, state: &LoopState, decided: bool) -> ControlState {
        let mut published = self.published.lock().unwrap_or_else(|e| e.into_inner());
        published.heating = state.mode.heating();
        published.cooling = state.mode.cooling();
        published.enabled = self.is_enabled();
        published.heating_blocked = state.heating_blocked;
        published.fail_safe = state.fail_safe;
        if decided {
            published.last_decision_at = Some(Utc::now());
        }
        published.clone()
    }
}
