//! The assembled controller and the operations offered to API callers.

use crate::config::ThermoConfig;
use crate::control::{
    ControlLoop, ControlSettings, ControlState, LightState, RelayActuator, SettingsPatch,
};
use crate::error::Result;
use crate::hardware::HardwareBackend;
use crate::sensors::{
    CacheTier, ControlReadings, SensorGateway, SensorMap, SensorOffsets, TieredCache,
};
use crate::storage::{
    HistoryLogger, HistoryRange, HistoryRecord, PersistentStore, LIGHT_STATE_KEY, SETTINGS_KEY,
};
use crate::watchdog::{WatchdogMonitor, WatchdogStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Combined view of the control zone for status displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub room_temp: Option<f64>,
    pub safety_temp: Option<f64>,
    pub target_c: f64,
    pub deadband_c: f64,
    pub heating: bool,
    pub cooling: bool,
    pub heating_blocked: bool,
    pub fail_safe: bool,
    pub control_enabled: bool,
    pub last_decision_at: Option<DateTime<Utc>>,
}

/// Owns every component of the sensor and control subsystem.
pub struct ThermoService {
    config: ThermoConfig,
    watchdog: Arc<WatchdogMonitor>,
    gateway: Arc<SensorGateway>,
    control_cache: TieredCache,
    display_cache: TieredCache,
    history: Arc<HistoryLogger>,
    store: Arc<PersistentStore>,
    relays: Arc<RelayActuator>,
    control: Arc<ControlLoop>,
    light: Mutex<LightState>,
}

impl ThermoService {
    /// Load persisted state, initialise the relays and wire the components.
    ///
    /// The control loop is not started; see [`spawn_control_loop`](Self::spawn_control_loop).
    pub async fn start(config: ThermoConfig, backend: Arc<dyn HardwareBackend>) -> Result<Arc<Self>> {
        config.validate()?;

        let store = Arc::new(PersistentStore::open(&config.data_dir)?);
        let watchdog = Arc::new(WatchdogMonitor::new(config.watchdog_threshold()));
        let gateway = Arc::new(SensorGateway::new(
            backend.clone(),
            store.clone(),
            watchdog.clone(),
            config.read_timeout(),
        ));

        let mut sensors = config.sensor_ids.clone();
        if sensors.is_empty() {
            sensors = match gateway.discover().await {
                Ok(found) => found,
                Err(e) => {
                    warn!("Sensor discovery failed: {}", e);
                    Vec::new()
                }
            };
            info!("Discovered {} sensors: {:?}", sensors.len(), sensors);
        }

        let settings = Self::initial_settings(&config, &store, &sensors);
        for id in [&settings.room_sensor_id, &settings.safety_sensor_id] {
            if !id.is_empty() && !sensors.contains(id) {
                sensors.push(id.clone());
            }
        }

        let control_cache = TieredCache::new(
            CacheTier::Control,
            gateway.clone(),
            config.control_ttl(),
            config.max_staleness(),
            Vec::new(),
        );
        let display_cache = TieredCache::new(
            CacheTier::Display,
            gateway.clone(),
            config.display_ttl(),
            config.max_staleness(),
            sensors,
        );

        let light: LightState = store.load(LIGHT_STATE_KEY);
        let relays = Arc::new(RelayActuator::new(backend));
        if let Err(e) = relays.initialize(light.on) {
            error!("Failed to initialize relays: {}", e);
        }

        let history = Arc::new(HistoryLogger::new(&config.data_dir, config.history_interval()));
        let control = Arc::new(ControlLoop::new(
            &config,
            settings,
            control_cache.clone(),
            display_cache.clone(),
            relays.clone(),
            store.clone(),
            history.clone(),
        ));

        Ok(Arc::new(Self {
            config,
            watchdog,
            gateway,
            control_cache,
            display_cache,
            history,
            store,
            relays,
            control,
            light: Mutex::new(light),
        }))
    }

    /// Persisted settings if valid, otherwise the configured defaults with
    /// unset sensor roles filled from the discovered sensors.
    fn initial_settings(
        config: &ThermoConfig,
        store: &PersistentStore,
        sensors: &[String],
    ) -> ControlSettings {
        let mut defaults = ControlSettings::from_config(config);
        if defaults.room_sensor_id.is_empty() {
            if let Some(first) = sensors.first() {
                defaults.room_sensor_id = first.clone();
            }
        }
        if defaults.safety_sensor_id.is_empty() {
            if let Some(id) = sensors.get(1).or_else(|| sensors.first()) {
                defaults.safety_sensor_id = id.clone();
            }
        }

        let settings = store.load_or(SETTINGS_KEY, defaults.clone());
        match settings.validate(&[]) {
            Ok(()) => settings,
            Err(e) => {
                warn!("Stored settings rejected ({}), using defaults", e);
                defaults
            }
        }
    }

    pub fn config(&self) -> &ThermoConfig {
        &self.config
    }

    pub fn control_loop(&self) -> &Arc<ControlLoop> {
        &self.control
    }

    /// Run the control loop on its own task until `shutdown` becomes true.
    pub fn spawn_control_loop(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let control = self.control.clone();
        tokio::spawn(async move { control.run(shutdown).await })
    }

    /// Room and safety readings from the control tier.
    pub async fn get_control_sensors(&self) -> ControlReadings {
        let settings = self.control.settings();
        let (room, safety) = tokio::join!(
            self.control_cache.get(&settings.room_sensor_id),
            self.control_cache.get(&settings.safety_sensor_id)
        );
        ControlReadings {
            room: room.ok(),
            safety: safety.ok(),
        }
    }

    /// Every configured sensor from the display tier; unreadable ones are omitted.
    pub async fn get_all_sensors(&self) -> SensorMap {
        self.display_cache.get_all().await
    }

    pub fn get_watchdog_status(&self) -> WatchdogStatus {
        self.watchdog.status()
    }

    pub fn settings(&self) -> ControlSettings {
        self.control.settings()
    }

    pub fn update_settings(&self, settings: ControlSettings) -> Result<ControlSettings> {
        self.control.update_settings(settings)
    }

    /// Merge a partial update into the current settings and apply it.
    pub fn apply_settings_patch(&self, patch: &SettingsPatch) -> Result<ControlSettings> {
        self.control.apply_settings_patch(patch)
    }

    pub async fn set_control_enabled(&self, enabled: bool) -> ControlState {
        self.control.set_enabled(enabled).await
    }

    pub fn control_state(&self) -> ControlState {
        self.control.state()
    }

    /// Switch the light and persist the new state.
    ///
    /// A failed save is logged; the relay has already switched.
    pub fn set_light(&self, on: bool) -> Result<LightState> {
        // Held across relay, store and memory so concurrent toggles land in order.
        let mut current = self.light.lock().unwrap_or_else(|e| e.into_inner());
        self.relays.set_light(on)?;

        let state = LightState { on };
        if let Err(e) = self.store.save(LIGHT_STATE_KEY, &state) {
            warn!("Failed to persist light state: {}", e);
        }
        *current = state;
        drop(current);
        info!("Light switched {}", if on { "on" } else { "off" });
        Ok(state)
    }

    pub fn light_state(&self) -> LightState {
        *self.light.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn get_history(&self, range: &HistoryRange) -> Result<Vec<HistoryRecord>> {
        self.history.read(range).await
    }

    pub fn offsets(&self) -> SensorOffsets {
        self.gateway.offsets()
    }

    /// Persist a calibration offset and drop cached values for that sensor.
    pub fn set_offset(&self, sensor_id: &str, offset: f64) -> Result<()> {
        self.gateway.set_offset(sensor_id, offset)?;
        self.control_cache.invalidate(sensor_id);
        self.display_cache.invalidate(sensor_id);
        Ok(())
    }

    /// Sensor ids currently present on the bus.
    pub async fn discover_sensors(&self) -> Result<Vec<String>> {
        self.gateway.discover().await
    }

    /// Current readings, settings and relay state in one view.
    pub async fn get_status(&self) -> StatusReport {
        let readings = self.get_control_sensors().await;
        let settings = self.settings();
        let state = self.control_state();
        StatusReport {
            room_temp: readings.room.map(|r| r.temperature_c),
            safety_temp: readings.safety.map(|r| r.temperature_c),
            target_c: settings.target_c,
            deadband_c: settings.deadband_c,
            heating: state.heating,
            cooling: state.cooling,
            heating_blocked: state.heating_blocked,
            fail_safe: state.fail_safe,
            control_enabled: state.enabled,
            last_decision_at: state.last_decision_at,
        }
    }
}
