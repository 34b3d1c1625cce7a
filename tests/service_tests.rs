use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thermo_pi::control::SettingsPatch;
use thermo_pi::{
    ControlSettings, LightState, MockBackend, OutputChannel, SensorError, ThermoConfig,
    ThermoError, ThermoService,
};
use tokio_test::{assert_err, assert_ok};

const ROOM: &str = "28-room";
const SAFETY: &str = "28-safety";
const SPARE: &str = "28-spare";

fn backend() -> Arc<MockBackend> {
    let backend = Arc::new(MockBackend::new());
    backend.set_temperature(ROOM, 12.0);
    backend.set_temperature(SAFETY, 20.0);
    backend.set_temperature(SPARE, 18.0);
    backend
}

fn config(dir: &tempfile::TempDir) -> ThermoConfig {
    ThermoConfig::new(dir.path())
        .with_sensor_ids(vec![ROOM.to_string(), SAFETY.to_string(), SPARE.to_string()])
        .with_control_sensors(ROOM, SAFETY)
}

fn saved<T: DeserializeOwned>(dir: &Path, key: &str) -> T {
    let json = std::fs::read_to_string(dir.join(format!("{}.json", key))).unwrap();
    serde_json::from_str(&json).unwrap()
}

async fn next_period(config: &ThermoConfig) {
    tokio::time::advance(config.control_ttl()).await;
}

/// Concurrent API reads of one sensor inside a TTL hit the bus once.
#[tokio::test(start_paused = true)]
async fn test_concurrent_reads_share_one_hardware_read() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend();
    backend.set_read_delay(Duration::from_millis(800));
    let service = ThermoService::start(config(&dir), backend.clone())
        .await
        .unwrap();

    let results = join_all((0..8).map(|_| service.get_all_sensors())).await;

    assert_eq!(backend.read_count(ROOM), 1);
    assert_eq!(backend.read_count(SPARE), 1);
    for sensors in &results {
        assert_eq!(sensors, &results[0]);
        assert_eq!(sensors[SPARE].temperature_c, 18.0);
    }
}

/// Settings saved through the service are reloaded after a restart.
#[tokio::test]
async fn test_settings_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let service = ThermoService::start(config(&dir), backend()).await.unwrap();

    let updated = ControlSettings {
        target_c: 15.5,
        deadband_c: 1.0,
        room_sensor_id: SPARE.to_string(),
        safety_sensor_id: SAFETY.to_string(),
    };
    assert_ok!(service.update_settings(updated.clone()));
    drop(service);

    let restarted = ThermoService::start(config(&dir), backend()).await.unwrap();
    assert_eq!(restarted.settings(), updated);
}

/// Racing full updates always leave the saved document equal to the running settings.
#[tokio::test]
async fn test_concurrent_settings_updates_agree_with_disk() {
    let dir = tempfile::tempdir().unwrap();
    let service = ThermoService::start(config(&dir), backend()).await.unwrap();
    let base = service.settings();

    for round in 0..25 {
        thread::scope(|s| {
            for writer in 0..8 {
                let service = &service;
                let settings = ControlSettings {
                    target_c: 10.0 + round as f64 + writer as f64 * 0.1,
                    ..base.clone()
                };
                s.spawn(move || service.update_settings(settings).unwrap());
            }
        });

        let on_disk: ControlSettings = saved(dir.path(), "settings");
        assert_eq!(on_disk, service.settings(), "round {}", round);
    }
}

/// Patches to different fields made at the same time are both kept.
#[tokio::test]
async fn test_concurrent_patches_do_not_drop_fields() {
    let dir = tempfile::tempdir().unwrap();
    let service = ThermoService::start(config(&dir), backend()).await.unwrap();

    for round in 0..25 {
        let target = 14.0 + round as f64;
        let deadband = 0.5 + round as f64 * 0.1;
        thread::scope(|s| {
            let service = &service;
            s.spawn(move || {
                let patch = SettingsPatch {
                    target_c: Some(target),
                    ..Default::default()
                };
                service.apply_settings_patch(&patch).unwrap();
            });
            s.spawn(move || {
                let patch = SettingsPatch {
                    deadband_c: Some(deadband),
                    ..Default::default()
                };
                service.apply_settings_patch(&patch).unwrap();
            });
        });

        let settings = service.settings();
        assert_eq!(settings.target_c, target);
        assert_eq!(settings.deadband_c, deadband);
        assert_eq!(saved::<ControlSettings>(dir.path(), "settings"), settings);
    }
}

/// Rejected settings leave the running and persisted settings untouched.
#[tokio::test]
async fn test_invalid_settings_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let service = ThermoService::start(config(&dir), backend()).await.unwrap();
    let before = service.settings();

    let mut invalid = before.clone();
    invalid.deadband_c = 0.0;
    let err = assert_err!(service.update_settings(invalid));
    assert!(matches!(err, ThermoError::InvalidSettings(_)));

    let mut unknown = before.clone();
    unknown.safety_sensor_id = "28-unknown".to_string();
    assert_err!(service.update_settings(unknown));

    assert_eq!(service.settings(), before);
    assert!(!dir.path().join("settings.json").exists());
}

/// 12.3°C starts cooling; drifting to 12.4°C keeps it on until 12.0°C.
#[tokio::test(start_paused = true)]
async fn test_cooling_holds_until_target() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let backend = backend();
    let service = ThermoService::start(config.clone(), backend.clone())
        .await
        .unwrap();
    let control = service.control_loop();

    for (room, cooling) in [(12.3, true), (12.1, true), (12.4, true), (12.0, false)] {
        backend.set_temperature(ROOM, room);
        let state = control.tick().await;
        assert_eq!(state.cooling, cooling, "room {}", room);
        assert!(!state.heating);
        next_period(&config).await;
    }
    assert_eq!(backend.output(OutputChannel::Cooling), Some(false));
}

/// Heating and cooling are never on together, in state or on the outputs.
#[tokio::test(start_paused = true)]
async fn test_heating_and_cooling_are_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let backend = backend();
    let service = ThermoService::start(config.clone(), backend.clone())
        .await
        .unwrap();

    let mut room = 12.0;
    for step in 0..60 {
        // Sawtooth sweeping well past both band edges.
        room += if (step / 10) % 2 == 0 { 0.35 } else { -0.35 };
        backend.set_temperature(ROOM, room);
        let state = service.control_loop().tick().await;
        assert!(!(state.heating && state.cooling));
        assert!(
            !(backend.output(OutputChannel::Heating) == Some(true)
                && backend.output(OutputChannel::Cooling) == Some(true))
        );
        next_period(&config).await;
    }
}

/// Three ticks without the safety sensor force both relays off until it returns.
#[tokio::test(start_paused = true)]
async fn test_safety_sensor_outage_fails_safe() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let backend = backend();
    let service = ThermoService::start(config.clone(), backend.clone())
        .await
        .unwrap();
    let control = service.control_loop();

    backend.set_temperature(ROOM, 13.0);
    assert!(control.tick().await.cooling);

    backend.fail_sensor(
        SAFETY,
        SensorError::Timeout {
            sensor_id: SAFETY.to_string(),
            after_ms: 1500,
        },
    );
    let mut states = Vec::new();
    for _ in 0..3 {
        next_period(&config).await;
        states.push(control.tick().await);
    }
    assert!(states[0].cooling && states[1].cooling);
    assert!(!states[2].cooling && !states[2].heating && states[2].fail_safe);
    assert_eq!(backend.output(OutputChannel::Cooling), Some(false));

    next_period(&config).await;
    assert!(!control.tick().await.cooling);

    backend.set_temperature(SAFETY, 20.0);
    next_period(&config).await;
    let state = control.tick().await;
    assert!(state.cooling && !state.fail_safe);
}

/// The watchdog goes unhealthy without sensor access and recovers on the next one.
#[tokio::test(start_paused = true)]
async fn test_watchdog_tracks_sensor_access() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend();
    let service = ThermoService::start(config(&dir), backend.clone())
        .await
        .unwrap();
    assert!(service.get_watchdog_status().healthy);

    tokio::time::advance(Duration::from_secs(11)).await;
    let status = service.get_watchdog_status();
    assert!(!status.healthy);
    assert!(status.last_access_age_seconds >= 10.0);

    backend.remove_sensor(SPARE);
    service.get_all_sensors().await;
    assert!(service.get_watchdog_status().healthy);
}

/// History is appended at most once per interval however often the loop runs.
#[tokio::test(start_paused = true)]
async fn test_history_rate_limited_through_control_loop() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir).with_history_interval_secs(60);
    let service = ThermoService::start(config, backend()).await.unwrap();

    let (stop, shutdown) = tokio::sync::watch::channel(false);
    let control = service.spawn_control_loop(shutdown);

    // 50 control periods of 2s inside the first 100s: two history slots.
    tokio::time::sleep(Duration::from_secs(100)).await;
    stop.send(true).unwrap();
    control.await.unwrap();

    let records = service.get_history(&Default::default()).await.unwrap();
    assert_eq!(records.len(), 2 * 3);
}

/// The light relay follows the persisted state across a restart.
#[tokio::test]
async fn test_light_state_persists() {
    let dir = tempfile::tempdir().unwrap();
    let service = ThermoService::start(config(&dir), backend()).await.unwrap();
    assert!(!service.light_state().on);
    assert!(service.set_light(true).unwrap().on);
    drop(service);

    let backend = backend();
    let restarted = ThermoService::start(config(&dir), backend.clone())
        .await
        .unwrap();
    assert!(restarted.light_state().on);
    assert_eq!(backend.output(OutputChannel::Light), Some(true));
    assert_eq!(backend.output(OutputChannel::Heating), Some(false));
}

/// Racing light toggles leave the relay, the saved state and memory in step.
#[tokio::test]
async fn test_concurrent_light_toggles_stay_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend();
    let service = ThermoService::start(config(&dir), backend.clone())
        .await
        .unwrap();

    for round in 0..25 {
        thread::scope(|s| {
            for toggle in 0..8 {
                let service = &service;
                s.spawn(move || service.set_light((round + toggle) % 2 == 0).unwrap());
            }
        });

        let light = service.light_state();
        assert_eq!(saved::<LightState>(dir.path(), "lightState"), light);
        assert_eq!(backend.output(OutputChannel::Light), Some(light.on));
    }
}

/// Disabling control turns relays off and survives a restart.
#[tokio::test(start_paused = true)]
async fn test_control_enable_persists() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend();
    backend.set_temperature(ROOM, 10.0);
    let service = ThermoService::start(config(&dir), backend.clone())
        .await
        .unwrap();
    assert!(service.control_loop().tick().await.heating);

    let state = service.set_control_enabled(false).await;
    assert!(!state.enabled && !state.heating);
    assert_eq!(backend.output(OutputChannel::Heating), Some(false));
    drop(service);

    let restarted = ThermoService::start(config(&dir), backend).await.unwrap();
    assert!(!restarted.control_state().enabled);
}

/// A new calibration offset applies to the next read without waiting for the TTL.
#[tokio::test(start_paused = true)]
async fn test_offset_update_invalidates_caches() {
    let dir = tempfile::tempdir().unwrap();
    let service = ThermoService::start(config(&dir), backend()).await.unwrap();
    assert_eq!(service.get_all_sensors().await[SPARE].temperature_c, 18.0);

    service.set_offset(SPARE, -0.5).unwrap();
    assert_eq!(service.get_all_sensors().await[SPARE].temperature_c, 17.5);
    assert_eq!(service.offsets()[SPARE], -0.5);
}

/// Status combines control-tier readings with the last decision.
#[tokio::test(start_paused = true)]
async fn test_status_report() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend();
    backend.set_temperature(ROOM, 11.0);
    let service = ThermoService::start(config(&dir), backend).await.unwrap();
    service.control_loop().tick().await;

    let status = service.get_status().await;
    assert_eq!(status.room_temp, Some(11.0));
    assert_eq!(status.safety_temp, Some(20.0));
    assert_eq!(status.target_c, 12.0);
    assert!(status.heating && status.control_enabled);
    assert!(status.last_decision_at.is_some());
}
