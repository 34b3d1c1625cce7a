//! Small JSON documents persisted across restarts.
//!
//! Each key maps to `<root>/<key>.json`. Saves write a sibling temporary file,
//! sync it and rename it over the target, so a concurrent load sees either
//! the old or the new document, never a partial one. Loads never fail: a
//! missing or malformed document yields the caller's default and a warning.

use crate::error::{Result, ThermoError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Key of the [`ControlSettings`](crate::control::ControlSettings) document.
pub const SETTINGS_KEY: &str = "settings";
/// Key of the [`ControlEnable`](crate::control::ControlEnable) document.
pub const CONTROL_ENABLE_KEY: &str = "controlEnable";
/// Key of the [`LightState`](crate::control::LightState) document.
pub const LIGHT_STATE_KEY: &str = "lightState";
/// Key of the sensor id to calibration offset map.
pub const SENSOR_OFFSETS_KEY: &str = "sensorOffsets";

/// File-backed document store.
#[derive(Debug)]
pub struct PersistentStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl PersistentStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            ThermoError::persistence_error(format!(
                "Failed to create data directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the document stored under `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", key))
    }

    /// Load a document, falling back to `T::default()`.
    pub fn load<T>(&self, key: &str) -> T
    where
        T: DeserializeOwned + Default,
    {
        self.load_or(key, T::default())
    }

    /// Load a document, falling back to `default` when it is missing or
    /// cannot be decoded.
    pub fn load_or<T>(&self, key: &str, default: T) -> T
    where
        T: DeserializeOwned,
    {
        let path = self.path_for(key);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No {} document at {}, using default", key, path.display());
                return default;
            }
            Err(e) => {
                warn!("Failed to read {}: {}, using default", path.display(), e);
                return default;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(value) => value,
            Err(e) => {
                warn!("Malformed {} document at {}: {}, using default", key, path.display(), e);
                default
            }
        }
    }

    /// Atomically replace the document stored under `key`.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.path_for(key);
        let temp_path = self.root.join(format!(".{}.json.tmp", key));

        let written = write_synced(&temp_path, value).and_then(|()| {
            fs::rename(&temp_path, &path).map_err(ThermoError::from)
        });

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(ThermoError::persistence_error(format!(
                "Failed to save {}: {}",
                path.display(),
                e
            )));
        }

        debug!("Saved {} document", key);
        Ok(())
    }
}

fn write_synced<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}
