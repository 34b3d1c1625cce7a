//! Kernel one-wire bus access for DS18B20 temperature sensors.
//!
//! Each device appears as `<base>/<id>/w1_slave`. Reading that file makes the
//! kernel run a conversion on the bus, which takes several hundred
//! milliseconds per device. The file has two lines:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```

use crate::error::{Result, SensorError, ThermoError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Family code prefix of DS18B20 devices.
const DS18B20_PREFIX: &str = "28-";

/// One-wire sysfs tree.
#[derive(Debug, Clone)]
pub struct OneWireBus {
    base_dir: PathBuf,
}

impl OneWireBus {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Whether the sysfs tree exists on this host.
    pub fn is_present(&self) -> bool {
        self.base_dir.is_dir()
    }

    /// Read one device and return its raw temperature in degrees Celsius.
    pub async fn read_celsius(&self, sensor_id: &str) -> std::result::Result<f64, SensorError> {
        let device_dir = self.base_dir.join(sensor_id);
        let contents = match tokio::fs::read_to_string(device_dir.join("w1_slave")).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SensorError::not_found(sensor_id));
            }
            Err(e) => return Err(SensorError::io(sensor_id, e.to_string())),
        };

        parse_w1_slave(&contents).map_err(|detail| SensorError::parse(sensor_id, detail))
    }

    /// List DS18B20 devices on the bus, sorted by id.
    pub async fn list_sensors(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.base_dir).await.map_err(|e| {
            ThermoError::hardware_error(format!(
                "Failed to list one-wire devices in {}: {}",
                self.base_dir.display(),
                e
            ))
        })?;

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(DS18B20_PREFIX) {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Parse the contents of a `w1_slave` file into degrees Celsius.
pub fn parse_w1_slave(contents: &str) -> std::result::Result<f64, String> {
    let mut lines = contents.lines();
    let status = lines.next().ok_or("empty device output")?;
    if !status.trim_end().ends_with("YES") {
        return Err("CRC check failed".to_string());
    }

    let data = lines.next().ok_or("missing temperature line")?;
    let (_, raw) = data
        .split_once("t=")
        .ok_or("temperature field not found")?;
    let millicelsius: i64 = raw
        .trim()
        .parse()
        .map_err(|e| format!("invalid temperature value {:?}: {}", raw.trim(), e))?;

    Ok(millicelsius as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n\
                        72 01 4b 46 7f ff 0e 10 57 t=23125\n";

    #[test]
    fn test_parse_valid_output() {
        assert_eq!(parse_w1_slave(GOOD), Ok(23.125));
    }

    #[test]
    fn test_parse_negative_temperature() {
        let text = "ff ff : crc=aa YES\nff ff t=-1250\n";
        assert_eq!(parse_w1_slave(text), Ok(-1.25));
    }

    #[test]
    fn test_parse_rejects_crc_failure() {
        let text = "72 01 : crc=57 NO\n72 01 t=23125\n";
        assert_eq!(parse_w1_slave(text), Err("CRC check failed".to_string()));
    }

    #[test]
    fn test_parse_rejects_missing_field() {
        assert!(parse_w1_slave("aa : crc=57 YES\naa bb\n").is_err());
        assert!(parse_w1_slave("").is_err());
        assert!(parse_w1_slave("aa : crc=57 YES\naa t=abc\n").is_err());
    }

    #[tokio::test]
    async fn test_read_from_sysfs_tree() {
        let dir = tempfile::tempdir().unwrap();
        let device = dir.path().join("28-00000abc");
        std::fs::create_dir(&device).unwrap();
        std::fs::write(device.join("w1_slave"), GOOD).unwrap();
        std::fs::create_dir(dir.path().join("w1_bus_master1")).unwrap();

        let bus = OneWireBus::new(dir.path());
        assert!(bus.is_present());
        assert_eq!(bus.read_celsius("28-00000abc").await, Ok(23.125));
        assert_eq!(bus.list_sensors().await.unwrap(), vec!["28-00000abc"]);
    }

    #[tokio::test]
    async fn test_missing_device_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let bus = OneWireBus::new(dir.path());
        assert_eq!(
            bus.read_celsius("28-missing").await,
            Err(SensorError::not_found("28-missing"))
        );
    }

    #[tokio::test]
    async fn test_corrupt_device_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let device = dir.path().join("28-bad");
        std::fs::create_dir(&device).unwrap();
        std::fs::write(device.join("w1_slave"), "garbage\n").unwrap();

        let bus = OneWireBus::new(dir.path());
        assert!(matches!(
            bus.read_celsius("28-bad").await,
            Err(SensorError::Parse { .. })
        ));
    }
}
