//! Error handling for the thermo_pi controller crate.

use serde::Serialize;

/// A specialized `Result` type for thermo_pi operations.
pub type Result<T> = std::result::Result<T, ThermoError>;

/// Failure of a single one-wire sensor read.
///
/// Cloneable so that every caller waiting on the same in-flight read observes
/// the same failure.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SensorError {
    /// The device directory does not exist on the bus
    #[error("sensor {sensor_id} not found")]
    NotFound { sensor_id: String },

    /// The read did not complete within the configured bound
    #[error("sensor {sensor_id} timed out after {after_ms}ms")]
    Timeout { sensor_id: String, after_ms: u64 },

    /// The raw device output could not be interpreted
    #[error("sensor {sensor_id} returned malformed data: {detail}")]
    Parse { sensor_id: String, detail: String },

    /// Any other I/O failure while talking to the device
    #[error("sensor {sensor_id} I/O failure: {detail}")]
    Io { sensor_id: String, detail: String },
}

impl SensorError {
    /// The sensor this failure belongs to.
    pub fn sensor_id(&self) -> &str {
        match self {
            Self::NotFound { sensor_id }
            | Self::Timeout { sensor_id, .. }
            | Self::Parse { sensor_id, .. }
            | Self::Io { sensor_id, .. } => sensor_id,
        }
    }

    pub fn not_found(sensor_id: impl Into<String>) -> Self {
        Self::NotFound {
            sensor_id: sensor_id.into(),
        }
    }

    pub fn parse(sensor_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Parse {
            sensor_id: sensor_id.into(),
            detail: detail.into(),
        }
    }

    pub fn io(sensor_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Io {
            sensor_id: sensor_id.into(),
            detail: detail.into(),
        }
    }
}

/// The main error type for thermo_pi operations.
#[derive(Debug, thiserror::Error)]
pub enum ThermoError {
    /// A sensor could not be read and no usable fallback exists
    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(#[from] SensorError),

    /// A persisted document could not be written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A settings update was rejected before being stored
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// A relay output could not be driven
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Web server error
    #[error("Web server error: {0}")]
    WebServer(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ThermoError {
    /// Create a new persistence error
    pub fn persistence_error(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a new invalid settings error
    pub fn invalid_settings(msg: impl Into<String>) -> Self {
        Self::InvalidSettings(msg.into())
    }

    /// Create a new hardware error
    pub fn hardware_error(msg: impl Into<String>) -> Self {
        Self::Hardware(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new web server error
    pub fn web_server_error(msg: impl Into<String>) -> Self {
        Self::WebServer(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_error_reports_its_sensor() {
        let err = SensorError::Timeout {
            sensor_id: "28-0001".to_string(),
            after_ms: 1500,
        };
        assert_eq!(err.sensor_id(), "28-0001");
        assert!(err.to_string().contains("1500ms"));
    }

    #[test]
    fn test_sensor_error_converts_to_unavailable() {
        let err: ThermoError = SensorError::not_found("28-0002").into();
        assert!(matches!(err, ThermoError::SensorUnavailable(_)));
        assert!(err.to_string().contains("28-0002"));
    }

    #[test]
    fn test_sensor_error_serializes_with_kind_tag() {
        let json = serde_json::to_value(SensorError::parse("28-0003", "CRC check failed")).unwrap();
        assert_eq!(json["kind"], "parse");
        assert_eq!(json["sensorId"], "28-0003");
        assert!(json.get("sensor_id").is_none());

        let json = serde_json::to_value(SensorError::Timeout {
            sensor_id: "28-0004".to_string(),
            after_ms: 1500,
        })
        .unwrap();
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["afterMs"], 1500);
    }
}
