//! Rate-limited, append-only temperature history.
//!
//! Records are JSON lines in `history.jsonl`. The running process only ever
//! appends; reads exist for the API layer and never feed control decisions.

use crate::error::Result;
use crate::sensors::SensorReading;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// File name of the history log inside the data directory.
pub const HISTORY_FILE: &str = "history.jsonl";

/// One logged temperature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    pub sensor_id: String,
    pub temperature_c: f64,
}

/// Filter for [`HistoryLogger::read`]; bounds are inclusive unix seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRange {
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub sensor_id: Option<String>,
}

impl HistoryRange {
    pub fn contains(&self, record: &HistoryRecord) -> bool {
        let ts = record.timestamp.timestamp();
        self.since.map_or(true, |since| ts >= since)
            && self.until.map_or(true, |until| ts <= until)
            && self
                .sensor_id
                .as_deref()
                .map_or(true, |id| id == record.sensor_id)
    }
}

/// Appends readings at most once per configured interval.
#[derive(Debug)]
pub struct HistoryLogger {
    path: PathBuf,
    min_interval: Duration,
    // Held across the append so writes are never interleaved or reordered.
    last_append: Mutex<Option<Instant>>,
}

impl HistoryLogger {
    pub fn new(data_dir: impl AsRef<Path>, min_interval: Duration) -> Self {
        Self {
            path: data_dir.as_ref().join(HISTORY_FILE),
            min_interval,
            last_append: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the next [`maybe_log`](Self::maybe_log) would append.
    ///
    /// Lets callers skip gathering readings on most ticks.
    pub fn is_due(&self) -> bool {
        match self.last_append.try_lock() {
            Ok(last) => self.due(*last),
            Err(_) => false,
        }
    }

    fn due(&self, last: Option<Instant>) -> bool {
        last.map_or(true, |at| at.elapsed() >= self.min_interval)
    }

    /// Append the fresh readings if the interval has elapsed.
    ///
    /// Stale readings are skipped. Returns whether anything was written; a
    /// failed write is logged and retried on the next call.
    pub async fn maybe_log(&self, readings: &[SensorReading]) -> bool {
        let mut last = self.last_append.lock().await;
        if !self.due(*last) {
            return false;
        }

        let now = Utc::now();
        let mut lines = String::new();
        let mut count = 0;
        for reading in readings.iter().filter(|r| !r.stale) {
            let record = HistoryRecord {
                timestamp: now,
                sensor_id: reading.sensor_id.clone(),
                temperature_c: reading.temperature_c,
            };
            match serde_json::to_string(&record) {
                Ok(line) => {
                    lines.push_str(&line);
                    lines.push('\n');
                    count += 1;
                }
                Err(e) => warn!("Failed to encode history record: {}", e),
            }
        }
        if lines.is_empty() {
            return false;
        }

        match self.append(lines.as_bytes()).await {
            Ok(()) => {
                *last = Some(Instant::now());
                debug!("Appended {} history records", count);
                true
            }
            Err(e) => {
                warn!("Failed to append to {}: {}", self.path.display(), e);
                false
            }
        }
    }

    async fn append(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await
    }

    /// Read logged records matching `range`, in write order.
    pub async fn read(&self, range: &HistoryRange) -> Result<Vec<HistoryRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryRecord>(line) {
                Ok(record) if range.contains(&record) => records.push(record),
                Ok(_) => {}
                Err(e) => warn!("Skipping malformed history line {}: {}", index + 1, e),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(id: &str, celsius: f64) -> SensorReading {
        SensorReading::new(id, celsius)
    }

    #[tokio::test(start_paused = true)]
    async fn test_appends_at_most_once_per_interval() {
        let dir = tempfile::tempdir().unwrap();
        let logger = HistoryLogger::new(dir.path(), Duration::from_secs(60));
        let readings = vec![reading("28-a", 12.0), reading("28-b", 20.5)];

        assert!(logger.is_due());
        assert!(logger.maybe_log(&readings).await);
        for _ in 0..30 {
            tokio::time::advance(Duration::from_secs(1)).await;
            assert!(!logger.maybe_log(&readings).await);
        }
        assert!(!logger.is_due());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(logger.maybe_log(&readings).await);

        let records = logger.read(&HistoryRange::default()).await.unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].sensor_id, "28-a");
        assert_eq!(records[1].temperature_c, 20.5);
    }

    #[tokio::test]
    async fn test_stale_readings_are_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let logger = HistoryLogger::new(dir.path(), Duration::from_secs(60));

        assert!(!logger.maybe_log(&[reading("28-a", 12.0).into_stale()]).await);
        // Nothing was written, so the slot is still open.
        assert!(logger.is_due());
        assert!(logger.read(&HistoryRange::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_filters_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let logger = HistoryLogger::new(dir.path(), Duration::from_secs(60));
        let lines = [
            r#"{"timestamp":100,"sensorId":"28-a","temperatureC":11.5}"#,
            "not json",
            r#"{"timestamp":200,"sensorId":"28-b","temperatureC":19.0}"#,
            r#"{"timestamp":300,"sensorId":"28-a","temperatureC":12.5}"#,
        ];
        std::fs::write(logger.path(), lines.join("\n")).unwrap();

        let only_a = HistoryRange {
            sensor_id: Some("28-a".to_string()),
            ..Default::default()
        };
        let records = logger.read(&only_a).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].temperature_c, 12.5);

        let window = HistoryRange {
            since: Some(150),
            until: Some(250),
            sensor_id: None,
        };
        let records = logger.read(&window).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sensor_id, "28-b");
    }

    #[tokio::test]
    async fn test_missing_log_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let logger = HistoryLogger::new(dir.path(), Duration::from_secs(60));
        assert!(logger.read(&HistoryRange::default()).await.unwrap().is_empty());
    }
}
