//! Time-bounded, single-flight read cache over the sensor gateway.
//!
//! Two tiers run the same logic with different TTLs and sensor sets: the
//! control tier refreshes the room and safety sensors often, the display tier
//! refreshes every configured sensor at a slower pace for API readers.
//!
//! For each sensor id at most one hardware read is in flight at a time.
//! Callers arriving during a refresh await the same shared future and observe
//! the same result. The state lock is only held for map lookups and inserts,
//! never across the read itself.

use crate::error::SensorError;
use crate::sensors::data::{SensorMap, SensorReading};
use crate::sensors::gateway::SensorGateway;
use futures_util::future::{join_all, BoxFuture, Shared};
use futures_util::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

type ReadResult = Result<SensorReading, SensorError>;
type SharedRead = Shared<BoxFuture<'static, ReadResult>>;

/// Which consumer a cache instance serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Control,
    Display,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Control => f.write_str("control"),
            Self::Display => f.write_str("display"),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    reading: SensorReading,
    /// When the underlying value was last read successfully
    fetched_at: Instant,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
struct FailedRead {
    error: SensorError,
    expires_at: Instant,
}

#[derive(Default)]
struct Slot {
    entry: Option<CacheEntry>,
    failure: Option<FailedRead>,
    in_flight: Option<(u64, SharedRead)>,
}

#[derive(Default)]
struct TierState {
    sensors: Vec<String>,
    slots: HashMap<String, Slot>,
    next_generation: u64,
}

struct CacheInner {
    tier: CacheTier,
    gateway: Arc<SensorGateway>,
    ttl: Duration,
    max_staleness: Duration,
    state: Mutex<TierState>,
}

/// One cache tier. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TieredCache {
    inner: Arc<CacheInner>,
}

impl TieredCache {
    pub fn new(
        tier: CacheTier,
        gateway: Arc<SensorGateway>,
        ttl: Duration,
        max_staleness: Duration,
        sensors: Vec<String>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                tier,
                gateway,
                ttl,
                max_staleness,
                state: Mutex::new(TierState {
                    sensors,
                    ..Default::default()
                }),
            }),
        }
    }

    pub fn tier(&self) -> CacheTier {
        self.inner.tier
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Sensors served by [`get_all`](Self::get_all).
    pub fn sensors(&self) -> Vec<String> {
        self.inner.lock().sensors.clone()
    }

    /// Replace the sensor set and drop cached values for sensors outside it.
    pub fn set_sensors(&self, sensors: Vec<String>) {
        let mut state = self.inner.lock();
        state.slots.retain(|id, _| sensors.contains(id));
        state.sensors = sensors;
    }

    /// Forget the cached value and failure for one sensor.
    pub fn invalidate(&self, sensor_id: &str) {
        let mut state = self.inner.lock();
        if let Some(slot) = state.slots.get_mut(sensor_id) {
            slot.entry = None;
            slot.failure = None;
        }
    }

    /// Return the cached reading for `sensor_id`, refreshing it if expired.
    ///
    /// On a failed refresh the last successful value is returned with
    /// `stale = true` as long as it is younger than the staleness ceiling;
    /// otherwise the failure is returned. Either outcome is kept for one TTL.
    pub async fn get(&self, sensor_id: &str) -> ReadResult {
        let pending = {
            let mut state = self.inner.lock();
            let now = Instant::now();
            let generation = state.next_generation;
            let slot = state.slots.entry(sensor_id.to_string()).or_default();

            if let Some(entry) = slot.entry.as_ref().filter(|e| now < e.expires_at) {
                return Ok(entry.reading.clone());
            }
            if let Some(failed) = slot.failure.as_ref().filter(|f| now < f.expires_at) {
                return Err(failed.error.clone());
            }

            match &slot.in_flight {
                Some((_, pending)) => pending.clone(),
                None => {
                    let pending =
                        CacheInner::spawn_refresh(self.inner.clone(), sensor_id.to_string(), generation);
                    slot.in_flight = Some((generation, pending.clone()));
                    state.next_generation += 1;
                    pending
                }
            }
        };

        pending.await
    }

    /// Read several sensors; each id goes through [`get`](Self::get).
    pub async fn get_many(&self, sensor_ids: &[String]) -> Vec<(String, ReadResult)> {
        let results = join_all(sensor_ids.iter().map(|id| self.get(id))).await;
        sensor_ids.iter().cloned().zip(results).collect()
    }

    /// Readings for every sensor in this tier; failed sensors are omitted.
    pub async fn get_all(&self) -> SensorMap {
        let sensors = self.sensors();
        self.get_many(&sensors)
            .await
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(reading) => Some((id, reading)),
                Err(e) => {
                    debug!("{} tier: omitting {}: {}", self.inner.tier, id, e);
                    None
                }
            })
            .collect()
    }
}

impl CacheInner {
    fn lock(&self) -> MutexGuard<'_, TierState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the hardware read on its own task so it completes, and releases
    /// the bus, even if every waiter goes away.
    fn spawn_refresh(inner: Arc<CacheInner>, sensor_id: String, generation: u64) -> SharedRead {
        let worker = inner.clone();
        let worker_id = sensor_id.clone();
        let task = tokio::spawn(async move {
            let result = worker.gateway.read(&worker_id).await;
            worker.complete(&worker_id, generation, result)
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    let error = SensorError::io(&sensor_id, format!("refresh task failed: {}", e));
                    inner.complete(&sensor_id, generation, Err(error))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Record the outcome of a refresh and decide what callers see.
    fn complete(&self, sensor_id: &str, generation: u64, result: ReadResult) -> ReadResult {
        let now = Instant::now();
        let mut state = self.lock();
        let slot = state.slots.entry(sensor_id.to_string()).or_default();
        if matches!(slot.in_flight, Some((g, _)) if g == generation) {
            slot.in_flight = None;
        }

        let error = match result {
            Ok(reading) => {
                slot.failure = None;
                slot.entry = Some(CacheEntry {
                    reading: reading.clone(),
                    fetched_at: now,
                    expires_at: now + self.ttl,
                });
                return Ok(reading);
            }
            Err(error) => error,
        };

        let fallback = slot
            .entry
            .take()
            .filter(|entry| now.saturating_duration_since(entry.fetched_at) <= self.max_staleness);

        match fallback {
            Some(entry) => {
                let fetched_at = entry.fetched_at;
                let stale = entry.reading.into_stale();
                warn!(
                    "{} tier: {}, serving last known value {:.2}°C from {:.1}s ago",
                    self.tier,
                    error,
                    stale.temperature_c,
                    now.saturating_duration_since(fetched_at).as_secs_f64()
                );
                slot.entry = Some(CacheEntry {
                    reading: stale.clone(),
                    fetched_at,
                    expires_at: now + self.ttl,
                });
                Ok(stale)
            }
            None => {
                warn!("{} tier: {} and no usable fallback", self.tier, error);
                slot.failure = Some(FailedRead {
                    error: error.clone(),
                    expires_at: now + self.ttl,
                });
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockBackend;
    use crate::storage::PersistentStore;
    use crate::watchdog::WatchdogMonitor;

    struct Fixture {
        backend: Arc<MockBackend>,
        cache: TieredCache,
        _dir: tempfile::TempDir,
    }

    fn fixture(ttl: Duration, max_staleness: Duration) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::new());
        backend.set_temperature("28-a", 12.0);
        backend.set_temperature("28-b", 20.0);
        let store = Arc::new(PersistentStore::open(dir.path()).unwrap());
        let watchdog = Arc::new(WatchdogMonitor::new(Duration::from_secs(10)));
        let gateway = Arc::new(SensorGateway::new(
            backend.clone(),
            store,
            watchdog,
            Duration::from_millis(1500),
        ));
        let cache = TieredCache::new(
            CacheTier::Control,
            gateway,
            ttl,
            max_staleness,
            vec!["28-a".to_string(), "28-b".to_string()],
        );
        Fixture {
            backend,
            cache,
            _dir: dir,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_read() {
        let f = fixture(Duration::from_secs(2), Duration::from_secs(60));
        f.backend.set_read_delay(Duration::from_millis(750));

        let results = join_all((0..10).map(|_| f.cache.get("28-a"))).await;

        assert_eq!(f.backend.read_count("28-a"), 1);
        let first = results[0].clone().unwrap();
        for result in results {
            assert_eq!(result.unwrap(), first);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_entry_skips_hardware() {
        let f = fixture(Duration::from_secs(2), Duration::from_secs(60));

        f.cache.get("28-a").await.unwrap();
        tokio::time::advance(Duration::from_millis(1900)).await;
        f.cache.get("28-a").await.unwrap();
        assert_eq!(f.backend.read_count("28-a"), 1);

        tokio::time::advance(Duration::from_millis(200)).await;
        f.backend.set_temperature("28-a", 12.5);
        let reading = f.cache.get("28-a").await.unwrap();
        assert_eq!(f.backend.read_count("28-a"), 2);
        assert_eq!(reading.temperature_c, 12.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_serves_last_known_good_as_stale() {
        let f = fixture(Duration::from_secs(2), Duration::from_secs(60));
        f.cache.get("28-a").await.unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        f.backend.fail_sensor("28-a", SensorError::parse("28-a", "CRC check failed"));
        let reading = f.cache.get("28-a").await.unwrap();
        assert!(reading.stale);
        assert_eq!(reading.temperature_c, 12.0);

        // The fallback is cached for a TTL like any other value.
        f.cache.get("28-a").await.unwrap();
        assert_eq!(f.backend.read_count("28-a"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_respects_staleness_ceiling() {
        let f = fixture(Duration::from_secs(1), Duration::from_secs(5));
        f.cache.get("28-a").await.unwrap();
        f.backend.remove_sensor("28-a");

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(f.cache.get("28-a").await.unwrap().stale);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(
            f.cache.get("28-a").await,
            Err(SensorError::not_found("28-a"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_without_history_is_cached_for_ttl() {
        let f = fixture(Duration::from_secs(2), Duration::from_secs(60));
        f.backend.remove_sensor("28-a");

        assert!(f.cache.get("28-a").await.is_err());
        assert!(f.cache.get("28-a").await.is_err());
        assert_eq!(f.backend.read_count("28-a"), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        f.backend.set_temperature("28-a", 11.0);
        assert_eq!(f.cache.get("28-a").await.unwrap().temperature_c, 11.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_every_waiter() {
        let f = fixture(Duration::from_secs(2), Duration::from_secs(60));
        f.backend.set_read_delay(Duration::from_secs(10));

        let results = join_all((0..3).map(|_| f.cache.get("28-b"))).await;
        assert_eq!(f.backend.read_count("28-b"), 1);
        for result in results {
            assert!(matches!(result, Err(SensorError::Timeout { .. })));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_of_different_sensors_do_not_overlap() {
        let f = fixture(Duration::from_secs(2), Duration::from_secs(60));
        f.backend.set_read_delay(Duration::from_millis(500));

        let started = Instant::now();
        let (a, b) = tokio::join!(f.cache.get("28-a"), f.cache.get("28-b"));
        assert!(a.is_ok() && b.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_all_and_sensor_set_changes() {
        let f = fixture(Duration::from_secs(2), Duration::from_secs(60));
        f.backend.remove_sensor("28-b");

        let all = f.cache.get_all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all["28-a"].temperature_c, 12.0);

        f.cache.set_sensors(vec!["28-b".to_string()]);
        assert_eq!(f.cache.sensors(), vec!["28-b"]);
        assert!(f.cache.get_all().await.is_empty());

        f.cache.get("28-a").await.unwrap();
        assert_eq!(f.backend.read_count("28-a"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_reread() {
        let f = fixture(Duration::from_secs(10), Duration::from_secs(60));
        f.cache.get("28-a").await.unwrap();
        f.cache.invalidate("28-a");
        f.cache.get("28-a").await.unwrap();
        assert_eq!(f.backend.read_count("28-a"), 2);
    }
}
