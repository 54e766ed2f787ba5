/// Time-to-live cache for the opened forecast grid.
///
/// Opening the upstream source is the expensive part of an on-demand query,
/// so the query path shares one opened `ForecastDataset` and only reopens it
/// once it is older than the configured TTL (300 s by default), which is also
/// how new model runs get picked up.
///
/// Refreshing replaces the shared `Arc` in one step. A request that already
/// holds the previous `Arc` keeps using it until it finishes; nobody ever
/// sees a half-updated dataset.
///
/// # Clock injection
/// `get_or_refresh` takes `now: DateTime<Utc>` rather than calling
/// `Utc::now()` internally, so expiry is deterministic in tests.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};

use super::{ForecastDataset, ForecastSource, SourceError};
use crate::logging::Component;

pub const DEFAULT_TTL_SECONDS: i64 = 300;

// ---------------------------------------------------------------------------
// Expiry check
// ---------------------------------------------------------------------------

/// Returns `true` if a dataset opened at `last_refresh` is older than `ttl`
/// relative to `now`.
///
/// Expiry is strictly greater than the TTL:
///   age > ttl  →  expired
///   age == ttl →  still fresh
pub fn is_expired_at(last_refresh: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    now - last_refresh > ttl
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CachedDataset {
    dataset: Arc<ForecastDataset>,
    last_refresh: DateTime<Utc>,
}

/// Shared handle to the upstream grid, owned by the query orchestrator and
/// passed explicitly to call sites.
pub struct DatasetCache {
    source: Arc<dyn ForecastSource>,
    ttl: Duration,
    current: RwLock<Option<CachedDataset>>,
    // Serializes reopening so concurrent requests that see an expired entry
    // trigger one upstream open, not one each.
    refresh: Mutex<()>,
}

impl DatasetCache {
    pub fn new(source: Arc<dyn ForecastSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            current: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    pub fn with_default_ttl(source: Arc<dyn ForecastSource>) -> Self {
        Self::new(source, Duration::seconds(DEFAULT_TTL_SECONDS))
    }

    pub fn source_name(&self) -> String {
        self.source.name()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// When the cached dataset was last opened, if ever.
    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.read().as_ref().map(|c| c.last_refresh)
    }

    /// Returns the cached dataset, reopening the source first if the cache is
    /// empty or expired at `now`.
    ///
    /// If reopening fails the error is returned and the previous entry is
    /// left in place; the next call tries again.
    pub fn get_or_refresh(&self, now: DateTime<Utc>) -> Result<Arc<ForecastDataset>, SourceError> {
        if let Some(dataset) = self.fresh(now) {
            return Ok(dataset);
        }

        let _guard = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(dataset) = self.fresh(now) {
            return Ok(dataset);
        }

        tracing::info!(component = %Component::Cache, source = %self.source.name(), "refreshing forecast dataset cache");
        let dataset = Arc::new(self.source.open()?);
        tracing::info!(
            component = %Component::Cache,
            variables = ?dataset.variable_names(),
            init_time = ?dataset.latest_init_time(),
            "loaded forecast dataset"
        );

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(CachedDataset {
            dataset: Arc::clone(&dataset),
            last_refresh: now,
        });
        Ok(dataset)
    }

    /// Convenience wrapper that uses the real current time.
    /// Use `get_or_refresh` in tests to keep them deterministic.
    pub fn get(&self) -> Result<Arc<ForecastDataset>, SourceError> {
        self.get_or_refresh(Utc::now())
    }

    /// Drops the cached dataset so the next call reopens the source.
    pub fn invalidate(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn fresh(&self, now: DateTime<Utc>) -> Option<Arc<ForecastDataset>> {
        self.read()
            .as_ref()
            .filter(|c| !is_expired_at(c.last_refresh, self.ttl, now))
            .map(|c| Arc::clone(&c.dataset))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<CachedDataset>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::grid::{ForecastRun, TimeAxis};
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Source that counts opens and stamps each dataset with the open count.
    struct CountingSource {
        opens: AtomicUsize,
        fail: AtomicBool,
    }

    impl CountingSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                opens: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }
    }

    impl ForecastSource for CountingSource {
        fn name(&self) -> String {
            "counting".to_string()
        }

        fn open(&self) -> Result<ForecastDataset, SourceError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SourceError::HttpStatus {
                    status: 503,
                    url: "counting".to_string(),
                });
            }
            let n = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
            let mut variables = BTreeMap::new();
            variables.insert("2t".to_string(), vec![Some(270.0)]);
            Ok(ForecastDataset {
                title: format!("open #{}", n),
                source: String::new(),
                latitude: vec![0.0],
                longitude: vec![0.0],
                runs: vec![ForecastRun {
                    init_time: None,
                    time: TimeAxis::LeadHours(vec![0.0]),
                    variables,
                }],
            })
        }
    }

    /// A fixed "now" used across all tests: 2025-01-28 06:00:00 UTC.
    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 28, 6, 0, 0).unwrap()
    }

    #[test]
    fn test_expiry_is_strictly_greater_than_ttl() {
        let ttl = Duration::seconds(300);
        let t0 = fixed_now();
        assert!(!is_expired_at(t0, ttl, t0 + Duration::seconds(299)));
        assert!(!is_expired_at(t0, ttl, t0 + Duration::seconds(300)));
        assert!(is_expired_at(t0, ttl, t0 + Duration::seconds(301)));
    }

    #[test]
    fn test_first_call_opens_and_later_calls_reuse() {
        let source = CountingSource::new();
        let cache = DatasetCache::with_default_ttl(source.clone());
        assert_eq!(cache.last_refresh(), None);

        let a = cache.get_or_refresh(fixed_now()).unwrap();
        let b = cache.get_or_refresh(fixed_now() + Duration::seconds(300)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(source.opens.load(Ordering::SeqCst), 1);
        assert_eq!(cache.last_refresh(), Some(fixed_now()));
    }

    #[test]
    fn test_expired_entry_is_replaced_but_held_handles_survive() {
        let source = CountingSource::new();
        let cache = DatasetCache::with_default_ttl(source.clone());

        let held = cache.get_or_refresh(fixed_now()).unwrap();
        let later = fixed_now() + Duration::seconds(301);
        let fresh = cache.get_or_refresh(later).unwrap();

        assert_eq!(source.opens.load(Ordering::SeqCst), 2);
        assert_eq!(held.title, "open #1", "in-flight handle must be untouched");
        assert_eq!(fresh.title, "open #2");
        assert_eq!(cache.last_refresh(), Some(later));
    }

    #[test]
    fn test_failed_refresh_keeps_previous_entry() {
        let source = CountingSource::new();
        let cache = DatasetCache::with_default_ttl(source.clone());
        cache.get_or_refresh(fixed_now()).unwrap();

        source.fail.store(true, Ordering::SeqCst);
        let err = cache
            .get_or_refresh(fixed_now() + Duration::seconds(600))
            .unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(cache.last_refresh(), Some(fixed_now()));

        source.fail.store(false, Ordering::SeqCst);
        let recovered = cache.get_or_refresh(fixed_now() + Duration::seconds(601)).unwrap();
        assert_eq!(recovered.title, "open #2");
    }

    #[test]
    fn test_invalidate_forces_reopen() {
        let source = CountingSource::new();
        let cache = DatasetCache::with_default_ttl(source.clone());
        cache.get_or_refresh(fixed_now()).unwrap();
        cache.invalidate();
        cache.get_or_refresh(fixed_now()).unwrap();
        assert_eq!(source.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_readers_share_one_open() {
        let source = CountingSource::new();
        let cache = Arc::new(DatasetCache::with_default_ttl(source.clone()));
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let cache = Arc::clone(&cache);
                scope.spawn(move || cache.get_or_refresh(fixed_now()).unwrap());
            }
        });
        assert_eq!(source.opens.load(Ordering::SeqCst), 1);
    }
}
