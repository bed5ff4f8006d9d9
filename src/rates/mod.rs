//! Exchange rate cache.
//!
//! The table maps a currency code to how many base-currency units one unit of
//! that currency is worth (`USD -> 1350.0` with a KRW base). The base currency
//! is never stored in the map; its rate is implicitly 1.
//!
//! Readers get an `Arc` snapshot of the table. A refresh builds a whole new
//! table and swaps the pointer, so a reader never sees a half-written table.

mod schedule;
mod snapshot;
mod source;

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use arc_swap::ArcSwapOption;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::RateError;

pub use schedule::{RefreshSchedule, spawn_refresh_task};
pub use snapshot::{SnapshotStore, SqliteSnapshots};
pub use source::{HttpRateSource, RateSource, SUPPORTED_CURRENCIES};

/// Base units per unit of currency, used when nothing better is available.
/// Expressed against KRW and rebased for any other base.
const FALLBACK_KRW_RATES: &[(&str, f64)] = &[
    ("USD", 1350.0),
    ("EUR", 1470.0),
    ("JPY", 9.0),
    ("CNY", 186.0),
    ("GBP", 1710.0),
    ("VND", 0.055),
    ("THB", 38.0),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateTable {
    pub base: String,
    pub rates: BTreeMap<String, f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl RateTable {
    pub fn new(base: &str, mut rates: BTreeMap<String, f64>, updated_at: OffsetDateTime) -> Self {
        let base = base.to_uppercase();
        rates.remove(&base);
        rates.retain(|_, rate| rate.is_finite() && *rate > 0.0);
        Self { base, rates, updated_at }
    }

    pub fn fallback(base: &str, updated_at: OffsetDateTime) -> Self {
        let base = base.to_uppercase();
        let mut krw: BTreeMap<String, f64> = FALLBACK_KRW_RATES
            .iter()
            .map(|(code, rate)| (code.to_string(), *rate))
            .collect();
        krw.insert("KRW".to_owned(), 1.0);

        let rates = match krw.get(&base).copied() {
            Some(base_in_krw) => krw
                .into_iter()
                .map(|(code, rate)| (code, rate / base_in_krw))
                .collect(),
            // unknown base: nothing to convert through
            None => BTreeMap::new(),
        };
        Self::new(&base, rates, updated_at)
    }

    /// Base units per one unit of `code`.
    pub fn rate(&self, code: &str) -> Option<f64> {
        if code.eq_ignore_ascii_case(&self.base) {
            return Some(1.0);
        }
        self.rates.get(&code.to_uppercase()).copied()
    }

    pub fn is_base(&self, code: &str) -> bool {
        code.eq_ignore_ascii_case(&self.base)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    Updated,
    /// Another refresh was already running.
    Skipped,
}

pub struct RateCache {
    base: String,
    table: ArcSwapOption<RateTable>,
    fallback: Arc<RateTable>,
    source: Arc<dyn RateSource>,
    snapshots: Arc<dyn SnapshotStore>,
    fetch_timeout: Duration,
    refreshing: Mutex<()>,
}

impl RateCache {
    pub fn new(
        base: &str,
        source: Arc<dyn RateSource>,
        snapshots: Arc<dyn SnapshotStore>,
        fetch_timeout: Duration,
    ) -> Self {
        let base = base.to_uppercase();
        Self {
            fallback: Arc::new(RateTable::fallback(&base, OffsetDateTime::now_utc())),
            base,
            table: ArcSwapOption::empty(),
            source,
            snapshots,
            fetch_timeout,
            refreshing: Mutex::new(()),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Adopts the last persisted snapshot, or fetches, or settles for the
    /// built-in table. Never fails.
    pub async fn initialize(&self) {
        match self.snapshots.load_latest(&self.base).await {
            Ok(Some(table)) => {
                info!(base = %self.base, updated_at = %table.updated_at, "loaded rate snapshot");
                self.table.store(Some(Arc::new(table)));
                return;
            }
            Ok(None) => debug!(base = %self.base, "no rate snapshot stored"),
            Err(e) => warn!(base = %self.base, error = %e, "failed to load rate snapshot"),
        }

        if let Err(e) = self.refresh().await {
            warn!(base = %self.base, error = %e, "initial rate fetch failed");
        }
        // refresh() already installs the fallback when it fails on an empty cache
    }

    /// Fetches fresh rates and swaps them in. On failure the current table is
    /// kept; an empty cache gets the built-in table.
    pub async fn refresh(&self) -> Result<Refresh, RateError> {
        let Ok(_guard) = self.refreshing.try_lock() else {
            debug!(base = %self.base, "rate refresh already in flight");
            return Ok(Refresh::Skipped);
        };

        let fetch = self.source.fetch(&self.base);
        let fetched = match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(RateError::Timeout(self.fetch_timeout)),
        };

        let rates = match fetched {
            Ok(rates) if !rates.is_empty() => rates,
            Ok(_) => {
                let e = RateError::BadResponse("no usable rates".to_owned());
                return Err(self.keep_current(e));
            }
            Err(e) => return Err(self.keep_current(e)),
        };

        let table = RateTable::new(&self.base, rates, OffsetDateTime::now_utc());
        if let Err(e) = self.snapshots.save(&table).await {
            warn!(base = %self.base, error = %e, "failed to persist rate snapshot");
        }

        info!(base = %self.base, currencies = table.rates.len(), "exchange rates refreshed");
        self.table.store(Some(Arc::new(table)));
        Ok(Refresh::Updated)
    }

    fn keep_current(&self, error: RateError) -> RateError {
        warn!(base = %self.base, error = %error, "rate refresh failed, keeping current table");
        if self.table.load().is_none() {
            warn!(base = %self.base, "no rates ever loaded, using built-in table");
            let fallback = RateTable::fallback(&self.base, OffsetDateTime::now_utc());
            self.table.store(Some(Arc::new(fallback)));
        }
        error
    }

    pub fn try_current_table(&self) -> Result<Arc<RateTable>, RateError> {
        self.table.load_full().ok_or(RateError::Unavailable)
    }

    /// The table in use, or the built-in one if nothing was ever loaded.
    pub fn current_table(&self) -> Arc<RateTable> {
        self.try_current_table().unwrap_or_else(|_| self.fallback.clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    pub(crate) fn rates(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(c, r)| (c.to_string(), *r)).collect()
    }

    /// Serves queued responses in order, then fails.
    #[derive(Default)]
    pub(crate) struct ScriptedSource {
        responses: StdMutex<Vec<Result<BTreeMap<String, f64>, RateError>>>,
        pub(crate) calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl ScriptedSource {
        pub(crate) fn new(mut responses: Vec<Result<BTreeMap<String, f64>, RateError>>) -> Self {
            responses.reverse();
            Self { responses: StdMutex::new(responses), ..Default::default() }
        }

        pub(crate) fn slow(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl RateSource for ScriptedSource {
        async fn fetch(&self, _base: &str) -> Result<BTreeMap<String, f64>, RateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(RateError::BadResponse("source offline".into())))
        }
    }

    #[derive(Default)]
    pub(crate) struct MemorySnapshots {
        pub(crate) saved: StdMutex<Vec<RateTable>>,
        fail_load: bool,
    }

    #[async_trait]
    impl SnapshotStore for MemorySnapshots {
        async fn load_latest(&self, base: &str) -> Result<Option<RateTable>, RateError> {
            if self.fail_load {
                return Err(RateError::Snapshot(sqlx::Error::PoolClosed));
            }
            Ok(self.saved.lock().unwrap().iter().rev().find(|t| t.base == base).cloned())
        }

        async fn save(&self, table: &RateTable) -> Result<(), RateError> {
            self.saved.lock().unwrap().push(table.clone());
            Ok(())
        }
    }

    fn cache(
        source: ScriptedSource,
        snapshots: MemorySnapshots,
    ) -> (RateCache, Arc<ScriptedSource>, Arc<MemorySnapshots>) {
        let source = Arc::new(source);
        let snapshots = Arc::new(snapshots);
        let timeout = Duration::from_secs(10);
        let cache = RateCache::new("KRW", source.clone(), snapshots.clone(), timeout);
        (cache, source, snapshots)
    }

    #[test]
    fn table_never_stores_base() {
        let pairs = rates(&[("KRW", 2.0), ("USD", 1350.0)]);
        let table = RateTable::new("krw", pairs, OffsetDateTime::UNIX_EPOCH);
        assert_eq!(table.base, "KRW");
        assert!(!table.rates.contains_key("KRW"));
        assert_eq!(table.rate("KRW"), Some(1.0));
        assert_eq!(table.rate("usd"), Some(1350.0));
    }

    #[test]
    fn fallback_rebases_onto_other_base() {
        let table = RateTable::fallback("USD", OffsetDateTime::UNIX_EPOCH);
        assert_eq!(table.rate("USD"), Some(1.0));
        assert!((table.rate("KRW").unwrap() - 1.0 / 1350.0).abs() < 1e-12);
        assert!((table.rate("EUR").unwrap() - 1470.0 / 1350.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_table() {
        let (cache, _, _) = cache(
            ScriptedSource::new(vec![
                Ok(rates(&[("USD", 1350.0), ("EUR", 1470.0)])),
                Err(RateError::BadResponse("boom".into())),
            ]),
            MemorySnapshots::default(),
        );

        assert_eq!(cache.refresh().await.unwrap(), Refresh::Updated);
        let before = cache.current_table();
        assert!(cache.refresh().await.is_err());

        let after = cache.current_table();
        assert_eq!(after.rates, rates(&[("USD", 1350.0), ("EUR", 1470.0)]));
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn initialize_prefers_snapshot() {
        let snapshots = MemorySnapshots::default();
        snapshots.saved.lock().unwrap().push(RateTable::new(
            "KRW",
            rates(&[("USD", 1300.0)]),
            OffsetDateTime::UNIX_EPOCH,
        ));
        let (cache, source, _) = cache(ScriptedSource::new(vec![]), snapshots);

        cache.initialize().await;
        assert_eq!(cache.current_table().rate("USD"), Some(1300.0));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn initialize_fetches_and_persists_without_snapshot() {
        let (cache, _, snapshots) = cache(
            ScriptedSource::new(vec![Ok(rates(&[("USD", 1400.0)]))]),
            MemorySnapshots::default(),
        );

        cache.initialize().await;
        assert_eq!(cache.current_table().rate("USD"), Some(1400.0));
        assert_eq!(snapshots.saved.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn initialize_falls_back_when_everything_fails() {
        let (cache, _, _) = cache(
            ScriptedSource::new(vec![]),
            MemorySnapshots { fail_load: true, ..Default::default() },
        );

        assert!(matches!(cache.try_current_table(), Err(RateError::Unavailable)));
        cache.initialize().await;
        let table = cache.try_current_table().unwrap();
        assert_eq!(table.rate("USD"), Some(1350.0));
    }

    #[tokio::test]
    async fn empty_cache_reads_fallback() {
        let (cache, _, _) = cache(ScriptedSource::new(vec![]), MemorySnapshots::default());
        assert_eq!(cache.current_table().rate("EUR"), Some(1470.0));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_times_out() {
        let (cache, _, _) = cache(
            ScriptedSource::new(vec![Ok(rates(&[("USD", 1.0)]))]).slow(Duration::from_secs(60)),
            MemorySnapshots::default(),
        );

        assert!(matches!(cache.refresh().await, Err(RateError::Timeout(_))));
        assert_eq!(cache.current_table().rate("USD"), Some(1350.0));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_refresh_is_skipped() {
        let (cache, source, _) = cache(
            ScriptedSource::new(vec![Ok(rates(&[("USD", 1380.0)]))]).slow(Duration::from_secs(1)),
            MemorySnapshots::default(),
        );

        let (first, second) = tokio::join!(cache.refresh(), cache.refresh());
        assert_eq!(first.unwrap(), Refresh::Updated);
        assert_eq!(second.unwrap(), Refresh::Skipped);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
