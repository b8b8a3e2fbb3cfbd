use crate::error::{ProviderError, StorageResult};
use crate::metrics::{MetricsSnapshot, ProviderMetrics};
use crate::sources::{Pacing, PriceProvider};
use crate::storage::PriceStore;
use crate::types::{PriceObservation, PriceScope, StoreSummary, DEFAULT_PRODUCT_TYPE};
use chrono::{Local, NaiveDate, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct Registered {
    provider: Arc<dyn PriceProvider>,
    metrics: Arc<ProviderMetrics>,
}

/// Runs scrapes and backfills against the registered providers and stores
/// every observation whose logical key is not stored yet.
///
/// The registry lock is only held to look providers up, never across a
/// fetch, so concurrent scrapes from different callers are fine.
pub struct Scraper {
    store: Arc<dyn PriceStore>,
    providers: RwLock<HashMap<String, Registered>>,
    store_raw_response: bool,
}

impl Scraper {
    pub fn new(store: Arc<dyn PriceStore>, store_raw_response: bool) -> Self {
        Self {
            store,
            providers: RwLock::new(HashMap::new()),
            store_raw_response,
        }
    }

    /// Register a provider under its name. Re-registering a name replaces
    /// the provider and starts its metrics from zero.
    pub fn register_provider(&self, provider: Arc<dyn PriceProvider>) {
        let name = provider.name().to_string();
        let replaced = self
            .providers
            .write()
            .insert(
                name.clone(),
                Registered {
                    provider,
                    metrics: Arc::new(ProviderMetrics::new()),
                },
            )
            .is_some();
        if replaced {
            warn!(provider = %name, "provider re-registered, metrics reset");
        } else {
            debug!(provider = %name, "registered provider");
        }
    }

    pub fn providers(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }

    pub fn metrics(&self, name: &str) -> Option<MetricsSnapshot> {
        self.providers.read().get(name).map(|r| r.metrics.snapshot())
    }

    pub fn all_metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.providers
            .read()
            .iter()
            .map(|(name, r)| (name.clone(), r.metrics.snapshot()))
            .collect()
    }

    pub fn store(&self) -> &Arc<dyn PriceStore> {
        &self.store
    }

    fn lookup(&self, name: &str) -> Option<(Arc<dyn PriceProvider>, Arc<ProviderMetrics>)> {
        self.providers
            .read()
            .get(name)
            .map(|r| (r.provider.clone(), r.metrics.clone()))
    }

    /// Scrape every registered provider, one after another. A failing
    /// provider is logged and recorded in its metrics; the pass continues.
    pub async fn scrape_all(&self, cancel: &CancellationToken) -> StoreSummary {
        let mut total = StoreSummary::default();

        for name in self.providers() {
            if cancel.is_cancelled() {
                warn!("scrape pass cancelled");
                break;
            }
            match self.scrape_provider(cancel, &name).await {
                Ok(summary) => {
                    total.fetched += summary.fetched;
                    total.inserted += summary.inserted;
                    total.skipped += summary.skipped;
                    total.failed += summary.failed;
                }
                Err(e) => error!(provider = %name, error = %e, "failed to scrape provider"),
            }
        }

        total
    }

    /// Fetch current prices from one provider and store the new ones.
    ///
    /// An unknown name is logged and treated as success. A fetch error is
    /// returned after it has been recorded in the provider's metrics.
    pub async fn scrape_provider(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<StoreSummary, ProviderError> {
        let Some((provider, metrics)) = self.lookup(name) else {
            warn!(provider = %name, "provider not found");
            return Ok(StoreSummary::default());
        };

        info!(provider = %name, "scraping provider");

        metrics.record_request();
        let start = Instant::now();
        let result = provider.fetch_current(cancel).await;
        let latency = start.elapsed();

        let prices = match result {
            Ok(prices) => prices,
            Err(e) => {
                metrics.record_failure(Utc::now(), latency, &e.to_string());
                error!(
                    provider = %name,
                    error = %e,
                    duration_ms = latency.as_millis() as u64,
                    "failed to fetch prices"
                );
                return Err(e);
            }
        };

        metrics.record_success(
            Utc::now(),
            latency,
            prices
                .first()
                .map(|p| (p.price_per_100l, p.raw_payload.as_slice())),
        );

        info!(
            provider = %name,
            count = prices.len(),
            duration_ms = latency.as_millis() as u64,
            "fetched prices"
        );

        Ok(self.store_batch(&prices).await)
    }

    /// Fetch a historical range in one provider call and store the new prices.
    ///
    /// Unknown providers and providers without backfill support are a
    /// logged no-op returning an empty summary.
    pub async fn backfill(
        &self,
        cancel: &CancellationToken,
        name: &str,
        from: NaiveDate,
        to: NaiveDate,
        pacing: Pacing,
    ) -> Result<StoreSummary, ProviderError> {
        let Some((provider, _)) = self.lookup(name) else {
            warn!(provider = %name, "provider not found");
            return Ok(StoreSummary::default());
        };

        if !provider.supports_backfill() {
            warn!(provider = %name, "provider does not support backfill");
            return Ok(StoreSummary::default());
        }

        info!(
            provider = %name,
            %from,
            %to,
            min_delay_ms = pacing.min_delay.as_millis() as u64,
            max_delay_ms = pacing.max_delay.as_millis() as u64,
            "starting backfill"
        );

        let prices = provider.fetch_historical(cancel, from, to, pacing).await?;
        info!(provider = %name, count = prices.len(), "fetched historical prices");

        let summary = self.store_batch(&prices).await;
        info!(
            provider = %name,
            inserted = summary.inserted,
            skipped = summary.skipped,
            failed = summary.failed,
            "backfill completed"
        );
        Ok(summary)
    }

    /// Whether today's national price of the default product type is stored.
    ///
    /// Always `false` for local-scope providers: the check would need a
    /// zip code, and the scraper does not track which one a provider uses.
    pub async fn has_scraped_today(&self, name: &str) -> StorageResult<bool> {
        self.has_scraped_on(name, Local::now().date_naive()).await
    }

    pub async fn has_scraped_on(&self, name: &str, date: NaiveDate) -> StorageResult<bool> {
        let Some((provider, _)) = self.lookup(name) else {
            return Ok(false);
        };
        if provider.price_scope() == PriceScope::Local {
            return Ok(false);
        }
        self.store
            .exists_for_key(name, DEFAULT_PRODUCT_TYPE, date, None)
            .await
    }

    /// Store each observation whose key is not yet present. Failures are
    /// per observation and never stop the rest of the batch.
    async fn store_batch(&self, prices: &[PriceObservation]) -> StoreSummary {
        let mut summary = StoreSummary {
            fetched: prices.len(),
            ..Default::default()
        };

        for price in prices {
            let exists = self
                .store
                .exists_for_key(
                    &price.provider,
                    &price.product_type,
                    price.date,
                    price.zip_code.as_deref(),
                )
                .await;

            match exists {
                Ok(true) => {
                    debug!(key = %price.key(), "price already exists, skipping");
                    summary.skipped += 1;
                }
                Ok(false) => {
                    match self
                        .store
                        .insert_or_update(price, self.store_raw_response)
                        .await
                    {
                        Ok(()) => summary.inserted += 1,
                        Err(e) => {
                            error!(key = %price.key(), error = %e, "failed to store price");
                            summary.failed += 1;
                        }
                    }
                }
                Err(e) => {
                    error!(key = %price.key(), error = %e, "failed to check existence");
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider returning a fixed batch, or failing on every call.
    pub(crate) struct StubProvider {
        pub name: String,
        pub scope: PriceScope,
        pub backfill: bool,
        pub fail: bool,
        pub prices: Vec<PriceObservation>,
        pub calls: AtomicUsize,
    }

    impl StubProvider {
        pub fn ok(name: &str, prices: Vec<PriceObservation>) -> Self {
            Self {
                name: name.to_string(),
                scope: PriceScope::National,
                backfill: true,
                fail: false,
                prices,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing(name: &str) -> Self {
            Self {
                fail: true,
                ..Self::ok(name, Vec::new())
            }
        }

        fn respond(&self) -> Result<Vec<PriceObservation>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::Http {
                    provider: self.name.clone(),
                    status: 503,
                    body: "upstream down".to_string(),
                });
            }
            Ok(self.prices.clone())
        }
    }

    #[async_trait]
    impl PriceProvider for StubProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch_current(
            &self,
            _cancel: &CancellationToken,
        ) -> Result<Vec<PriceObservation>, ProviderError> {
            self.respond()
        }

        async fn fetch_historical(
            &self,
            _cancel: &CancellationToken,
            _from: NaiveDate,
            _to: NaiveDate,
            _pacing: Pacing,
        ) -> Result<Vec<PriceObservation>, ProviderError> {
            self.respond()
        }

        fn supports_backfill(&self) -> bool {
            self.backfill
        }

        fn price_scope(&self) -> PriceScope {
            self.scope
        }
    }

    /// Wraps a [`MemoryStore`], counting writes and failing writes for one price.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        writes: AtomicUsize,
        fail_price: Option<Decimal>,
    }

    #[async_trait]
    impl PriceStore for CountingStore {
        async fn exists_for_key(
            &self,
            provider: &str,
            product_type: &str,
            date: NaiveDate,
            zip_code: Option<&str>,
        ) -> StorageResult<bool> {
            self.inner
                .exists_for_key(provider, product_type, date, zip_code)
                .await
        }

        async fn insert_or_update(
            &self,
            observation: &PriceObservation,
            store_raw_payload: bool,
        ) -> StorageResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_price == Some(observation.price_per_100l) {
                return Err(StorageError::Unavailable("disk full".to_string()));
            }
            self.inner
                .insert_or_update(observation, store_raw_payload)
                .await
        }

        async fn total_count(&self) -> StorageResult<i64> {
            self.inner.total_count().await
        }

        async fn ping(&self) -> StorageResult<()> {
            Ok(())
        }
    }

    fn today() -> NaiveDate {
        Local::now().date_naive()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[tokio::test]
    async fn scrape_stores_observation_and_records_metrics() {
        let store = Arc::new(MemoryStore::new());
        let scraper = Scraper::new(store.clone(), true);
        let obs = PriceObservation::national("stub", "standard", today(), dec!(97.81));
        scraper.register_provider(Arc::new(StubProvider::ok("stub", vec![obs.clone()])));

        let summary = scraper
            .scrape_provider(&CancellationToken::new(), "stub")
            .await
            .unwrap();

        assert_eq!(summary.inserted, 1);
        assert_eq!(store.total_count().await.unwrap(), 1);
        assert_eq!(store.get(&obs.key()).unwrap().price_per_100l, dec!(97.81));

        let metrics = scraper.metrics("stub").unwrap();
        assert!(metrics.last_scrape_success);
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.total_errors, 0);
        assert_eq!(metrics.last_price, Some(dec!(97.81)));
        assert!(metrics.last_scrape_at.is_some());
    }

    #[tokio::test]
    async fn existing_key_is_not_written_again() {
        let store = Arc::new(CountingStore::default());
        let obs = PriceObservation::national("stub", "standard", day(1), dec!(97.81));
        store.inner.insert_or_update(&obs, false).await.unwrap();

        let scraper = Scraper::new(store.clone(), false);
        scraper.register_provider(Arc::new(StubProvider::ok("stub", vec![obs])));

        let summary = scraper
            .scrape_provider(&CancellationToken::new(), "stub")
            .await
            .unwrap();

        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.inserted, 0);
        assert!(scraper.metrics("stub").unwrap().last_scrape_success);
    }

    #[tokio::test]
    async fn failing_provider_does_not_stop_the_pass() {
        let store = Arc::new(MemoryStore::new());
        let scraper = Scraper::new(store.clone(), true);
        scraper.register_provider(Arc::new(StubProvider::failing("broken")));
        scraper.register_provider(Arc::new(StubProvider::ok(
            "working",
            vec![PriceObservation::national("working", "standard", day(1), dec!(88.20))],
        )));

        let summary = scraper.scrape_all(&CancellationToken::new()).await;
        assert_eq!(summary.inserted, 1);

        let broken = scraper.metrics("broken").unwrap();
        assert_eq!(broken.total_errors, 1);
        assert_eq!(broken.total_requests, 1);
        assert!(!broken.last_scrape_success);
        assert!(broken.last_error.unwrap().contains("503"));

        let working = scraper.metrics("working").unwrap();
        assert_eq!(working.last_price, Some(dec!(88.20)));
        assert!(working.last_scrape_success);
    }

    #[tokio::test]
    async fn scrape_provider_returns_fetch_error() {
        let scraper = Scraper::new(Arc::new(MemoryStore::new()), true);
        scraper.register_provider(Arc::new(StubProvider::failing("broken")));

        let err = scraper
            .scrape_provider(&CancellationToken::new(), "broken")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Http { status: 503, .. }));
    }

    #[tokio::test]
    async fn unknown_provider_is_not_an_error() {
        let scraper = Scraper::new(Arc::new(MemoryStore::new()), true);
        let summary = scraper
            .scrape_provider(&CancellationToken::new(), "nope")
            .await
            .unwrap();
        assert_eq!(summary, StoreSummary::default());
        assert!(scraper.metrics("nope").is_none());
    }

    #[tokio::test]
    async fn cancelled_pass_visits_no_provider() {
        let store = Arc::new(MemoryStore::new());
        let scraper = Scraper::new(store.clone(), true);
        let a = Arc::new(StubProvider::ok(
            "a",
            vec![PriceObservation::national("a", "standard", day(1), dec!(1))],
        ));
        let b = Arc::new(StubProvider::failing("b"));
        scraper.register_provider(a.clone());
        scraper.register_provider(b.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = scraper.scrape_all(&cancel).await;

        assert_eq!(summary, StoreSummary::default());
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
        assert_eq!(b.calls.load(Ordering::SeqCst), 0);
        assert_eq!(scraper.metrics("a").unwrap().total_requests, 0);
        assert_eq!(scraper.metrics("b").unwrap().total_requests, 0);
        assert_eq!(store.total_count().await.unwrap(), 0);
    }

    /// Provider whose fetch only returns once the token is cancelled.
    struct HangingProvider;

    #[async_trait]
    impl PriceProvider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn fetch_current(
            &self,
            cancel: &CancellationToken,
        ) -> Result<Vec<PriceObservation>, ProviderError> {
            cancel.cancelled().await;
            Err(ProviderError::Cancelled)
        }

        async fn fetch_historical(
            &self,
            cancel: &CancellationToken,
            _from: NaiveDate,
            _to: NaiveDate,
            _pacing: Pacing,
        ) -> Result<Vec<PriceObservation>, ProviderError> {
            cancel.cancelled().await;
            Err(ProviderError::Cancelled)
        }

        fn supports_backfill(&self) -> bool {
            false
        }

        fn price_scope(&self) -> PriceScope {
            PriceScope::National
        }
    }

    #[tokio::test]
    async fn cancellation_reaches_in_flight_fetch() {
        let scraper = Scraper::new(Arc::new(MemoryStore::new()), true);
        scraper.register_provider(Arc::new(HangingProvider));

        let cancel = CancellationToken::new();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                cancel.cancel();
            }
        });

        let err = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            scraper.scrape_provider(&cancel, "hanging"),
        )
        .await
        .expect("fetch did not observe cancellation")
        .unwrap_err();

        assert!(matches!(err, ProviderError::Cancelled));
        let snap = scraper.metrics("hanging").unwrap();
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.total_errors, 1);
        assert!(!snap.last_scrape_success);
    }

    #[tokio::test]
    async fn storage_failure_skips_only_that_observation() {
        let store = Arc::new(CountingStore {
            fail_price: Some(dec!(2)),
            ..Default::default()
        });
        let scraper = Scraper::new(store.clone(), true);
        scraper.register_provider(Arc::new(StubProvider::ok(
            "stub",
            vec![
                PriceObservation::national("stub", "standard", day(1), dec!(1)),
                PriceObservation::national("stub", "standard", day(2), dec!(2)),
                PriceObservation::national("stub", "standard", day(3), dec!(3)),
            ],
        )));

        let summary = scraper
            .scrape_provider(&CancellationToken::new(), "stub")
            .await
            .unwrap();

        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(store.writes.load(Ordering::SeqCst), 3);
        assert_eq!(store.total_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn reregistering_resets_metrics() {
        let scraper = Scraper::new(Arc::new(MemoryStore::new()), true);
        scraper.register_provider(Arc::new(StubProvider::failing("stub")));
        let _ = scraper
            .scrape_provider(&CancellationToken::new(), "stub")
            .await;
        assert_eq!(scraper.metrics("stub").unwrap().total_errors, 1);

        scraper.register_provider(Arc::new(StubProvider::ok("stub", Vec::new())));
        assert_eq!(scraper.metrics("stub").unwrap(), MetricsSnapshot::default());
        assert_eq!(scraper.providers(), vec!["stub".to_string()]);
    }

    #[tokio::test]
    async fn backfill_counts_inserted_and_skipped() {
        let store = Arc::new(MemoryStore::new());
        let existing = PriceObservation::national("stub", "standard", day(1), dec!(90));
        store.insert_or_update(&existing, false).await.unwrap();

        let scraper = Scraper::new(store.clone(), false);
        let provider = Arc::new(StubProvider::ok(
            "stub",
            vec![
                existing,
                PriceObservation::national("stub", "standard", day(2), dec!(91)),
                PriceObservation::national("stub", "standard", day(3), dec!(92)),
            ],
        ));
        scraper.register_provider(provider.clone());

        let summary = scraper
            .backfill(
                &CancellationToken::new(),
                "stub",
                day(1),
                day(3),
                Pacing::default(),
            )
            .await
            .unwrap();

        assert_eq!(
            summary,
            StoreSummary {
                fetched: 3,
                inserted: 2,
                skipped: 1,
                failed: 0
            }
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.total_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn backfill_skips_unsupported_and_unknown_providers() {
        let scraper = Scraper::new(Arc::new(MemoryStore::new()), true);
        let provider = Arc::new(StubProvider {
            backfill: false,
            ..StubProvider::ok(
                "local",
                vec![PriceObservation::national("local", "standard", day(1), dec!(1))],
            )
        });
        scraper.register_provider(provider.clone());
        let cancel = CancellationToken::new();

        let summary = scraper
            .backfill(&cancel, "local", day(1), day(2), Pacing::default())
            .await
            .unwrap();
        assert_eq!(summary, StoreSummary::default());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

        let summary = scraper
            .backfill(&cancel, "missing", day(1), day(2), Pacing::default())
            .await
            .unwrap();
        assert_eq!(summary, StoreSummary::default());
    }

    #[tokio::test]
    async fn has_scraped_today_checks_national_default_product() {
        let store = Arc::new(MemoryStore::new());
        let scraper = Scraper::new(store.clone(), true);
        scraper.register_provider(Arc::new(StubProvider::ok("stub", Vec::new())));

        assert!(!scraper.has_scraped_today("stub").await.unwrap());

        let obs = PriceObservation::national("stub", DEFAULT_PRODUCT_TYPE, today(), dec!(97.81));
        store.insert_or_update(&obs, false).await.unwrap();
        assert!(scraper.has_scraped_today("stub").await.unwrap());
        assert!(!scraper.has_scraped_today("unknown").await.unwrap());
    }

    #[tokio::test]
    async fn has_scraped_today_is_false_for_local_providers() {
        let store = Arc::new(MemoryStore::new());
        let scraper = Scraper::new(store.clone(), true);
        scraper.register_provider(Arc::new(StubProvider {
            scope: PriceScope::Local,
            ..StubProvider::ok("local", Vec::new())
        }));

        let national_row =
            PriceObservation::national("local", DEFAULT_PRODUCT_TYPE, today(), dec!(1));
        store.insert_or_update(&national_row, false).await.unwrap();

        assert!(!scraper.has_scraped_today("local").await.unwrap());
    }
}
