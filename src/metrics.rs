use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::time::Duration;

/// Upper bound on the raw response kept for status reporting.
pub const RAW_PREVIEW_LIMIT: usize = 10_000;

/// Live scrape metrics for one provider.
///
/// Writers take the write lock for a single update burst; readers use
/// [`ProviderMetrics::snapshot`], which copies everything out.
#[derive(Debug, Default)]
pub struct ProviderMetrics {
    inner: RwLock<MetricsSnapshot>,
}

/// Owned copy of [`ProviderMetrics`] at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub last_scrape_at: Option<DateTime<Utc>>,
    pub last_scrape_success: bool,
    pub last_response_time: Duration,
    pub last_price: Option<Decimal>,
    pub last_error: Option<String>,
    pub last_raw_response: String,
}

impl ProviderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.read().clone()
    }

    pub fn record_request(&self) {
        self.inner.write().total_requests += 1;
    }

    pub fn record_failure(&self, at: DateTime<Utc>, latency: Duration, error: &str) {
        let mut m = self.inner.write();
        m.last_scrape_at = Some(at);
        m.last_response_time = latency;
        m.total_errors += 1;
        m.last_scrape_success = false;
        m.last_error = Some(error.to_string());
    }

    /// Record a successful fetch. `first` is the first observation's price
    /// and raw payload, if the batch was not empty.
    pub fn record_success(
        &self,
        at: DateTime<Utc>,
        latency: Duration,
        first: Option<(Decimal, &[u8])>,
    ) {
        let mut m = self.inner.write();
        m.last_scrape_at = Some(at);
        m.last_response_time = latency;
        m.last_scrape_success = true;
        m.last_error = None;
        if let Some((price, raw)) = first {
            m.last_price = Some(price);
            if !raw.is_empty() {
                m.last_raw_response = truncate_preview(raw);
            }
        }
    }
}

fn truncate_preview(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    if text.len() <= RAW_PREVIEW_LIMIT {
        return text.into_owned();
    }
    let mut end = RAW_PREVIEW_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn snapshot_is_isolated_from_later_updates() {
        let metrics = ProviderMetrics::new();
        metrics.record_request();
        metrics.record_success(
            Utc::now(),
            Duration::from_millis(120),
            Some((dec!(97.81), &b"first"[..])),
        );

        let before = metrics.snapshot();

        metrics.record_request();
        metrics.record_failure(Utc::now(), Duration::from_millis(5), "timeout");
        metrics.record_success(
            Utc::now(),
            Duration::from_millis(7),
            Some((dec!(1.00), &b"second"[..])),
        );

        assert_eq!(before.total_requests, 1);
        assert_eq!(before.total_errors, 0);
        assert!(before.last_scrape_success);
        assert_eq!(before.last_price, Some(dec!(97.81)));
        assert_eq!(before.last_raw_response, "first");
        assert_eq!(before.last_response_time, Duration::from_millis(120));

        let after = metrics.snapshot();
        assert_eq!(after.total_requests, 2);
        assert_eq!(after.total_errors, 1);
        assert_eq!(after.last_raw_response, "second");
    }

    #[test]
    fn success_clears_last_error() {
        let metrics = ProviderMetrics::new();
        metrics.record_failure(Utc::now(), Duration::ZERO, "HTTP 503");
        assert_eq!(metrics.snapshot().last_error.as_deref(), Some("HTTP 503"));
        assert!(!metrics.snapshot().last_scrape_success);

        metrics.record_success(Utc::now(), Duration::ZERO, None);
        let snap = metrics.snapshot();
        assert!(snap.last_error.is_none());
        assert!(snap.last_scrape_success);
        assert_eq!(snap.total_errors, 1);
    }

    #[test]
    fn empty_batch_keeps_previous_price() {
        let metrics = ProviderMetrics::new();
        metrics.record_success(Utc::now(), Duration::ZERO, Some((dec!(90), &b"x"[..])));
        metrics.record_success(Utc::now(), Duration::ZERO, None);
        assert_eq!(metrics.snapshot().last_price, Some(dec!(90)));
    }

    #[test]
    fn raw_preview_is_truncated() {
        let raw = vec![b'a'; RAW_PREVIEW_LIMIT + 500];
        let preview = truncate_preview(&raw);
        assert_eq!(preview.len(), RAW_PREVIEW_LIMIT + 3);
        assert!(preview.ends_with("..."));

        assert_eq!(truncate_preview(b"short"), "short");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut raw = vec![b'a'; RAW_PREVIEW_LIMIT - 1];
        raw.extend_from_slice("ö".as_bytes());
        raw.extend_from_slice(b"tail");
        let preview = truncate_preview(&raw);
        assert_eq!(preview, format!("{}...", "a".repeat(RAW_PREVIEW_LIMIT - 1)));
    }
}
