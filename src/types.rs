use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Product type used when a provider only publishes a single price series.
pub const DEFAULT_PRODUCT_TYPE: &str = "standard";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceScope {
    /// Price for a specific postal area.
    Local,
    /// Nationwide average price.
    National,
}

impl PriceScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceScope::Local => "local",
            PriceScope::National => "national",
        }
    }
}

impl fmt::Display for PriceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single price as reported by a provider, ready to be stored.
///
/// `zip_code` is `Some` exactly when `scope` is [`PriceScope::Local`]; the
/// constructors enforce this.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceObservation {
    pub date: NaiveDate,
    pub price_per_100l: Decimal,
    pub currency: String,
    pub provider: String,
    pub product_type: String,
    pub scope: PriceScope,
    pub zip_code: Option<String>,
    #[serde(skip)]
    pub raw_payload: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl PriceObservation {
    pub fn national(
        provider: impl Into<String>,
        product_type: impl Into<String>,
        date: NaiveDate,
        price_per_100l: Decimal,
    ) -> Self {
        Self {
            date,
            price_per_100l,
            currency: "EUR".to_string(),
            provider: provider.into(),
            product_type: product_type.into(),
            scope: PriceScope::National,
            zip_code: None,
            raw_payload: Vec::new(),
            fetched_at: Utc::now(),
        }
    }

    pub fn local(
        provider: impl Into<String>,
        product_type: impl Into<String>,
        date: NaiveDate,
        price_per_100l: Decimal,
        zip_code: impl Into<String>,
    ) -> Self {
        Self {
            scope: PriceScope::Local,
            zip_code: Some(zip_code.into()),
            ..Self::national(provider, product_type, date, price_per_100l)
        }
    }

    pub fn with_raw_payload(mut self, raw_payload: Vec<u8>) -> Self {
        self.raw_payload = raw_payload;
        self
    }

    pub fn with_fetched_at(mut self, fetched_at: DateTime<Utc>) -> Self {
        self.fetched_at = fetched_at;
        self
    }

    pub fn key(&self) -> LogicalKey {
        LogicalKey {
            provider: self.provider.clone(),
            product_type: self.product_type.clone(),
            date: self.date,
            zip_code: self.zip_code.clone(),
        }
    }
}

/// Identity of a stored price: at most one record exists per key.
///
/// A missing zip code is a single value for equality, so two national
/// prices for the same provider, product and day are the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalKey {
    pub provider: String,
    pub product_type: String,
    pub date: NaiveDate,
    pub zip_code: Option<String>,
}

impl fmt::Display for LogicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.provider,
            self.product_type,
            self.date,
            self.zip_code.as_deref().unwrap_or("-")
        )
    }
}

/// Outcome of storing one batch of observations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub fetched: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub enabled: bool,
    pub last_scrape_at: Option<DateTime<Utc>>,
    pub last_scrape_success: bool,
    pub last_response_time_ms: u64,
    pub last_price: Option<Decimal>,
    pub last_error: Option<String>,
    pub total_requests: u64,
    pub total_errors: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_raw_response: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStatus {
    pub connected: bool,
    pub total_prices_stored: i64,
}

/// Body of the `/status` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub scheduler_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_scrape_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_scheduled_scrape_at: Option<DateTime<Utc>>,
    pub providers: HashMap<String, ProviderStatus>,
    pub database: DatabaseStatus,
}
