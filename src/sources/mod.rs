pub mod heizoel24;
pub mod hoyer;

use crate::error::ProviderError;
use crate::types::{PriceObservation, PriceScope};
use async_trait::async_trait;
use chrono::NaiveDate;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Names accepted by [`build_provider`].
pub const KNOWN_PROVIDERS: &[&str] = &[heizoel24::PROVIDER_NAME, hoyer::PROVIDER_NAME];

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

/// A source of heating oil prices.
///
/// Every network call takes the shared cancellation token and returns
/// [`ProviderError::Cancelled`] promptly once it fires.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Today's prices; may return several observations (one per product).
    async fn fetch_current(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<PriceObservation>, ProviderError>;

    /// Prices for the inclusive range `from..=to`. Providers that issue
    /// several upstream requests wait according to `pacing` between them.
    async fn fetch_historical(
        &self,
        cancel: &CancellationToken,
        from: NaiveDate,
        to: NaiveDate,
        pacing: Pacing,
    ) -> Result<Vec<PriceObservation>, ProviderError>;

    fn supports_backfill(&self) -> bool;

    fn price_scope(&self) -> PriceScope;
}

/// Random delay window applied between consecutive upstream requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pacing {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Pacing {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        if min_delay <= max_delay {
            Self {
                min_delay,
                max_delay,
            }
        } else {
            Self {
                min_delay: max_delay,
                max_delay: min_delay,
            }
        }
    }

    pub fn from_secs(min: u64, max: u64) -> Self {
        Self::new(Duration::from_secs(min), Duration::from_secs(max))
    }

    pub fn next_delay(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        let millis = rand::thread_rng()
            .gen_range(self.min_delay.as_millis() as u64..=self.max_delay.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

/// Settings shared by the concrete providers.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub client: reqwest::Client,
    pub zip_code: String,
    pub order_amount: u32,
}

/// Build a provider by its configured name. Returns `None` for unknown names.
pub fn build_provider(name: &str, settings: &ProviderSettings) -> Option<Arc<dyn PriceProvider>> {
    match name {
        heizoel24::PROVIDER_NAME => Some(Arc::new(heizoel24::HeizOel24::new(
            settings.client.clone(),
        ))),
        hoyer::PROVIDER_NAME => Some(Arc::new(hoyer::Hoyer::new(
            settings.client.clone(),
            settings.zip_code.clone(),
            settings.order_amount,
        ))),
        _ => None,
    }
}

pub(crate) fn random_user_agent() -> &'static str {
    let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

/// Send a GET request and return the body, racing the cancellation token.
pub(crate) async fn get_body(
    provider: &str,
    cancel: &CancellationToken,
    request: reqwest::RequestBuilder,
) -> Result<Vec<u8>, ProviderError> {
    let request = request
        .header("User-Agent", random_user_agent())
        .header("Accept", "application/json");

    let resp = tokio::select! {
        _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        resp = request.send() => resp?,
    };

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ProviderError::Http {
            provider: provider.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    let body = tokio::select! {
        _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        body = resp.bytes() => body?,
    };
    Ok(body.to_vec())
}

pub(crate) async fn sleep_cancellable(
    cancel: &CancellationToken,
    delay: Duration,
) -> Result<(), ProviderError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
