use super::{get_body, sleep_cancellable, Pacing, PriceProvider};
use crate::error::ProviderError;
use crate::types::{PriceObservation, PriceScope, DEFAULT_PRODUCT_TYPE};
use async_trait::async_trait;
use chrono::{DateTime, Days, Local, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const PROVIDER_NAME: &str = "heizoel24";

const BASE_URL: &str = "https://www.heizoel24.de/api/chartapi/GetAveragePriceHistory";
const COUNTRY_ID: u32 = 1; // Germany

/// Longest date range requested in a single call.
const MAX_WINDOW_DAYS: u64 = 365;

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(rename = "Values", default)]
    values: Vec<PriceValue>,
}

#[derive(Debug, Deserialize)]
struct PriceValue {
    /// Epoch milliseconds.
    date: i64,
    value: Decimal,
}

/// Nationwide average prices from HeizOel24's chart API.
pub struct HeizOel24 {
    client: reqwest::Client,
}

impl HeizOel24 {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_window(
        &self,
        cancel: &CancellationToken,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PriceObservation>, ProviderError> {
        debug!(provider = PROVIDER_NAME, %from, %to, "fetching price history");

        let request = self.client.get(BASE_URL).query(&[
            ("countryId", COUNTRY_ID.to_string()),
            ("minDate", from.format("%Y-%m-%d").to_string()),
            ("maxDate", to.format("%Y-%m-%d").to_string()),
        ]);
        let body = get_body(PROVIDER_NAME, cancel, request).await?;

        parse_response(&body, Utc::now())
    }
}

#[async_trait]
impl PriceProvider for HeizOel24 {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn fetch_current(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<PriceObservation>, ProviderError> {
        let today = Local::now().date_naive();
        let yesterday = today.pred_opt().unwrap_or(today);
        self.fetch_window(cancel, yesterday, today).await
    }

    /// Fetch `from..=to` in windows of at most a year, pausing between
    /// requests. If a later window fails or the pause is cancelled, the
    /// windows fetched so far are returned so they can still be stored.
    async fn fetch_historical(
        &self,
        cancel: &CancellationToken,
        from: NaiveDate,
        to: NaiveDate,
        pacing: Pacing,
    ) -> Result<Vec<PriceObservation>, ProviderError> {
        let windows = date_windows(from, to, MAX_WINDOW_DAYS);
        let this = self;
        let results = fetch_windows(cancel, &windows, pacing, move |start, end| {
            this.fetch_window(cancel, start, end)
        })
        .await?;

        info!(
            provider = PROVIDER_NAME,
            count = results.len(),
            windows = windows.len(),
            %from,
            %to,
            "fetched price history"
        );
        Ok(results)
    }

    fn supports_backfill(&self) -> bool {
        true
    }

    fn price_scope(&self) -> PriceScope {
        PriceScope::National
    }
}

fn parse_response(
    body: &[u8],
    fetched_at: DateTime<Utc>,
) -> Result<Vec<PriceObservation>, ProviderError> {
    let resp: ApiResponse = serde_json::from_slice(body).map_err(|e| ProviderError::Parse {
        provider: PROVIDER_NAME.to_string(),
        message: format!("invalid response JSON: {}", e),
    })?;

    resp.values
        .into_iter()
        .map(|v| {
            let date = DateTime::from_timestamp_millis(v.date)
                .ok_or_else(|| ProviderError::Parse {
                    provider: PROVIDER_NAME.to_string(),
                    message: format!("timestamp out of range: {}", v.date),
                })?
                .date_naive();
            Ok(
                PriceObservation::national(PROVIDER_NAME, DEFAULT_PRODUCT_TYPE, date, v.value)
                    .with_raw_payload(body.to_vec())
                    .with_fetched_at(fetched_at),
            )
        })
        .collect()
}

/// Run `fetch` for each window in order with a paced pause in between.
///
/// A failure on the first window is returned as is. A later failure keeps
/// what earlier windows produced.
async fn fetch_windows<F, Fut>(
    cancel: &CancellationToken,
    windows: &[(NaiveDate, NaiveDate)],
    pacing: Pacing,
    mut fetch: F,
) -> Result<Vec<PriceObservation>, ProviderError>
where
    F: FnMut(NaiveDate, NaiveDate) -> Fut,
    Fut: Future<Output = Result<Vec<PriceObservation>, ProviderError>>,
{
    let mut results = Vec::new();

    for (i, &(start, end)) in windows.iter().enumerate() {
        let step = if i > 0 {
            let delay = pacing.next_delay();
            debug!(provider = PROVIDER_NAME, delay_ms = delay.as_millis() as u64, "pacing");
            match sleep_cancellable(cancel, delay).await {
                Ok(()) => fetch(start, end).await,
                Err(e) => Err(e),
            }
        } else {
            fetch(start, end).await
        };

        match step {
            Ok(prices) => results.extend(prices),
            Err(e) if i == 0 => return Err(e),
            Err(e) => {
                warn!(
                    provider = PROVIDER_NAME,
                    error = %e,
                    %start,
                    %end,
                    kept = results.len(),
                    "history window failed, keeping earlier windows"
                );
                break;
            }
        }
    }

    Ok(results)
}

/// Split `from..=to` into consecutive inclusive windows of at most `max_days` days.
fn date_windows(from: NaiveDate, to: NaiveDate, max_days: u64) -> Vec<(NaiveDate, NaiveDate)> {
    let mut windows = Vec::new();
    if from > to || max_days == 0 {
        return windows;
    }

    let mut start = from;
    loop {
        let end = start
            .checked_add_days(Days::new(max_days - 1))
            .map_or(to, |d| d.min(to));
        windows.push((start, end));
        match end.succ_opt() {
            Some(next) if end < to => start = next,
            _ => break,
        }
    }
    windows
}
