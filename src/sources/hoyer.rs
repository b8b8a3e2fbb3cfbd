use super::{get_body, Pacing, PriceProvider};
use crate::error::ProviderError;
use crate::types::{PriceObservation, PriceScope};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const PROVIDER_NAME: &str = "hoyer";

const BASE_URL: &str = "https://api.hoyer.de/rest/heatingoil";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    products: Vec<Product>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Product {
    name: String,
    base_price: Decimal,
}

/// Zip-code specific offers from Hoyer. One observation per product.
pub struct Hoyer {
    client: reqwest::Client,
    zip_code: String,
    order_amount: u32,
}

impl Hoyer {
    pub fn new(client: reqwest::Client, zip_code: String, order_amount: u32) -> Self {
        Self {
            client,
            zip_code,
            order_amount,
        }
    }

    fn parse_response(
        &self,
        body: &[u8],
        date: NaiveDate,
        fetched_at: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>, ProviderError> {
        let resp: ApiResponse = serde_json::from_slice(body).map_err(|e| ProviderError::Parse {
            provider: PROVIDER_NAME.to_string(),
            message: format!("invalid response JSON: {}", e),
        })?;

        Ok(resp
            .products
            .into_iter()
            .map(|p| {
                PriceObservation::local(
                    PROVIDER_NAME,
                    normalize_product_type(&p.name),
                    date,
                    p.base_price,
                    self.zip_code.clone(),
                )
                .with_raw_payload(body.to_vec())
                .with_fetched_at(fetched_at)
            })
            .collect())
    }
}

#[async_trait]
impl PriceProvider for Hoyer {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn fetch_current(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<PriceObservation>, ProviderError> {
        // <base>/<zip>/<liters>/<unloading points>
        let url = format!("{}/{}/{}/1", BASE_URL, self.zip_code, self.order_amount);
        debug!(provider = PROVIDER_NAME, %url, "fetching offers");

        let body = get_body(PROVIDER_NAME, cancel, self.client.get(&url)).await?;
        let prices = self.parse_response(&body, Local::now().date_naive(), Utc::now())?;

        info!(
            provider = PROVIDER_NAME,
            products = prices.len(),
            zip_code = %self.zip_code,
            "fetched offers"
        );
        Ok(prices)
    }

    async fn fetch_historical(
        &self,
        _cancel: &CancellationToken,
        _from: NaiveDate,
        _to: NaiveDate,
        _pacing: Pacing,
    ) -> Result<Vec<PriceObservation>, ProviderError> {
        Err(ProviderError::Unsupported {
            provider: PROVIDER_NAME.to_string(),
            operation: "historical prices".to_string(),
        })
    }

    fn supports_backfill(&self) -> bool {
        false
    }

    fn price_scope(&self) -> PriceScope {
        PriceScope::Local
    }
}

/// Lowercase, dash-separated, with German umlauts transliterated.
fn normalize_product_type(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .replace(' ', "-")
        .replace('ö', "oe")
        .replace('ä', "ae")
        .replace('ü', "ue")
        .replace('ß', "ss")
}
