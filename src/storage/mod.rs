pub mod memory;
pub mod postgres;

use crate::error::StorageResult;
use crate::types::PriceObservation;
use async_trait::async_trait;
use chrono::NaiveDate;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Persistence for price observations, keyed by their logical key.
///
/// Implementations must be safe to share between the scheduler, one-shot
/// commands and the status endpoint.
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Whether a record exists for (provider, product type, date, zip code).
    /// `None` matches only records without a zip code.
    async fn exists_for_key(
        &self,
        provider: &str,
        product_type: &str,
        date: NaiveDate,
        zip_code: Option<&str>,
    ) -> StorageResult<bool>;

    /// Insert the observation or, if its key is already stored, overwrite
    /// price, raw payload and fetch time.
    async fn insert_or_update(
        &self,
        observation: &PriceObservation,
        store_raw_payload: bool,
    ) -> StorageResult<()>;

    async fn total_count(&self) -> StorageResult<i64>;

    async fn ping(&self) -> StorageResult<()>;
}
