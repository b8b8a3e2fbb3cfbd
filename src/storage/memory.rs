use super::PriceStore;
use crate::error::StorageResult;
use crate::types::{LogicalKey, PriceObservation};
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Process-local store with the same keying rules as the database.
/// Backs `scrape --dry-run`.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<LogicalKey, PriceObservation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored observations ordered by provider, product type, date and zip code.
    pub fn observations(&self) -> Vec<PriceObservation> {
        let mut rows: Vec<_> = self.rows.read().values().cloned().collect();
        rows.sort_by(|a, b| {
            (&a.provider, &a.product_type, a.date, &a.zip_code).cmp(&(
                &b.provider,
                &b.product_type,
                b.date,
                &b.zip_code,
            ))
        });
        rows
    }

    pub fn get(&self, key: &LogicalKey) -> Option<PriceObservation> {
        self.rows.read().get(key).cloned()
    }
}

#[async_trait]
impl PriceStore for MemoryStore {
    async fn exists_for_key(
        &self,
        provider: &str,
        product_type: &str,
        date: NaiveDate,
        zip_code: Option<&str>,
    ) -> StorageResult<bool> {
        let key = LogicalKey {
            provider: provider.to_string(),
            product_type: product_type.to_string(),
            date,
            zip_code: zip_code.map(str::to_string),
        };
        Ok(self.rows.read().contains_key(&key))
    }

    async fn insert_or_update(
        &self,
        observation: &PriceObservation,
        store_raw_payload: bool,
    ) -> StorageResult<()> {
        let mut row = observation.clone();
        if !store_raw_payload {
            row.raw_payload.clear();
        }

        let mut rows = self.rows.write();
        match rows.get_mut(&observation.key()) {
            Some(existing) => {
                existing.price_per_100l = row.price_per_100l;
                existing.raw_payload = row.raw_payload;
                existing.fetched_at = row.fetched_at;
            }
            None => {
                rows.insert(observation.key(), row);
            }
        }
        Ok(())
    }

    async fn total_count(&self) -> StorageResult<i64> {
        Ok(self.rows.read().len() as i64)
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}
