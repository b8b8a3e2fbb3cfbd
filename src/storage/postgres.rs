use super::PriceStore;
use crate::error::{StorageError, StorageResult};
use crate::types::PriceObservation;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, info};

const MAX_CONNECTIONS: u32 = 10;
const MIN_CONNECTIONS: u32 = 1;
const MAX_LIFETIME: Duration = Duration::from_secs(5 * 60);
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

// NULLS NOT DISTINCT (Postgres 15+) makes national prices without a zip
// code collide on the unique key.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS oil_prices (
    id              BIGSERIAL PRIMARY KEY,
    provider        VARCHAR(50)   NOT NULL,
    product_type    VARCHAR(50)   NOT NULL,
    price_date      DATE          NOT NULL,
    price_per_100l  NUMERIC(10,2) NOT NULL,
    currency        CHAR(3)       NOT NULL DEFAULT 'EUR',
    scope           VARCHAR(10)   NOT NULL,
    zip_code        VARCHAR(10),
    raw_response    BYTEA,
    fetched_at      TIMESTAMPTZ   NOT NULL,
    created_at      TIMESTAMPTZ   NOT NULL DEFAULT NOW(),
    CONSTRAINT oil_prices_logical_key
        UNIQUE NULLS NOT DISTINCT (provider, product_type, price_date, zip_code)
)
"#;

/// Postgres-backed [`PriceStore`].
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Open a pool, verify the connection and create the table if missing.
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .min_connections(MIN_CONNECTIONS)
            .max_lifetime(MAX_LIFETIME)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(dsn)
            .await?;

        let store = Self { pool };
        store.ping().await?;
        store.ensure_schema().await?;
        info!("connected to Postgres");
        Ok(store)
    }

    async fn ensure_schema(&self) -> StorageResult<()> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl PriceStore for PostgresStore {
    async fn exists_for_key(
        &self,
        provider: &str,
        product_type: &str,
        date: NaiveDate,
        zip_code: Option<&str>,
    ) -> StorageResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM oil_prices
                WHERE provider = $1 AND product_type = $2 AND price_date = $3
                  AND zip_code IS NOT DISTINCT FROM $4
            )
            "#,
        )
        .bind(provider)
        .bind(product_type)
        .bind(date)
        .bind(zip_code)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn insert_or_update(
        &self,
        observation: &PriceObservation,
        store_raw_payload: bool,
    ) -> StorageResult<()> {
        let raw_response = (store_raw_payload && !observation.raw_payload.is_empty())
            .then_some(observation.raw_payload.as_slice());

        sqlx::query(
            r#"
            INSERT INTO oil_prices
                (provider, product_type, price_date, price_per_100l, currency,
                 scope, zip_code, raw_response, fetched_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT ON CONSTRAINT oil_prices_logical_key
            DO UPDATE SET
                price_per_100l = EXCLUDED.price_per_100l,
                raw_response = EXCLUDED.raw_response,
                fetched_at = EXCLUDED.fetched_at
            "#,
        )
        .bind(&observation.provider)
        .bind(&observation.product_type)
        .bind(observation.date)
        .bind(observation.price_per_100l)
        .bind(&observation.currency)
        .bind(observation.scope.as_str())
        .bind(observation.zip_code.as_deref())
        .bind(raw_response)
        .bind(observation.fetched_at)
        .execute(&self.pool)
        .await?;

        debug!(
            provider = %observation.provider,
            product_type = %observation.product_type,
            date = %observation.date,
            price = %observation.price_per_100l,
            "stored price"
        );
        Ok(())
    }

    async fn total_count(&self) -> StorageResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM oil_prices")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn ping(&self) -> StorageResult<()> {
        if self.pool.is_closed() {
            return Err(StorageError::Unavailable("pool is closed".to_string()));
        }
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
