use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::RateTable;
use crate::{
    db::{from_millis, to_millis},
    error::RateError,
};

/// Last-known-good rate tables, so a restart does not depend on the network.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load_latest(&self, base: &str) -> Result<Option<RateTable>, RateError>;
    async fn save(&self, table: &RateTable) -> Result<(), RateError>;
}

#[derive(Clone)]
pub struct SqliteSnapshots {
    db_pool: SqlitePool,
}

impl SqliteSnapshots {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshots {
    async fn load_latest(&self, base: &str) -> Result<Option<RateTable>, RateError> {
        let Some((rates, updated_at)): Option<(String, i64)> = sqlx::query_as(
            "SELECT rates,updated_at FROM exchange_rate_snapshots WHERE base_currency=? ORDER BY updated_at DESC, id DESC LIMIT 1",
        )
        .bind(base)
        .fetch_optional(&self.db_pool)
        .await?
        else {
            return Ok(None);
        };

        let rates: BTreeMap<String, f64> = serde_json::from_str(&rates)?;
        Ok(Some(RateTable::new(base, rates, from_millis(updated_at)?)))
    }

    async fn save(&self, table: &RateTable) -> Result<(), RateError> {
        sqlx::query("INSERT INTO exchange_rate_snapshots (base_currency,rates,updated_at) VALUES (?,?,?)")
            .bind(&table.base)
            .bind(serde_json::to_string(&table.rates)?)
            .bind(to_millis(table.updated_at))
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }
}
