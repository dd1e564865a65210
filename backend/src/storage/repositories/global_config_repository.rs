//! # Global Config Repository
//!
//! Key/value rows in the `global_configs` table. The billing range lives here
//! under three keys:
//!
//! ```text
//! billing_start_month     -> "1"
//! billing_end_month       -> "6"
//! billing_selected_month  -> "0"
//! ```
//!
//! Writes go through a single transaction and each written key is published
//! on the change feed, which is what lets open config stores refresh.

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::storage::change_feed::{ChangeKind, RowChange};
use crate::storage::connection::DbConnection;
use crate::storage::traits::GlobalConfigStorage;

#[derive(Clone)]
pub struct GlobalConfigRepository {
    db: DbConnection,
}

impl GlobalConfigRepository {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl GlobalConfigStorage for GlobalConfigRepository {
    async fn get_values(&self, keys: &[&str]) -> Result<Vec<(String, String)>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT key, value FROM global_configs WHERE key IN (");
        let mut separated = query.separated(", ");
        for key in keys {
            separated.push_bind(key.to_string());
        }
        separated.push_unseparated(")");

        let rows = query.build().fetch_all(self.db.pool()).await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("key"), r.get::<String, _>("value")))
            .collect())
    }

    async fn set_values(&self, entries: &[(String, String)]) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;
        for (key, value) in entries {
            sqlx::query(
                r#"
                INSERT INTO global_configs (key, value, updated_at)
                VALUES (?, ?, CURRENT_TIMESTAMP)
                ON CONFLICT (key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("Saved {} global config entries", entries.len());
        for (key, _) in entries {
            self.db.feed().publish(RowChange::GlobalConfig {
                kind: ChangeKind::Update,
                key: key.clone(),
            });
        }
        Ok(())
    }
}
