use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::BTreeMap;

use crate::core::error::StorageError;
use crate::core::session::UserId;
use crate::core::usage::{UsageLedger, UsageStore};

type UsageRow = (f64, f64, f64, String, String, String);

pub struct UsageRepo {
    pool: SqlitePool,
}

impl UsageRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn delete(&self, user_id: UserId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM usage WHERE user_id = ?")
            .bind(user_id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl UsageStore for UsageRepo {
    async fn load(&self, user_id: UserId) -> Result<Option<UsageLedger>, StorageError> {
        let row: Option<UsageRow> = sqlx::query_as(
            "SELECT day, month, all_time, day_key, month_key, daily_json \
             FROM usage WHERE user_id = ?",
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        row.map(row_to_ledger).transpose()
    }

    async fn save(
        &self,
        user_id: UserId,
        display_name: &str,
        ledger: &UsageLedger,
    ) -> Result<(), StorageError> {
        let daily_json = serde_json::to_string(&ledger.daily)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        sqlx::query(
            "INSERT INTO usage (user_id, user_name, day, month, all_time, \
             day_key, month_key, daily_json, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET user_name = excluded.user_name, \
             day = excluded.day, month = excluded.month, all_time = excluded.all_time, \
             day_key = excluded.day_key, month_key = excluded.month_key, \
             daily_json = excluded.daily_json, updated_at = excluded.updated_at",
        )
        .bind(user_id.0)
        .bind(display_name)
        .bind(ledger.day)
        .bind(ledger.month)
        .bind(ledger.all_time)
        .bind(&ledger.day_key)
        .bind(&ledger.month_key)
        .bind(&daily_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }
}

fn row_to_ledger(row: UsageRow) -> Result<UsageLedger, StorageError> {
    let daily: BTreeMap<String, f64> =
        serde_json::from_str(&row.5).map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(UsageLedger {
        day: row.0,
        month: row.1,
        all_time: row.2,
        day_key: row.3,
        month_key: row.4,
        daily,
    })
}
