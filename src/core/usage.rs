use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::error::StorageError;
use crate::core::session::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    Daily,
    #[default]
    Monthly,
    AllTime,
}

/// Labels of the day and month a cost is booked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodKey {
    pub day: String,
    pub month: String,
}

impl PeriodKey {
    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            day: date.format("%Y-%m-%d").to_string(),
            month: date.format("%Y-%m").to_string(),
        }
    }

    pub fn at(time: DateTime<Utc>) -> Self {
        Self::for_date(time.date_naive())
    }

    pub fn today() -> Self {
        Self::at(Utc::now())
    }
}

/// Running cost totals for one user.
///
/// Totals only grow inside a period; the day and month totals restart when a
/// cost is recorded under a new period key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageLedger {
    pub day: f64,
    pub month: f64,
    pub all_time: f64,
    #[serde(default)]
    pub day_key: String,
    #[serde(default)]
    pub month_key: String,
    /// Cost per day label.
    #[serde(default)]
    pub daily: BTreeMap<String, f64>,
}

impl UsageLedger {
    pub fn record(&mut self, cost: f64, key: &PeriodKey) {
        if !cost.is_finite() || cost < 0.0 {
            tracing::warn!(cost, "Ignoring invalid usage cost");
            return;
        }
        self.roll_over(key);
        self.day += cost;
        self.month += cost;
        self.all_time += cost;
        *self.daily.entry(key.day.clone()).or_insert(0.0) += cost;
    }

    /// Spend inside `period` as seen at `key`; a stale day or month counts as zero.
    pub fn spent(&self, period: BudgetPeriod, key: &PeriodKey) -> f64 {
        match period {
            BudgetPeriod::Daily if self.day_key == key.day => self.day,
            BudgetPeriod::Monthly if self.month_key == key.month => self.month,
            BudgetPeriod::AllTime => self.all_time,
            _ => 0.0,
        }
    }

    fn roll_over(&mut self, key: &PeriodKey) {
        if self.day_key != key.day {
            self.day = 0.0;
            self.day_key = key.day.clone();
        }
        if self.month_key != key.month {
            self.month = 0.0;
            self.month_key = key.month.clone();
        }
    }
}

/// Durable home of usage ledgers. Writes are best effort.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn load(&self, user_id: UserId) -> Result<Option<UsageLedger>, StorageError>;

    async fn save(
        &self,
        user_id: UserId,
        display_name: &str,
        ledger: &UsageLedger,
    ) -> Result<(), StorageError>;
}
