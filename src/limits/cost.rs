use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use thiserror::Error;
use tracing::warn;

use crate::config::GuildLimits;
use crate::db::{DatabaseError, FeatureKind, UsageStore};

#[derive(Debug, Error)]
pub enum CostError {
    #[error("monthly budget exceeded: {month_to_date:.4} + {projected:.4} USD would pass the {ceiling:.2} USD ceiling")]
    BudgetExceeded {
        month_to_date: f64,
        projected: f64,
        ceiling: f64,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Result of charging one model call against the guild ledger.
#[derive(Debug, Clone, Copy)]
pub struct ChargeReceipt {
    pub month_to_date: f64,
    /// True once spending passes the alert threshold.
    pub alert: bool,
}

/// Month-to-date budget enforcement backed by the persisted usage ledger.
/// Totals are recomputed from storage on every check, so restarts never
/// reset the clock on spending.
pub struct CostMonitor {
    usage: Arc<dyn UsageStore>,
}

impl CostMonitor {
    pub fn new(usage: Arc<dyn UsageStore>) -> Self {
        Self { usage }
    }

    /// Checked once per message before fan-out begins. Projects the full
    /// fan-out cost so a message never starts translating just to blow the
    /// ceiling halfway through.
    pub async fn ensure_within_budget(
        &self,
        guild_id: i64,
        projected: f64,
        limits: &GuildLimits,
    ) -> Result<(), CostError> {
        let (from, to) = month_bounds(Utc::now().date_naive());
        let month_to_date = self.usage.cost_between(guild_id, from, to).await?;

        if month_to_date + projected > limits.max_monthly_cost_usd {
            return Err(CostError::BudgetExceeded {
                month_to_date,
                projected,
                ceiling: limits.max_monthly_cost_usd,
            });
        }
        Ok(())
    }

    /// Records one model call against the ledger. Called per target language,
    /// before the translation attempt, so failed calls are still paid for.
    pub async fn charge(
        &self,
        guild_id: i64,
        feature: FeatureKind,
        cost_usd: f64,
        limits: &GuildLimits,
    ) -> Result<ChargeReceipt, CostError> {
        let today = Utc::now().date_naive();
        self.usage
            .record_usage(guild_id, feature, today, cost_usd)
            .await?;

        let (from, to) = month_bounds(today);
        let month_to_date = self.usage.cost_between(guild_id, from, to).await?;
        let alert = month_to_date >= limits.cost_alert_threshold_usd;
        if alert {
            warn!(
                guild_id,
                month_to_date,
                threshold = limits.cost_alert_threshold_usd,
                "guild spending passed the cost alert threshold"
            );
        }

        Ok(ChargeReceipt {
            month_to_date,
            alert,
        })
    }
}

fn month_bounds(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = today.with_day(1).unwrap_or(today);
    let next_month = if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
    };
    let last = next_month
        .map(|d| d - Duration::days(1))
        .unwrap_or(today);
    (first, last)
}
