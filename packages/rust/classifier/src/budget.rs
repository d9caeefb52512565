//! Approximate AI spend tracking with daily and monthly limits.

use std::sync::Mutex;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use personamap_shared::{AiConfig, PersonaMapError, Result};
use tracing::debug;

#[derive(Debug)]
struct Spend {
    day: NaiveDate,
    daily: f64,
    monthly: f64,
}

impl Spend {
    fn roll(&mut self, today: NaiveDate) {
        if today == self.day {
            return;
        }
        if (today.year(), today.month()) != (self.day.year(), self.day.month()) {
            self.monthly = 0.0;
        }
        self.daily = 0.0;
        self.day = today;
    }
}

/// In-memory spend counters. Windows roll over when the UTC calendar day or
/// month changes.
#[derive(Debug)]
pub struct CostTracker {
    cost_per_1k_tokens: f64,
    daily_limit: f64,
    monthly_limit: f64,
    spend: Mutex<Spend>,
}

impl CostTracker {
    pub fn new(cost_per_1k_tokens: f64, daily_limit: f64, monthly_limit: f64) -> Self {
        Self {
            cost_per_1k_tokens,
            daily_limit,
            monthly_limit,
            spend: Mutex::new(Spend {
                day: Utc::now().date_naive(),
                daily: 0.0,
                monthly: 0.0,
            }),
        }
    }

    pub fn from_config(config: &AiConfig) -> Self {
        Self::new(
            config.cost_per_1k_tokens,
            config.daily_cost_limit,
            config.monthly_cost_limit,
        )
    }

    /// Fail with [`PersonaMapError::CostLimit`] once either window exceeds its limit.
    pub fn check(&self) -> Result<()> {
        self.check_at(Utc::now())
    }

    /// Add the cost of `tokens` to both windows.
    pub fn record(&self, tokens: u32) {
        self.record_at(tokens, Utc::now());
    }

    /// Current (daily, monthly) spend.
    pub fn totals(&self) -> (f64, f64) {
        let spend = self
            .spend
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (spend.daily, spend.monthly)
    }

    pub(crate) fn check_at(&self, now: DateTime<Utc>) -> Result<()> {
        let mut spend = self
            .spend
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        spend.roll(now.date_naive());

        if spend.daily > self.daily_limit {
            return Err(PersonaMapError::CostLimit(format!(
                "daily cost limit exceeded: ${:.2} > ${:.2}",
                spend.daily, self.daily_limit
            )));
        }
        if spend.monthly > self.monthly_limit {
            return Err(PersonaMapError::CostLimit(format!(
                "monthly cost limit exceeded: ${:.2} > ${:.2}",
                spend.monthly, self.monthly_limit
            )));
        }
        Ok(())
    }

    pub(crate) fn record_at(&self, tokens: u32, now: DateTime<Utc>) {
        let cost = f64::from(tokens) / 1000.0 * self.cost_per_1k_tokens;
        let mut spend = self
            .spend
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        spend.roll(now.date_naive());
        spend.daily += cost;
        spend.monthly += cost;
        debug!(tokens, cost, daily = spend.daily, "recorded model usage");
    }
}
