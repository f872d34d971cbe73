// src/budget/ledger.rs
// Append-only cost ledger with daily/monthly caps

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use super::pricing::{Pricing, from_cents, round_to, to_cents};
use crate::clock::Clock;
use crate::telemetry::{EngineEvent, EventSink};

/// Tolerance for comparing currency amounts
const AMOUNT_EPSILON: f64 = 1e-9;

/// Deployment the cost was incurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Test,
    #[default]
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Test => write!(f, "test"),
            Self::Production => write!(f, "production"),
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "test" | "testing" | "development" | "dev" => Ok(Self::Test),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

/// Budget window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPeriod {
    Daily,
    Monthly,
}

impl fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::Monthly => write!(f, "monthly"),
        }
    }
}

/// One external LLM call. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEntry {
    pub timestamp: DateTime<Utc>,
    /// Which policy invoked the call
    pub service: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub environment: Environment,
    pub request_id: Option<String>,
}

/// Spending caps
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetLimits {
    pub daily_limit: f64,
    pub monthly_limit: f64,
    /// Percent of a limit (0-100] at which an alert is emitted
    pub alert_threshold_percent: f64,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            daily_limit: 5.00,
            monthly_limit: 100.00,
            alert_threshold_percent: 80.0,
        }
    }
}

/// Rolling aggregates over the ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSummary {
    pub today: f64,
    pub this_month: f64,
    pub daily_remaining: f64,
    pub monthly_remaining: f64,
    pub percent_used_daily: f64,
    pub percent_used_monthly: f64,
    pub daily_limit: f64,
    pub monthly_limit: f64,
    pub entries_today: usize,
}

/// Outcome of a pre-flight budget check
#[derive(Debug, Clone, PartialEq)]
pub enum Affordability {
    Allowed,
    Denied { reason: String },
}

impl Affordability {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn denial_reason(&self) -> Option<&str> {
        match self {
            Self::Allowed => None,
            Self::Denied { reason } => Some(reason),
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: Vec<CostEntry>,
    /// Day for which the daily alert already fired
    daily_alerted: Option<NaiveDate>,
    /// (year, month) for which the monthly alert already fired
    monthly_alerted: Option<(i32, u32)>,
}

/// Spend totals in cents for the current day and month
#[derive(Debug, Clone, Copy)]
struct Totals {
    today_cents: i64,
    month_cents: i64,
    entries_today: usize,
}

/// Process-wide cost ledger.
///
/// Aggregates are computed on read from the log under the same lock that
/// guards appends, so concurrent `record` calls never lose an entry.
pub struct CostLedger {
    pricing: Pricing,
    limits: BudgetLimits,
    offset: FixedOffset,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    state: Mutex<LedgerState>,
}

impl CostLedger {
    pub fn new(
        pricing: Pricing,
        limits: BudgetLimits,
        offset: FixedOffset,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            pricing,
            limits,
            offset,
            clock,
            sink,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn pricing(&self) -> Pricing {
        self.pricing
    }

    pub fn limits(&self) -> BudgetLimits {
        self.limits
    }

    /// Cost of a call at the configured rates
    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        self.pricing.calculate_cost(input_tokens, output_tokens)
    }

    /// Append an entry for a call that already happened. Never fails.
    pub fn record(
        &self,
        service: &str,
        input_tokens: u64,
        output_tokens: u64,
        environment: Environment,
        request_id: Option<&str>,
    ) -> CostEntry {
        let now = self.clock.now();
        let entry = CostEntry {
            timestamp: now,
            service: service.to_string(),
            input_tokens,
            output_tokens,
            cost: self.calculate_cost(input_tokens, output_tokens),
            environment,
            request_id: request_id.map(str::to_string),
        };

        let mut alerts = Vec::new();
        {
            let mut state = self.state.lock();
            state.entries.push(entry.clone());

            let totals = self.totals(&state.entries, now);
            let local = now.with_timezone(&self.offset);
            let today = local.date_naive();
            let month = (local.year(), local.month());

            let daily_percent = percent_of(from_cents(totals.today_cents), self.limits.daily_limit);
            if daily_percent >= self.limits.alert_threshold_percent
                && state.daily_alerted != Some(today)
            {
                state.daily_alerted = Some(today);
                alerts.push(EngineEvent::BudgetAlert {
                    period: BudgetPeriod::Daily,
                    percent_used: daily_percent,
                    spent: from_cents(totals.today_cents),
                    limit: self.limits.daily_limit,
                });
            }

            let monthly_percent =
                percent_of(from_cents(totals.month_cents), self.limits.monthly_limit);
            if monthly_percent >= self.limits.alert_threshold_percent
                && state.monthly_alerted != Some(month)
            {
                state.monthly_alerted = Some(month);
                alerts.push(EngineEvent::BudgetAlert {
                    period: BudgetPeriod::Monthly,
                    percent_used: monthly_percent,
                    spent: from_cents(totals.month_cents),
                    limit: self.limits.monthly_limit,
                });
            }
        }

        debug!(
            service = %entry.service,
            input_tokens,
            output_tokens,
            cost = entry.cost,
            environment = %environment,
            "Recorded cost entry"
        );

        // Emit outside the lock so a slow sink cannot stall other recorders
        self.sink.emit(EngineEvent::CostRecorded {
            service: entry.service.clone(),
            cost: entry.cost,
            request_id: entry.request_id.clone(),
        });
        for alert in alerts {
            self.sink.emit(alert);
        }

        entry
    }

    /// Today / this-month aggregates against the limits
    pub fn summarize(&self) -> BudgetSummary {
        let now = self.clock.now();
        let totals = {
            let state = self.state.lock();
            self.totals(&state.entries, now)
        };

        let today = from_cents(totals.today_cents);
        let this_month = from_cents(totals.month_cents);

        BudgetSummary {
            today,
            this_month,
            daily_remaining: round_to((self.limits.daily_limit - today).max(0.0), 2),
            monthly_remaining: round_to((self.limits.monthly_limit - this_month).max(0.0), 2),
            percent_used_daily: percent_of(today, self.limits.daily_limit),
            percent_used_monthly: percent_of(this_month, self.limits.monthly_limit),
            daily_limit: self.limits.daily_limit,
            monthly_limit: self.limits.monthly_limit,
            entries_today: totals.entries_today,
        }
    }

    /// Pre-flight check before issuing a priced call
    pub fn can_afford(&self, estimated_cost: f64) -> Affordability {
        let summary = self.summarize();

        let verdict = if summary.today + estimated_cost > self.limits.daily_limit + AMOUNT_EPSILON
        {
            Affordability::Denied {
                reason: format!(
                    "daily budget limit exceeded: {:.2}+{:.2}>{:.2} (spent today + estimated cost > daily limit)",
                    summary.today, estimated_cost, self.limits.daily_limit
                ),
            }
        } else if summary.this_month + estimated_cost
            > self.limits.monthly_limit + AMOUNT_EPSILON
        {
            Affordability::Denied {
                reason: format!(
                    "monthly budget limit exceeded: {:.2}+{:.2}>{:.2} (spent this month + estimated cost > monthly limit)",
                    summary.this_month, estimated_cost, self.limits.monthly_limit
                ),
            }
        } else {
            Affordability::Allowed
        };

        if let Affordability::Denied { reason } = &verdict {
            self.sink.emit(EngineEvent::BudgetDenied {
                reason: reason.clone(),
            });
        }

        verdict
    }

    /// Snapshot of every entry in append order
    pub fn entries(&self) -> Vec<CostEntry> {
        self.state.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries recorded before `cutoff`. Returns how many were removed.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|e| e.timestamp >= cutoff);
        before - state.entries.len()
    }

    /// Drop entries older than the start of the previous calendar month.
    ///
    /// Nothing the summary reads is affected.
    pub fn prune_stale(&self) -> usize {
        match self.previous_month_start(self.clock.now()) {
            Some(cutoff) => self.prune_before(cutoff),
            None => 0,
        }
    }

    fn previous_month_start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = now.with_timezone(&self.offset);
        let (year, month) = if local.month() == 1 {
            (local.year() - 1, 12)
        } else {
            (local.year(), local.month() - 1)
        };
        self.offset
            .with_ymd_and_hms(year, month, 1, 0, 0, 0)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn totals(&self, entries: &[CostEntry], now: DateTime<Utc>) -> Totals {
        let local_now = now.with_timezone(&self.offset);
        let today = local_now.date_naive();
        let (year, month) = (local_now.year(), local_now.month());

        let mut totals = Totals {
            today_cents: 0,
            month_cents: 0,
            entries_today: 0,
        };
        for entry in entries {
            let local = entry.timestamp.with_timezone(&self.offset);
            if local.year() != year || local.month() != month {
                continue;
            }
            let cents = to_cents(entry.cost);
            totals.month_cents += cents;
            if local.date_naive() == today {
                totals.today_cents += cents;
                totals.entries_today += 1;
            }
        }
        totals
    }
}

/// spent / limit * 100, rounded to one decimal
fn percent_of(spent: f64, limit: f64) -> f64 {
    if limit > 0.0 {
        round_to(spent / limit * 100.0, 1)
    } else {
        0.0
    }
}
