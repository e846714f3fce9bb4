//! Cron schedules and the sliced, cancellable wait used by every driver.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::NodeError;

/// Slice length used when a description leaves `WaitGranularity` at 0.
pub const DEFAULT_WAIT_GRANULARITY: Duration = Duration::from_secs(1);

/// A parsed cron expression.
///
/// Accepts the classic 5-field form (seconds are pinned to 0) as well as
/// the 6-field form with seconds and the 7-field form with a year.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

/// Convert a 5-field expression to the seconds-first form `cron` expects.
fn normalize_cron_expression(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    match fields {
        5 => format!("0 {}", expr.trim()),
        _ => expr.trim().to_string(),
    }
}

impl CronSchedule {
    /// Parse `expression` for the node called `node` (used in the error).
    pub fn parse(node: &str, expression: &str) -> Result<Self, NodeError> {
        let normalized = normalize_cron_expression(expression);
        let schedule = Schedule::from_str(&normalized).map_err(|e| NodeError::InvalidSchedule {
            node: node.to_string(),
            expression: expression.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First firing strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Next firing from now.
    pub fn next_firing(&self) -> Option<DateTime<Utc>> {
        self.next_after(Utc::now())
    }
}

/// Sleep until the wall-clock instant `at`, waking every `granularity` and
/// returning early as soon as `cancel` fires.
///
/// Every slice re-reads the wall clock, so a suspend or clock jump past `at`
/// ends the wait at the next wake-up instead of adding the lost time.
///
/// Returns `true` when `at` was reached and `false` when the wait was cut
/// short by cancellation.
pub async fn sleep_sliced(at: DateTime<Utc>, granularity: Duration, cancel: &CancellationToken) -> bool {
    sleep_sliced_with(at, granularity, cancel, Utc::now).await
}

async fn sleep_sliced_with(
    at: DateTime<Utc>,
    granularity: Duration,
    cancel: &CancellationToken,
    clock: impl Fn() -> DateTime<Utc>,
) -> bool {
    let granularity = if granularity.is_zero() {
        DEFAULT_WAIT_GRANULARITY
    } else {
        granularity
    };
    let total = (at - clock()).to_std().unwrap_or(Duration::ZERO);
    let deadline = Instant::now() + total;

    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline || clock() >= at {
            return true;
        }
        let slice = granularity.min(deadline - now);
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(slice) => {}
        }
    }
}
