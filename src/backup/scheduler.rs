//! Serialized in-process scheduler. Runs are strictly sequential: the next
//! fire time is computed only after the previous run finishes, so a run that
//! overruns its slot delays later firings instead of overlapping them.

use chrono::{DateTime, Local};
use cron::Schedule;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::errors::{AppError, Result};

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parses a cron expression, accepting the standard five-field form by
/// normalizing it to the six-field (with seconds) form the parser expects.
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    let normalized = if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    };
    Schedule::from_str(&normalized)
        .map_err(|err| AppError::Config(format!("Cron expression is not valid: {err}")))
}

fn next_time(schedule: &Schedule) -> Option<DateTime<Local>> {
    schedule.upcoming(Local).next()
}

/// Runs `job` on every upcoming firing of `expression`, forever. A job error
/// stops the scheduler and propagates.
pub async fn run_on_schedule<F, Fut>(expression: &str, mut job: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let schedule = parse_cron(expression)?;
    info!("The backup cron job has been started");
    loop {
        let Some(next) = next_time(&schedule) else {
            info!("No upcoming firings for cron expression, stopping scheduler");
            return Ok(());
        };
        info!("Next backup time is {}", next.format(TIME_FORMAT));
        let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;
        job().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_field_expressions_are_accepted() -> anyhow::Result<()> {
        let schedule = parse_cron("0 3 * * *")?;
        assert!(next_time(&schedule).is_some());
        Ok(())
    }

    #[test]
    fn test_six_field_expressions_are_accepted() -> anyhow::Result<()> {
        let schedule = parse_cron("30 0 3 * * *")?;
        assert!(next_time(&schedule).is_some());
        Ok(())
    }

    #[test]
    fn test_invalid_expressions_are_rejected() {
        assert!(matches!(parse_cron("not-a-cron"), Err(AppError::Config(_))));
        assert!(matches!(parse_cron("99 99 * * *"), Err(AppError::Config(_))));
    }
}
