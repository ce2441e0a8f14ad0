pub mod db_dump;
pub mod encrypt;
pub mod logic;
pub mod scheduler;

use tracing::{error, info};

use crate::config::{self, BackupJobConfig, DatabaseTarget, FleetConfig};
use crate::errors::Result;

/// Backup entry point. A fleet config file switches the run to multi-database
/// mode; otherwise the single target described by the environment is used.
/// With a cron expression the job repeats on schedule, otherwise it runs once.
pub async fn start_backup() -> Result<()> {
    let job = BackupJobConfig::from_env()?;
    match config::fleet_config_file() {
        Some(path) => start_fleet_backup(&path, &job).await,
        None => start_single_backup(&job).await,
    }
}

async fn start_single_backup(job: &BackupJobConfig) -> Result<()> {
    let db = DatabaseTarget::from_env()?;
    match &job.cron_expression {
        None => logic::run_backup(&db, job).await,
        Some(expression) => {
            // Validate the expression and the connection up front so a broken
            // deployment fails at startup, not at the first firing.
            scheduler::parse_cron(expression)?;
            db_dump::test_connection(&db)?;
            scheduler::run_on_schedule(expression, || {
                let db = db.clone();
                let job = job.clone();
                async move { logic::run_backup(&db, &job).await }
            })
            .await
        }
    }
}

async fn start_fleet_backup(path: &std::path::Path, job: &BackupJobConfig) -> Result<()> {
    let fleet = FleetConfig::load(path)?;
    info!(
        "Loaded fleet config with {} database(s) from {}",
        fleet.databases.len(),
        path.display()
    );

    // The fleet document's own schedule wins over the environment one.
    let expression = fleet
        .cron_expression
        .clone()
        .or_else(|| job.cron_expression.clone());

    match expression {
        None => logic::run_fleet_backup(&fleet, job).await,
        Some(expression) => {
            scheduler::parse_cron(&expression)?;
            let policy = logic::FailurePolicy::from_rescue_mode(fleet.rescue_mode);
            logic::preflight_fleet(&fleet, policy).await?;

            let path = path.to_path_buf();
            scheduler::run_on_schedule(&expression, || {
                let path = path.clone();
                let job = job.clone();
                async move {
                    // Re-read the document each cycle so edits between runs
                    // take effect. A temporarily broken file skips the cycle.
                    match FleetConfig::load(&path) {
                        Ok(fleet) => logic::run_fleet_backup(&fleet, &job).await,
                        Err(err) => {
                            error!("Skipping backup cycle: {err}");
                            Ok(())
                        }
                    }
                }
            })
            .await
        }
    }
}
