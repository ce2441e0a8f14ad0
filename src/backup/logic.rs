use std::fs;
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::backup::{db_dump, encrypt};
use crate::config::{
    backup_file_name, BackupJobConfig, DatabaseTarget, FleetConfig, ALL_DATABASES_PREFIX,
};
use crate::errors::{AppError, Result};
use crate::notify::{self, NotificationData};
use crate::storage;
use crate::utils;

/// What the orchestrator does when one fleet target fails. Built once from
/// the fleet's rescue-mode flag and passed through, instead of scattering
/// flag checks across the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// First failure aborts the whole batch.
    Abort,
    /// Log, notify, move on to the next target.
    Continue,
}

impl FailurePolicy {
    pub fn from_rescue_mode(rescue_mode: bool) -> Self {
        if rescue_mode {
            FailurePolicy::Continue
        } else {
            FailurePolicy::Abort
        }
    }

    /// Decides whether the batch survives one target's failure. Logging
    /// only: the failure notification is sent where the failure happened,
    /// exactly once.
    pub fn handle(&self, context: &str, err: AppError) -> Result<()> {
        match self {
            FailurePolicy::Continue => {
                error!("{context}: {err}");
                error!("Rescue mode is enabled, continuing with the remaining targets");
                Ok(())
            }
            FailurePolicy::Abort => Err(err),
        }
    }
}

/// Result accumulator threaded out of the staged pipeline; there is no
/// job-scoped mutable state shared between stages.
struct BackupOutcome {
    file_name: String,
    size: u64,
    storage_name: &'static str,
    location: String,
    duration: Duration,
}

/// Runs the backup pipeline for one target, or iterates it per database
/// when configured to back up everything as separate artifacts.
pub async fn run_backup(db: &DatabaseTarget, job: &BackupJobConfig) -> Result<()> {
    if job.all_databases && !job.single_file {
        backup_each_database(db, job).await
    } else {
        backup_one(db, job).await
    }
}

async fn backup_each_database(db: &DatabaseTarget, job: &BackupJobConfig) -> Result<()> {
    let databases = db_dump::list_databases(db)?;
    for name in databases {
        if db_dump::is_system_schema(&name) {
            continue;
        }
        let mut target = db.clone();
        target.name = name;
        backup_one(&target, job).await?;
    }
    Ok(())
}

async fn backup_one(db: &DatabaseTarget, job: &BackupJobConfig) -> Result<()> {
    info!("Starting backup task...");
    fs::create_dir_all(&job.working_dir)?;
    let started = Instant::now();

    match run_stages(db, job, started).await {
        Ok(outcome) => {
            let duration = utils::format_duration(outcome.duration);
            notify::notify_success(&NotificationData {
                file: outcome.file_name.clone(),
                backup_size: utils::convert_bytes(outcome.size),
                database: db.name.clone(),
                storage: outcome.storage_name.to_string(),
                backup_location: outcome.location.clone(),
                duration: duration.clone(),
            })
            .await;
            info!("Backup name is {}", outcome.file_name);
            info!("Backup size: {}", utils::convert_bytes(outcome.size));
            info!("Backup successfully completed in {duration}");
            Ok(())
        }
        Err(err) => {
            // Best-effort cleanup and failure notification before the error
            // propagates; the local working directory must not accumulate
            // artifacts across runs.
            utils::sweep_dir(&job.working_dir);
            notify::notify_error(&format!("Error backing up database {}: {err}", db.name)).await;
            Err(err)
        }
    }
}

async fn run_stages(
    db: &DatabaseTarget,
    job: &BackupJobConfig,
    started: Instant,
) -> Result<BackupOutcome> {
    db_dump::test_connection(db)?;

    let all_in_one = job.all_databases && job.single_file;
    let prefix = if all_in_one {
        ALL_DATABASES_PREFIX
    } else {
        db.name.as_str()
    };
    let file_name = backup_file_name(prefix, job.compression);
    let artifact = job.working_dir.join(&file_name);
    db_dump::dump_database(db, all_in_one, &artifact, job.compression)?;

    let final_name = encrypt::encrypt_file(&job.working_dir, &file_name, &job.encryption)?;

    // A per-target sub-path overrides the job-wide remote path for this
    // iteration only.
    let remote_path = db
        .remote_path
        .clone()
        .unwrap_or_else(|| job.remote_path.clone());
    let backend =
        storage::create_backend(job.storage, job.working_dir.clone(), remote_path.clone()).await?;
    backend.copy(&final_name).await?;
    let location = format!("{}/{final_name}", remote_path.trim_end_matches('/'));
    info!("Backup saved in {location}");

    // Size is measured before cleanup deletes the local copy.
    let size = fs::metadata(job.working_dir.join(&final_name))?.len();
    utils::sweep_dir(&job.working_dir);

    if job.prune {
        backend.prune(job.retention_days).await?;
    }

    Ok(BackupOutcome {
        file_name: final_name,
        size,
        storage_name: backend.name(),
        location,
        duration: started.elapsed(),
    })
}

/// Drives the backup pipeline once per fleet target, in order, isolating
/// per-target failures according to the fleet's rescue policy.
pub async fn run_fleet_backup(fleet: &FleetConfig, job: &BackupJobConfig) -> Result<()> {
    info!("Starting multi database backup task...");
    let policy = FailurePolicy::from_rescue_mode(fleet.rescue_mode);
    for entry in &fleet.databases {
        let target = entry.to_target();
        if let Err(err) = run_backup(&target, job).await {
            // The pipeline already sent the failure notification.
            policy.handle(&format!("Error backing up database {}", target.name), err)?;
        }
    }
    Ok(())
}

/// Pre-flight connectivity sweep over every fleet target, run before a
/// scheduled job is registered. A target failing here in rescue mode is
/// skipped for the cycle but stays in the list for the next one.
pub async fn preflight_fleet(fleet: &FleetConfig, policy: FailurePolicy) -> Result<()> {
    for entry in &fleet.databases {
        let target = entry.to_target();
        if let Err(err) = db_dump::test_connection(&target) {
            let context = format!("Error connecting to database {}", target.name);
            notify::notify_error(&format!("{context}: {err}")).await;
            policy.handle(&context, err)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_rescue_mode() {
        assert_eq!(FailurePolicy::from_rescue_mode(true), FailurePolicy::Continue);
        assert_eq!(FailurePolicy::from_rescue_mode(false), FailurePolicy::Abort);
    }

    #[test]
    fn test_continue_policy_swallows_target_failures() {
        let policy = FailurePolicy::Continue;
        let result = policy.handle(
            "Error connecting to database shop",
            AppError::Connectivity("connection refused".to_string()),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_abort_policy_propagates_the_first_failure() {
        let policy = FailurePolicy::Abort;
        let result = policy.handle(
            "Error connecting to database shop",
            AppError::Connectivity("connection refused".to_string()),
        );
        assert!(matches!(result, Err(AppError::Connectivity(_))));
    }
}
