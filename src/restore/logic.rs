use std::fs;
use tracing::info;

use crate::backup::{db_dump, encrypt};
use crate::config::{DatabaseTarget, RestoreJobConfig};
use crate::errors::{AppError, Result};
use crate::restore::db_restore;
use crate::storage;
use crate::utils;

/// How the downloaded SQL artifact is fed into the database, decided from its
/// final extension after any decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPlan {
    Decompress,
    Plain,
}

/// Inverse of the artifact naming contract: the extension chain is consumed
/// right to left. Anything other than `.sql` or `.sql.gz` at this point is
/// not an artifact this tool produced.
pub fn plan_load(file_name: &str) -> Result<LoadPlan> {
    if file_name.ends_with(".sql.gz") {
        Ok(LoadPlan::Decompress)
    } else if file_name.ends_with(".sql") {
        Ok(LoadPlan::Plain)
    } else {
        Err(AppError::UnknownExtension(file_name.to_string()))
    }
}

pub fn needs_decryption(file_name: &str) -> bool {
    file_name.ends_with(&format!(".{}", encrypt::GPG_EXTENSION))
}

/// Runs the restore pipeline for one named artifact: fetch, decrypt if
/// needed, load. The working directory is swept afterwards whether the
/// restore succeeded or not.
pub async fn run_restore(db: &DatabaseTarget, job: &RestoreJobConfig) -> Result<()> {
    info!("Starting restore task...");
    fs::create_dir_all(&job.working_dir)?;

    let result = run_stages(db, job).await;
    utils::sweep_dir(&job.working_dir);
    result
}

async fn run_stages(db: &DatabaseTarget, job: &RestoreJobConfig) -> Result<()> {
    let backend = storage::create_backend(
        job.storage,
        job.working_dir.clone(),
        job.remote_path.clone(),
    )
    .await?;
    backend.copy_from(&job.file_name).await?;

    let mut file_name = job.file_name.clone();
    if needs_decryption(&file_name) {
        file_name = encrypt::decrypt_file(
            &job.working_dir,
            &file_name,
            job.passphrase.as_deref(),
            job.private_key.as_deref(),
        )?;
    }
    let plan = plan_load(&file_name)?;

    db_dump::test_connection(db)?;
    db_restore::load_database(db, &job.working_dir.join(&file_name), plan)?;
    info!("Restore successfully completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_load_by_extension() -> anyhow::Result<()> {
        assert_eq!(plan_load("shop_20260830_120000.sql.gz")?, LoadPlan::Decompress);
        assert_eq!(plan_load("shop_20260830_120000.sql")?, LoadPlan::Plain);
        Ok(())
    }

    #[test]
    fn test_plan_load_rejects_unknown_extensions() {
        assert!(matches!(
            plan_load("shop.bak"),
            Err(AppError::UnknownExtension(_))
        ));
        // Encrypted artifacts must be decrypted before a load plan exists.
        assert!(matches!(
            plan_load("shop.sql.gz.gpg"),
            Err(AppError::UnknownExtension(_))
        ));
    }

    #[test]
    fn test_decryption_is_detected_from_the_outermost_extension() {
        assert!(needs_decryption("shop.sql.gz.gpg"));
        assert!(needs_decryption("shop.sql.gpg"));
        assert!(!needs_decryption("shop.sql.gz"));
        assert!(!needs_decryption("shop.sql"));
    }
}
