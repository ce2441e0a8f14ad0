pub mod db_restore;
pub mod logic;

use crate::config::{DatabaseTarget, RestoreJobConfig};
use crate::errors::Result;

/// Restore entry point: one named artifact into the single target described
/// by the environment.
pub async fn start_restore() -> Result<()> {
    let job = RestoreJobConfig::from_env()?;
    let db = DatabaseTarget::from_env()?;
    logic::run_restore(&db, &job).await
}
