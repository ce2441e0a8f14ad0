use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::info;
use walkdir::WalkDir;

use crate::errors::{AppError, Result};
use crate::storage::{Backend, StorageBackend};

/// Copies artifacts between the working directory and a destination
/// directory on the same host.
pub struct LocalStorage {
    backend: Backend,
}

impl LocalStorage {
    pub fn new(backend: Backend) -> Self {
        LocalStorage { backend }
    }

    fn destination_dir(&self) -> PathBuf {
        PathBuf::from(&self.backend.remote_path)
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn copy(&self, file_name: &str) -> Result<()> {
        let source = self.backend.local_file(file_name);
        if !source.is_file() {
            return Err(AppError::Storage(format!(
                "Backup file not found: {}",
                source.display()
            )));
        }
        let dest_dir = self.destination_dir();
        fs::create_dir_all(&dest_dir).map_err(|err| {
            AppError::Storage(format!(
                "Failed to create destination directory {}: {err}",
                dest_dir.display()
            ))
        })?;
        copy_file(&source, &dest_dir.join(file_name))
    }

    async fn copy_from(&self, file_name: &str) -> Result<()> {
        let source = self.destination_dir().join(file_name);
        if !source.is_file() {
            return Err(AppError::Storage(format!(
                "Backup file not found: {}",
                source.display()
            )));
        }
        fs::create_dir_all(&self.backend.local_path)?;
        copy_file(&source, &self.backend.local_file(file_name))
    }

    async fn prune(&self, retention_days: u32) -> Result<()> {
        let window = Duration::from_secs(u64::from(retention_days) * 86_400);
        // A window reaching past the epoch keeps everything.
        let Some(cutoff) = SystemTime::now().checked_sub(window) else {
            info!("Retention window exceeds the clock range, keeping all backups");
            return Ok(());
        };
        for entry in WalkDir::new(self.destination_dir()) {
            let entry = entry.map_err(|err| {
                AppError::Storage(format!("Failed to walk destination directory: {err}"))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let meta = entry.metadata().map_err(|err| {
                AppError::Storage(format!("Failed to stat {}: {err}", entry.path().display()))
            })?;
            let modified = meta.modified().map_err(|err| {
                AppError::Storage(format!("Failed to stat {}: {err}", entry.path().display()))
            })?;
            if modified < cutoff {
                fs::remove_file(entry.path()).map_err(|err| {
                    AppError::Storage(format!(
                        "Failed to delete {}: {err}",
                        entry.path().display()
                    ))
                })?;
                info!("File {} deleted successfully", entry.path().display());
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

fn copy_file(source: &Path, dest: &Path) -> Result<()> {
    fs::copy(source, dest).map_err(|err| {
        AppError::Storage(format!(
            "Failed to copy {} to {}: {err}",
            source.display(),
            dest.display()
        ))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(local: &Path, remote: &Path) -> LocalStorage {
        LocalStorage::new(Backend::new(
            local.to_path_buf(),
            remote.to_string_lossy().into_owned(),
        ))
    }

    #[tokio::test]
    async fn test_copy_then_copy_from_round_trips_bytes() -> anyhow::Result<()> {
        let working = tempfile::tempdir()?;
        let dest = tempfile::tempdir()?;
        let storage = storage(working.path(), dest.path());

        let content = b"-- dump content\nINSERT INTO t VALUES (1);\n";
        fs::write(working.path().join("shop.sql"), content)?;

        storage.copy("shop.sql").await?;
        assert_eq!(fs::read(dest.path().join("shop.sql"))?, content);

        fs::remove_file(working.path().join("shop.sql"))?;
        storage.copy_from("shop.sql").await?;
        assert_eq!(fs::read(working.path().join("shop.sql"))?, content);
        Ok(())
    }

    #[tokio::test]
    async fn test_copy_missing_artifact_fails() -> anyhow::Result<()> {
        let working = tempfile::tempdir()?;
        let dest = tempfile::tempdir()?;
        let storage = storage(working.path(), dest.path());

        let result = storage.copy("missing.sql").await;
        assert!(matches!(result, Err(AppError::Storage(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_prune_respects_retention_cutoff() -> anyhow::Result<()> {
        let working = tempfile::tempdir()?;
        let dest = tempfile::tempdir()?;
        let storage = storage(working.path(), dest.path());

        let artifact = dest.path().join("old.sql.gz");
        fs::write(&artifact, "data")?;
        std::thread::sleep(Duration::from_millis(20));

        // A generous retention keeps a fresh file.
        storage.prune(7).await?;
        assert!(artifact.exists());

        // Zero days retention removes anything modified before "now".
        storage.prune(0).await?;
        assert!(!artifact.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_prune_with_an_absurd_retention_keeps_everything() -> anyhow::Result<()> {
        let working = tempfile::tempdir()?;
        let dest = tempfile::tempdir()?;
        let storage = storage(working.path(), dest.path());

        let artifact = dest.path().join("old.sql.gz");
        fs::write(&artifact, "data")?;

        // Wider than the clock can represent; must not panic or delete.
        storage.prune(u32::MAX).await?;
        assert!(artifact.exists());
        Ok(())
    }
}
