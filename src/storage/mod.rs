pub(crate) mod azure;
pub(crate) mod ftp;
pub(crate) mod local;
pub(crate) mod s3;
pub(crate) mod ssh;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;

use crate::config::StorageKind;
use crate::errors::Result;

/// Capability set shared by every storage destination. The five backends are
/// independent implementations, selected at runtime by [`StorageKind`].
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Uploads the named artifact from the local working directory to the
    /// configured remote location, creating remote directories as needed.
    async fn copy(&self, file_name: &str) -> Result<()>;

    /// Downloads the named artifact from the remote location into the local
    /// working directory.
    async fn copy_from(&self, file_name: &str) -> Result<()>;

    /// Deletes remote artifacts older than `retention_days`, measured from
    /// their last-modified time. Backends without a listing capability log
    /// "not implemented" and succeed: pruning is advisory, never required
    /// for backup success.
    async fn prune(&self, retention_days: u32) -> Result<()>;

    /// Stable identifier used in logs and notifications.
    fn name(&self) -> &'static str;
}

/// Local working directory and remote location every backend is bound to.
#[derive(Debug, Clone)]
pub struct Backend {
    pub local_path: PathBuf,
    pub remote_path: String,
}

impl Backend {
    pub fn new(local_path: PathBuf, remote_path: String) -> Self {
        Backend {
            local_path,
            remote_path,
        }
    }

    pub fn local_file(&self, file_name: &str) -> PathBuf {
        self.local_path.join(file_name)
    }

    /// Remote object key / path for an artifact, with a normalized separator.
    pub fn remote_key(&self, file_name: &str) -> String {
        let prefix = self.remote_path.trim_end_matches('/');
        if prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{prefix}/{file_name}")
        }
    }
}

/// Artifacts last modified strictly before this instant are eligible for
/// deletion. A window wider than the representable range saturates to the
/// minimum timestamp, which keeps everything.
pub(crate) fn retention_cutoff(retention_days: u32) -> DateTime<Utc> {
    Utc::now()
        .checked_sub_signed(Duration::days(i64::from(retention_days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Builds the backend selected by `kind`. A connection or authentication
/// failure here is fatal for the job: there is no destination to deliver to.
pub async fn create_backend(
    kind: StorageKind,
    local_path: PathBuf,
    remote_path: String,
) -> Result<Box<dyn StorageBackend>> {
    let backend = Backend::new(local_path, remote_path);
    match kind {
        StorageKind::Local => Ok(Box::new(local::LocalStorage::new(backend))),
        StorageKind::S3 => {
            let conf = s3::S3Config::from_env()?;
            Ok(Box::new(s3::S3Storage::connect(conf, backend).await?))
        }
        StorageKind::Ssh => {
            let conf = ssh::SshConfig::from_env()?;
            Ok(Box::new(ssh::SshStorage::new(conf, backend)))
        }
        StorageKind::Ftp => {
            let conf = ftp::FtpConfig::from_env()?;
            Ok(Box::new(ftp::FtpStorage::new(conf, backend)))
        }
        StorageKind::Azure => {
            let conf = azure::AzureConfig::from_env()?;
            Ok(Box::new(azure::AzureStorage::new(conf, backend)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_key_normalization() {
        let backend = Backend::new(PathBuf::from("/tmp"), "backups/".to_string());
        assert_eq!(backend.remote_key("shop.sql.gz"), "backups/shop.sql.gz");

        let backend = Backend::new(PathBuf::from("/tmp"), String::new());
        assert_eq!(backend.remote_key("shop.sql.gz"), "shop.sql.gz");
    }

    #[test]
    fn test_retention_cutoff_saturates_on_absurd_windows() {
        assert!(retention_cutoff(7) < Utc::now());
        // Must not panic; everything is newer than the saturated cutoff.
        assert_eq!(retention_cutoff(u32::MAX), DateTime::<Utc>::MIN_UTC);
    }
}
