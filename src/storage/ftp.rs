use async_trait::async_trait;
use std::fs::{self, File};
use suppaftp::types::FileType;
use suppaftp::FtpStream;
use tracing::info;

use crate::config::{env_nonempty, required_env};
use crate::errors::{AppError, Result};
use crate::storage::{Backend, StorageBackend};

#[derive(Debug, Clone)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl FtpConfig {
    pub fn from_env() -> Result<Self> {
        let host = env_nonempty("FTP_HOST")
            .or_else(|| env_nonempty("FTP_HOST_NAME"))
            .ok_or_else(|| {
                AppError::Config("FTP_HOST environment variable is required".to_string())
            })?;
        let port = required_env("FTP_PORT")?
            .trim()
            .parse()
            .map_err(|_| AppError::Config("Invalid FTP_PORT".to_string()))?;
        Ok(FtpConfig {
            host,
            port,
            user: required_env("FTP_USER")?,
            password: required_env("FTP_PASSWORD")?,
        })
    }
}

/// File-transfer server destination; one control session per call.
pub struct FtpStorage {
    conf: FtpConfig,
    backend: Backend,
}

impl FtpStorage {
    pub fn new(conf: FtpConfig, backend: Backend) -> Self {
        FtpStorage { conf, backend }
    }

    fn connect(&self) -> Result<FtpStream> {
        let address = format!("{}:{}", self.conf.host, self.conf.port);
        let mut ftp = FtpStream::connect(&address).map_err(|err| {
            AppError::Connectivity(format!("Failed to connect to FTP server {address}: {err}"))
        })?;
        ftp.login(&self.conf.user, &self.conf.password)
            .map_err(|err| AppError::Connectivity(format!("Failed to log in to FTP: {err}")))?;
        ftp.transfer_type(FileType::Binary)
            .map_err(|err| AppError::Storage(format!("Failed to set binary mode: {err}")))?;
        if !self.backend.remote_path.is_empty() {
            // Best-effort: the directory may already exist.
            let _ = ftp.mkdir(&self.backend.remote_path);
            ftp.cwd(&self.backend.remote_path).map_err(|err| {
                AppError::Storage(format!(
                    "Failed to change to remote directory {}: {err}",
                    self.backend.remote_path
                ))
            })?;
        }
        Ok(ftp)
    }
}

#[async_trait]
impl StorageBackend for FtpStorage {
    async fn copy(&self, file_name: &str) -> Result<()> {
        let mut ftp = self.connect()?;
        let source = self.backend.local_file(file_name);
        let mut local = File::open(&source).map_err(|err| {
            AppError::Storage(format!("Failed to open file {}: {err}", source.display()))
        })?;
        ftp.put_file(file_name, &mut local).map_err(|err| {
            AppError::Storage(format!("Failed to upload file {file_name}: {err}"))
        })?;
        let _ = ftp.quit();
        Ok(())
    }

    async fn copy_from(&self, file_name: &str) -> Result<()> {
        let mut ftp = self.connect()?;
        let buffer = ftp.retr_as_buffer(file_name).map_err(|err| {
            AppError::Storage(format!("Failed to retrieve file {file_name}: {err}"))
        })?;
        fs::create_dir_all(&self.backend.local_path)?;
        let dest = self.backend.local_file(file_name);
        fs::write(&dest, buffer.into_inner()).map_err(|err| {
            AppError::Storage(format!(
                "Failed to write local file {}: {err}",
                dest.display()
            ))
        })?;
        let _ = ftp.quit();
        Ok(())
    }

    async fn prune(&self, _retention_days: u32) -> Result<()> {
        info!("Deleting old backups from a remote FTP server is not implemented yet");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ftp"
    }
}
