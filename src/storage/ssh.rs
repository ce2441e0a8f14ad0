use async_trait::async_trait;
use ssh2::Session;
use std::fs::File;
use std::io;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{env_nonempty, required_env};
use crate::errors::{AppError, Result};
use crate::storage::{Backend, StorageBackend};
use crate::utils;

#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub identity_file: Option<PathBuf>,
}

impl SshConfig {
    pub fn from_env() -> Result<Self> {
        let host = env_nonempty("SSH_HOST")
            .or_else(|| env_nonempty("SSH_HOST_NAME"))
            .ok_or_else(|| {
                AppError::Config("SSH_HOST environment variable is required".to_string())
            })?;
        let port = required_env("SSH_PORT")?
            .trim()
            .parse()
            .map_err(|_| AppError::Config("Invalid SSH_PORT".to_string()))?;
        Ok(SshConfig {
            host,
            port,
            user: required_env("SSH_USER")?,
            password: env_nonempty("SSH_PASSWORD"),
            identity_file: env_nonempty("SSH_IDENTIFY_FILE").map(PathBuf::from),
        })
    }
}

/// Secure-copy destination: one SSH/SFTP session is opened per call and
/// closed as soon as the transfer finishes.
pub struct SshStorage {
    conf: SshConfig,
    backend: Backend,
}

impl SshStorage {
    pub fn new(conf: SshConfig, backend: Backend) -> Self {
        SshStorage { conf, backend }
    }

    fn session(&self) -> Result<Session> {
        let address = format!("{}:{}", self.conf.host, self.conf.port);
        let tcp = TcpStream::connect(&address).map_err(|err| {
            AppError::Connectivity(format!(
                "Couldn't establish a connection to the remote server {address}: {err}"
            ))
        })?;
        let mut session = Session::new()
            .map_err(|err| AppError::Storage(format!("Failed to create SSH session: {err}")))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|err| AppError::Connectivity(format!("SSH handshake failed: {err}")))?;

        match &self.conf.identity_file {
            Some(identity) if utils::file_exists(identity) => {
                session
                    .userauth_pubkey_file(&self.conf.user, None, identity, None)
                    .map_err(|err| {
                        AppError::Connectivity(format!("SSH public key auth failed: {err}"))
                    })?;
            }
            _ => {
                let password = self.conf.password.as_deref().ok_or_else(|| {
                    AppError::Config(
                        "SSH_PASSWORD environment variable is required if SSH_IDENTIFY_FILE is empty"
                            .to_string(),
                    )
                })?;
                warn!("Accessing the remote server using password, which is not recommended");
                session
                    .userauth_password(&self.conf.user, password)
                    .map_err(|err| {
                        AppError::Connectivity(format!("SSH password auth failed: {err}"))
                    })?;
            }
        }
        Ok(session)
    }

    fn remote_file(&self, file_name: &str) -> String {
        self.backend.remote_key(file_name)
    }
}

#[async_trait]
impl StorageBackend for SshStorage {
    async fn copy(&self, file_name: &str) -> Result<()> {
        let session = self.session()?;
        let sftp = session
            .sftp()
            .map_err(|err| AppError::Storage(format!("Failed to open SFTP channel: {err}")))?;

        // Best-effort: the directory may already exist.
        let _ = sftp.mkdir(Path::new(&self.backend.remote_path), 0o755);

        let source = self.backend.local_file(file_name);
        let mut local = File::open(&source).map_err(|err| {
            AppError::Storage(format!("Failed to open file {}: {err}", source.display()))
        })?;
        let remote_path = self.remote_file(file_name);
        let mut remote = sftp.create(Path::new(&remote_path)).map_err(|err| {
            AppError::Storage(format!("Failed to create remote file {remote_path}: {err}"))
        })?;
        io::copy(&mut local, &mut remote).map_err(|err| {
            AppError::Storage(format!("Failed to copy file to remote server: {err}"))
        })?;
        Ok(())
    }

    async fn copy_from(&self, file_name: &str) -> Result<()> {
        let session = self.session()?;
        let sftp = session
            .sftp()
            .map_err(|err| AppError::Storage(format!("Failed to open SFTP channel: {err}")))?;

        let remote_path = self.remote_file(file_name);
        let mut remote = sftp.open(Path::new(&remote_path)).map_err(|err| {
            AppError::Storage(format!("Failed to open remote file {remote_path}: {err}"))
        })?;
        std::fs::create_dir_all(&self.backend.local_path)?;
        let dest = self.backend.local_file(file_name);
        let mut local = File::create(&dest).map_err(|err| {
            AppError::Storage(format!("Couldn't open the output file {}: {err}", dest.display()))
        })?;
        io::copy(&mut remote, &mut local).map_err(|err| {
            AppError::Storage(format!("Failed to copy file from remote server: {err}"))
        })?;
        Ok(())
    }

    async fn prune(&self, _retention_days: u32) -> Result<()> {
        info!("Deleting old backups from a remote SSH server is not implemented yet");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ssh"
    }
}
