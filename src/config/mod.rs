use chrono::Local;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, Result};
use crate::utils;

/// Conventional home for GPG key material, checked before any configured path.
pub const GPG_HOME: &str = "/config/gnupg";

const DEFAULT_STORAGE_PATH: &str = "/backup";
const DEFAULT_DB_PORT: u16 = 3306;

pub(crate) fn env_nonempty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

pub(crate) fn required_env(name: &str) -> Result<String> {
    env_nonempty(name).ok_or_else(|| {
        AppError::Config(format!("{name} environment variable is required"))
    })
}

pub(crate) fn env_bool(name: &str) -> bool {
    env_nonempty(name)
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Storage destination discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Local,
    S3,
    Ssh,
    Ftp,
    Azure,
}

impl StorageKind {
    /// Unrecognized values fall back to local storage for backward
    /// compatibility with older configuration values.
    pub fn parse(value: &str) -> StorageKind {
        match value.to_ascii_lowercase().as_str() {
            "s3" => StorageKind::S3,
            "ssh" | "remote" | "sftp" => StorageKind::Ssh,
            "ftp" => StorageKind::Ftp,
            "azure" => StorageKind::Azure,
            _ => StorageKind::Local,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Local => "local",
            StorageKind::S3 => "s3",
            StorageKind::Ssh => "ssh",
            StorageKind::Ftp => "ftp",
            StorageKind::Azure => "azure",
        }
    }
}

/// One database to back up or restore. Immutable once built.
#[derive(Debug, Clone)]
pub struct DatabaseTarget {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: String,
    /// Per-target override of the job-wide remote path (fleet entries only).
    pub remote_path: Option<String>,
}

impl DatabaseTarget {
    pub fn from_env() -> Result<Self> {
        Ok(DatabaseTarget {
            host: required_env("DB_HOST")?,
            port: parse_port(env_nonempty("DB_PORT"))?,
            name: required_env("DB_NAME")?,
            username: required_env("DB_USERNAME")?,
            password: required_env("DB_PASSWORD")?,
            remote_path: None,
        })
    }
}

fn parse_port(value: Option<String>) -> Result<u16> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("Invalid database port: {raw}"))),
        None => Ok(DEFAULT_DB_PORT),
    }
}

/// How the backup artifact is encrypted, decided once per job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionMode {
    None,
    Passphrase(String),
    PublicKey(PathBuf),
}

impl EncryptionMode {
    /// A usable public-key file takes precedence over a configured
    /// passphrase; with neither, encryption is skipped.
    pub fn select(public_key: Option<PathBuf>, passphrase: Option<String>) -> EncryptionMode {
        match (public_key, passphrase) {
            (Some(key), _) => EncryptionMode::PublicKey(key),
            (None, Some(passphrase)) => EncryptionMode::Passphrase(passphrase),
            (None, None) => EncryptionMode::None,
        }
    }

    pub fn from_env() -> EncryptionMode {
        let gpg_home = PathBuf::from(GPG_HOME);
        let public_key = utils::find_key_file(
            env_nonempty("GPG_PUBLIC_KEY").as_deref(),
            &[
                gpg_home.join("public_key.asc"),
                gpg_home.join("public_key.gpg"),
            ],
        );
        EncryptionMode::select(public_key, env_nonempty("GPG_PASSPHRASE"))
    }
}

/// Job-wide backup settings, shared by every target of a run.
#[derive(Debug, Clone)]
pub struct BackupJobConfig {
    pub storage: StorageKind,
    pub remote_path: String,
    pub working_dir: PathBuf,
    pub compression: bool,
    pub encryption: EncryptionMode,
    pub prune: bool,
    pub retention_days: u32,
    pub cron_expression: Option<String>,
    pub all_databases: bool,
    pub single_file: bool,
}

impl BackupJobConfig {
    pub fn from_env() -> Result<Self> {
        let retention_days: u32 = match env_nonempty("BACKUP_RETENTION_DAYS") {
            Some(raw) => raw.trim().parse().map_err(|_| {
                AppError::Config(format!("Invalid BACKUP_RETENTION_DAYS: {raw}"))
            })?,
            None => 0,
        };
        Ok(BackupJobConfig {
            storage: StorageKind::parse(&env::var("STORAGE").unwrap_or_default()),
            remote_path: remote_path_from_env(),
            working_dir: working_dir_from_env(),
            compression: !env_bool("DISABLE_COMPRESSION"),
            encryption: EncryptionMode::from_env(),
            prune: retention_days > 0,
            retention_days,
            cron_expression: env_nonempty("BACKUP_CRON_EXPRESSION"),
            all_databases: env_bool("BACKUP_ALL_DATABASES"),
            single_file: env_bool("BACKUP_ALL_IN_ONE"),
        })
    }
}

/// Restore settings for a single named artifact.
#[derive(Debug, Clone)]
pub struct RestoreJobConfig {
    pub storage: StorageKind,
    pub remote_path: String,
    pub working_dir: PathBuf,
    pub file_name: String,
    pub passphrase: Option<String>,
    pub private_key: Option<PathBuf>,
}

impl RestoreJobConfig {
    pub fn from_env() -> Result<Self> {
        let file_name = required_env("FILE_NAME")?;
        let gpg_home = PathBuf::from(GPG_HOME);
        let private_key = utils::find_key_file(
            env_nonempty("GPG_PRIVATE_KEY").as_deref(),
            &[
                gpg_home.join("private_key.asc"),
                gpg_home.join("private_key.gpg"),
            ],
        );
        Ok(RestoreJobConfig {
            storage: StorageKind::parse(&env::var("STORAGE").unwrap_or_default()),
            remote_path: remote_path_from_env(),
            working_dir: working_dir_from_env(),
            file_name,
            passphrase: env_nonempty("GPG_PASSPHRASE"),
            private_key,
        })
    }
}

fn remote_path_from_env() -> String {
    env_nonempty("REMOTE_PATH")
        .or_else(|| env_nonempty("AWS_S3_PATH"))
        .or_else(|| env_nonempty("STORAGE_PATH"))
        .unwrap_or_else(|| DEFAULT_STORAGE_PATH.to_string())
}

fn working_dir_from_env() -> PathBuf {
    env_nonempty("TMP_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| env::temp_dir().join("dbvault"))
}

/// Artifact naming contract, relied on by restore: the extension chain
/// records the transformation history and is consumed in reverse.
pub fn backup_file_name(database: &str, compression: bool) -> String {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    if compression {
        format!("{database}_{stamp}.sql.gz")
    } else {
        format!("{database}_{stamp}.sql")
    }
}

/// Database prefix used when a job backs up every database into one artifact.
pub const ALL_DATABASES_PREFIX: &str = "all_databases";

/// One entry of the declarative fleet document.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetTarget {
    pub host: String,
    #[serde(default = "default_fleet_port")]
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub path: Option<String>,
}

fn default_fleet_port() -> u16 {
    DEFAULT_DB_PORT
}

impl FleetTarget {
    pub fn to_target(&self) -> DatabaseTarget {
        DatabaseTarget {
            host: self.host.clone(),
            port: self.port,
            name: self.name.clone(),
            username: self.user.clone(),
            password: self.password.clone(),
            remote_path: self.path.clone().filter(|p| !p.trim().is_empty()),
        }
    }
}

/// Declarative list of databases backed up together, optionally on one
/// shared schedule. Re-read before each scheduled batch so hand-edits
/// between runs are picked up.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    pub databases: Vec<FleetTarget>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub rescue_mode: bool,
}

impl FleetConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|err| {
            AppError::Config(format!(
                "Error reading fleet config file {}: {err}",
                path.display()
            ))
        })?;
        let fleet: FleetConfig = serde_json::from_str(&content).map_err(|err| {
            AppError::Config(format!(
                "Error parsing fleet config file {}: {err}",
                path.display()
            ))
        })?;
        if fleet.databases.is_empty() {
            return Err(AppError::Config(format!(
                "No databases found in fleet config file {}",
                path.display()
            )));
        }
        Ok(fleet)
    }
}

/// Returns the fleet config file to use, if one is configured or present in
/// the working directory.
pub fn fleet_config_file() -> Option<PathBuf> {
    let candidates = [
        env_nonempty("BACKUP_CONFIG_FILE").map(PathBuf::from),
        Some(PathBuf::from("config.json")),
    ];
    candidates
        .into_iter()
        .flatten()
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_kind_aliases() {
        assert_eq!(StorageKind::parse("s3"), StorageKind::S3);
        assert_eq!(StorageKind::parse("S3"), StorageKind::S3);
        assert_eq!(StorageKind::parse("ssh"), StorageKind::Ssh);
        assert_eq!(StorageKind::parse("remote"), StorageKind::Ssh);
        assert_eq!(StorageKind::parse("sftp"), StorageKind::Ssh);
        assert_eq!(StorageKind::parse("FTP"), StorageKind::Ftp);
        assert_eq!(StorageKind::parse("azure"), StorageKind::Azure);
        assert_eq!(StorageKind::parse("local"), StorageKind::Local);
    }

    #[test]
    fn test_storage_kind_falls_back_to_local() {
        assert_eq!(StorageKind::parse(""), StorageKind::Local);
        assert_eq!(StorageKind::parse("gcs"), StorageKind::Local);
        assert_eq!(StorageKind::parse("not-a-storage"), StorageKind::Local);
    }

    #[test]
    fn test_backup_file_name_format() {
        let name = backup_file_name("shop", true);
        assert!(name.starts_with("shop_"));
        assert!(name.ends_with(".sql.gz"));
        // shop_YYYYMMDD_HHMMSS.sql.gz
        let stamp = &name["shop_".len()..name.len() - ".sql.gz".len()];
        assert_eq!(stamp.len(), 15);
        assert_eq!(&stamp[8..9], "_");
        assert!(stamp[..8].chars().all(|c| c.is_ascii_digit()));
        assert!(stamp[9..].chars().all(|c| c.is_ascii_digit()));

        let plain = backup_file_name("shop", false);
        assert!(plain.ends_with(".sql"));
        assert!(!plain.ends_with(".sql.gz"));
    }

    #[test]
    fn test_encryption_mode_precedence() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let key = dir.path().join("public_key.asc");
        fs::write(&key, "key material")?;

        let mode = EncryptionMode::select(Some(key.clone()), Some("secret".into()));
        assert_eq!(mode, EncryptionMode::PublicKey(key));

        let mode = EncryptionMode::select(None, Some("secret".into()));
        assert_eq!(mode, EncryptionMode::Passphrase("secret".into()));

        assert_eq!(EncryptionMode::select(None, None), EncryptionMode::None);
        Ok(())
    }

    #[test]
    fn test_fleet_config_load() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("fleet.json");
        fs::write(
            &path,
            r#"{
                "databases": [
                    {"host": "db1", "name": "shop", "user": "root", "password": "pw"},
                    {"host": "db2", "port": 3307, "name": "crm", "user": "root",
                     "password": "pw", "path": "/backups/crm"}
                ],
                "cron_expression": "0 3 * * *",
                "rescue_mode": true
            }"#,
        )?;

        let fleet = FleetConfig::load(&path)?;
        assert_eq!(fleet.databases.len(), 2);
        assert!(fleet.rescue_mode);
        assert_eq!(fleet.cron_expression.as_deref(), Some("0 3 * * *"));

        let first = fleet.databases[0].to_target();
        assert_eq!(first.port, 3306);
        assert_eq!(first.remote_path, None);

        let second = fleet.databases[1].to_target();
        assert_eq!(second.port, 3307);
        assert_eq!(second.remote_path.as_deref(), Some("/backups/crm"));
        Ok(())
    }

    #[test]
    fn test_fleet_config_rejects_empty_list() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("fleet.json");
        fs::write(&path, r#"{"databases": []}"#)?;

        let result = FleetConfig::load(&path);
        assert!(matches!(result, Err(AppError::Config(_))));
        Ok(())
    }
}
