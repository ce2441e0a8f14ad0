use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::primitives::ByteStream;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::config::{env_bool, required_env};
use crate::errors::{AppError, Result};
use crate::storage::{retention_cutoff, Backend, StorageBackend};

#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub force_path_style: bool,
}

impl S3Config {
    pub fn from_env() -> Result<Self> {
        Ok(S3Config {
            endpoint: required_env("AWS_S3_ENDPOINT")?,
            bucket: required_env("AWS_S3_BUCKET_NAME")?,
            access_key: required_env("AWS_ACCESS_KEY")?,
            secret_key: required_env("AWS_SECRET_KEY")?,
            region: required_env("AWS_REGION")?,
            force_path_style: env_bool("AWS_FORCE_PATH_STYLE"),
        })
    }
}

/// S3-compatible object storage destination.
pub struct S3Storage {
    client: s3::Client,
    bucket: String,
    backend: Backend,
}

impl S3Storage {
    pub async fn connect(conf: S3Config, backend: Backend) -> Result<Self> {
        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(&conf.endpoint)
            .region(Region::new(conf.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &conf.access_key,
                &conf.secret_key,
                None,
                None,
                "Static",
            ))
            .load()
            .await;
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(conf.force_path_style)
            .build();
        Ok(S3Storage {
            client: s3::Client::from_conf(s3_config),
            bucket: conf.bucket,
            backend,
        })
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
    async fn copy(&self, file_name: &str) -> Result<()> {
        let source = self.backend.local_file(file_name);
        let key = self.backend.remote_key(file_name);
        let body = ByteStream::from_path(&source).await.map_err(|err| {
            AppError::Storage(format!(
                "Failed to read backup file {}: {err}",
                source.display()
            ))
        })?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .send()
            .await
            .map_err(|err| {
                AppError::Storage(format!(
                    "Failed to upload {file_name} to bucket {}: {err}",
                    self.bucket
                ))
            })?;
        Ok(())
    }

    async fn copy_from(&self, file_name: &str) -> Result<()> {
        let key = self.backend.remote_key(file_name);
        let mut object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|err| {
                AppError::Storage(format!(
                    "Failed to download s3://{}/{key}: {err}",
                    self.bucket
                ))
            })?;

        tokio::fs::create_dir_all(&self.backend.local_path).await?;
        let dest = self.backend.local_file(file_name);
        let mut output = tokio::fs::File::create(&dest).await?;
        let mut downloaded: u64 = 0;
        while let Some(chunk) = object.body.try_next().await.map_err(|err| {
            AppError::Storage(format!("Failed to stream s3://{}/{key}: {err}", self.bucket))
        })? {
            output.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
        }
        output.flush().await?;
        info!("Backup downloaded: {}, {} bytes", dest.display(), downloaded);
        Ok(())
    }

    async fn prune(&self, retention_days: u32) -> Result<()> {
        let cutoff = retention_cutoff(retention_days);
        let prefix = self.backend.remote_path.trim_end_matches('/').to_string();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| {
                AppError::Storage(format!(
                    "Failed to list objects in bucket {}: {err}",
                    self.bucket
                ))
            })?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                let expired = object
                    .last_modified()
                    .map(|stamp| stamp.secs() < cutoff.timestamp())
                    .unwrap_or(false);
                if expired {
                    info!("Deleting old backup: {key}");
                    self.client
                        .delete_object()
                        .bucket(&self.bucket)
                        .key(key)
                        .send()
                        .await
                        .map_err(|err| {
                            AppError::Storage(format!("Failed to delete object {key}: {err}"))
                        })?;
                }
            }
        }
        info!("Deleting old backups...done");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}
