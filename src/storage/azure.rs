use async_trait::async_trait;
use azure_storage::StorageCredentials;
use azure_storage_blobs::blob::{BlobBlockType, BlockList};
use azure_storage_blobs::prelude::*;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::info;

use crate::config::required_env;
use crate::errors::{AppError, Result};
use crate::storage::{retention_cutoff, Backend, StorageBackend};

/// Upload block size; a multi-GiB artifact is never held in memory whole.
const UPLOAD_BLOCK_SIZE: u64 = 8 * 1024 * 1024;

/// Reads the next block of at most `limit` bytes; empty at end of input.
async fn next_block<R>(reader: &mut R, limit: u64) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::with_capacity(limit as usize);
    (&mut *reader).take(limit).read_to_end(&mut buffer).await?;
    Ok(buffer)
}

#[derive(Debug, Clone)]
pub struct AzureConfig {
    pub account_name: String,
    pub account_key: String,
    pub container_name: String,
}

impl AzureConfig {
    pub fn from_env() -> Result<Self> {
        Ok(AzureConfig {
            account_name: required_env("AZURE_STORAGE_ACCOUNT_NAME")?,
            account_key: required_env("AZURE_STORAGE_ACCOUNT_KEY")?,
            container_name: required_env("AZURE_STORAGE_CONTAINER_NAME")?,
        })
    }
}

/// Azure Blob container destination.
pub struct AzureStorage {
    container: ContainerClient,
    backend: Backend,
}

impl AzureStorage {
    pub fn new(conf: AzureConfig, backend: Backend) -> Self {
        let credentials =
            StorageCredentials::access_key(conf.account_name.clone(), conf.account_key.clone());
        let container = ClientBuilder::new(conf.account_name, credentials)
            .container_client(conf.container_name);
        AzureStorage { container, backend }
    }
}

#[async_trait]
impl StorageBackend for AzureStorage {
    async fn copy(&self, file_name: &str) -> Result<()> {
        let source = self.backend.local_file(file_name);
        let mut file = tokio::fs::File::open(&source).await.map_err(|err| {
            AppError::Storage(format!(
                "Failed to read backup file {}: {err}",
                source.display()
            ))
        })?;
        let blob = self.container.blob_client(self.backend.remote_key(file_name));

        let mut block_list = BlockList::default();
        let mut index: u64 = 0;
        loop {
            let block = next_block(&mut file, UPLOAD_BLOCK_SIZE).await?;
            if block.is_empty() {
                break;
            }
            let block_id = format!("{index:016}");
            blob.put_block(block_id.clone(), block).await.map_err(|err| {
                AppError::Storage(format!("Failed to upload blob {file_name}: {err}"))
            })?;
            block_list
                .blocks
                .push(BlobBlockType::new_uncommitted(block_id));
            index += 1;
        }

        if block_list.blocks.is_empty() {
            // Zero-byte artifact; there is no block to commit.
            blob.put_block_blob(Vec::new()).await.map_err(|err| {
                AppError::Storage(format!("Failed to upload blob {file_name}: {err}"))
            })?;
        } else {
            blob.put_block_list(block_list).await.map_err(|err| {
                AppError::Storage(format!("Failed to commit blob {file_name}: {err}"))
            })?;
        }
        Ok(())
    }

    async fn copy_from(&self, file_name: &str) -> Result<()> {
        let key = self.backend.remote_key(file_name);
        let data = self
            .container
            .blob_client(&key)
            .get_content()
            .await
            .map_err(|err| AppError::Storage(format!("Failed to download blob {key}: {err}")))?;
        tokio::fs::create_dir_all(&self.backend.local_path).await?;
        let dest = self.backend.local_file(file_name);
        tokio::fs::write(&dest, &data).await?;
        info!("Backup downloaded: {}, {} bytes", dest.display(), data.len());
        Ok(())
    }

    async fn prune(&self, retention_days: u32) -> Result<()> {
        let cutoff = retention_cutoff(retention_days);
        let prefix = self.backend.remote_path.trim_end_matches('/').to_string();
        let mut pages = self
            .container
            .list_blobs()
            .prefix(prefix)
            .into_stream();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| {
                AppError::Storage(format!("Failed to list blobs: {err}"))
            })?;
            for blob in page.blobs.blobs() {
                if blob.properties.last_modified.unix_timestamp() < cutoff.timestamp() {
                    info!("Deleting old backup: {}", blob.name);
                    self.container
                        .blob_client(&blob.name)
                        .delete()
                        .await
                        .map_err(|err| {
                            AppError::Storage(format!(
                                "Failed to delete blob {}: {err}",
                                blob.name
                            ))
                        })?;
                }
            }
        }
        info!("Deleting old backups...done");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "azure"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_next_block_splits_at_the_block_size() -> anyhow::Result<()> {
        let mut reader: &[u8] = &[7u8; 10];
        assert_eq!(next_block(&mut reader, 4).await?.len(), 4);
        assert_eq!(next_block(&mut reader, 4).await?.len(), 4);
        assert_eq!(next_block(&mut reader, 4).await?.len(), 2);
        assert!(next_block(&mut reader, 4).await?.is_empty());
        Ok(())
    }
}
