//! S3-compatible raw storage backend
//!
//! Works against AWS S3 or MinIO (path-style). Every network call carries
//! an explicit timeout so one stuck request cannot stall the whole
//! sequential pipeline pass.

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::{config::Region, primitives::ByteStream, Client};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use adflow_common::{IngestError, Result};

use crate::config::StorageConfig;
use crate::contract::{RawStorage, StorageMetadata};

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    timeout: Duration,
}

impl S3Storage {
    pub fn new(config: &StorageConfig) -> Self {
        debug!(bucket = %config.bucket, endpoint = ?config.endpoint, "initializing raw storage");

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "adflow-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!(bucket = %config.bucket, "raw storage client initialized");

        Self {
            client,
            bucket: config.bucket.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// A timed-out call is a failure of this stage, not a hang.
    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| IngestError::Storage(format!("{} timed out", operation)))?
    }
}

#[async_trait]
impl RawStorage for S3Storage {
    async fn put(&self, content: &[u8], metadata: &StorageMetadata) -> Result<String> {
        let key = super::build_key(&metadata.account_id, &metadata.filename);
        let size = content.len();

        debug!(key = %key, size, "uploading raw artifact");

        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("text/csv")
            .metadata("account-id", &metadata.account_id)
            .metadata("filename", &metadata.filename)
            .metadata("sender", &metadata.sender)
            .body(ByteStream::from(content.to_vec()));

        self.bounded("upload", async {
            request
                .send()
                .await
                .map_err(|e| IngestError::Storage(format!("upload failed: {}", e)))
        })
        .await?;

        info!(key = %key, size, "raw artifact stored");
        Ok(key)
    }

    async fn get(&self, file_id: &str) -> Result<Vec<u8>> {
        debug!(key = %file_id, "downloading raw artifact");

        let response = self
            .bounded("download", async {
                self.client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(file_id)
                    .send()
                    .await
                    .map_err(|e| {
                        let service_err = e.into_service_error();
                        if service_err.is_no_such_key() {
                            IngestError::Storage(format!("not found: {}", file_id))
                        } else {
                            IngestError::Storage(format!("download failed: {}", service_err))
                        }
                    })
            })
            .await?;

        let data = self
            .bounded("download body", async {
                response
                    .body
                    .collect()
                    .await
                    .map_err(|e| IngestError::Storage(format!("failed to read body: {}", e)))
            })
            .await?;

        Ok(data.into_bytes().to_vec())
    }

    async fn delete(&self, file_id: &str) -> Result<bool> {
        debug!(key = %file_id, "deleting raw artifact");

        // S3 delete is idempotent and silent on missing keys; probe first so
        // the caller learns whether anything was actually removed.
        let existed = self
            .bounded("head", async {
                match self
                    .client
                    .head_object()
                    .bucket(&self.bucket)
                    .key(file_id)
                    .send()
                    .await
                {
                    Ok(_) => Ok(true),
                    Err(e) => {
                        let service_err = e.into_service_error();
                        if service_err.is_not_found() {
                            Ok(false)
                        } else {
                            Err(IngestError::Storage(format!("head failed: {}", service_err)))
                        }
                    },
                }
            })
            .await?;

        if !existed {
            return Ok(false);
        }

        self.bounded("delete", async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(file_id)
                .send()
                .await
                .map_err(|e| IngestError::Storage(format!("delete failed: {}", e)))
        })
        .await?;

        info!(key = %file_id, "raw artifact deleted");
        Ok(true)
    }
}
