//! S3 durable tier.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use std::sync::Arc;
use tracing::{debug, info};

use crate::store::error::{StoreError, StoreResult};
use crate::store::traits::OutputStore;

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub prefix: String,
    pub endpoint: Option<String>,
}

pub struct S3OutputStore {
    client: Arc<Client>,
    config: S3Config,
}

impl S3OutputStore {
    pub async fn new(config: S3Config) -> StoreResult<Self> {
        info!("initializing S3 output store for bucket {}", config.bucket);

        let aws_config = if let Some(ref endpoint) = config.endpoint {
            aws_config::from_env().endpoint_url(endpoint).load().await
        } else {
            aws_config::load_from_env().await
        };
        let client = Client::new(&aws_config);

        client
            .head_bucket()
            .bucket(&config.bucket)
            .send()
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("failed to access S3 bucket: {e}")))?;

        Ok(Self {
            client: Arc::new(client),
            config,
        })
    }

    fn object_key(&self, key: &str) -> String {
        if self.config.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.config.prefix, key)
        }
    }
}

#[async_trait]
impl OutputStore for S3OutputStore {
    async fn read(&self, key: &str) -> StoreResult<Option<Vec<String>>> {
        let object_key = self.object_key(key);
        debug!("reading transcript from s3://{}/{object_key}", self.config.bucket);

        match self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(result) => {
                let bytes = result
                    .body
                    .collect()
                    .await
                    .map_err(|e| StoreError::Backend(anyhow::anyhow!("failed to read object body: {e}")))?
                    .into_bytes();
                let content = String::from_utf8_lossy(&bytes);
                let lines = if content.is_empty() {
                    Vec::new()
                } else {
                    content.split('\n').map(str::to_string).collect()
                };
                Ok(Some(lines))
            }
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    Ok(None)
                } else {
                    Err(StoreError::Backend(anyhow::anyhow!("failed to read object: {err}")))
                }
            }
        }
    }

    async fn write(&self, key: &str, lines: &[String]) -> StoreResult<bool> {
        let object_key = self.object_key(key);
        debug!(
            "persisting {} lines to s3://{}/{object_key}",
            lines.len(),
            self.config.bucket
        );

        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .body(lines.join("\n").into_bytes().into())
            .send()
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("failed to persist transcript: {e}")))?;

        Ok(true)
    }
}
