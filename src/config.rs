//! Service configuration, loaded from TOML with serde defaults, plus the
//! durable-backend factory.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::store::backends::{FileOutputStore, NoopOutputStore};
use crate::store::OutputStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub runner: RunnerConfig,
    pub filter: FilterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the subscription gateway binds to.
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 4141)),
        }
    }
}

/// Durable-tier backend selection. Picked once at construction, not per
/// call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    File,
    Noop,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendType,

    /// Base directory for the file backend.
    pub base_dir: PathBuf,

    /// S3 backend settings; required when `backend = "s3"`.
    pub s3: Option<S3Settings>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::File,
            base_dir: PathBuf::from(".planstream"),
            s3: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Settings {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Window between graceful termination and forceful kill on
    /// cancellation.
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,

    /// Capacity of the shared intake queue feeding the stream handler.
    pub intake_capacity: usize,

    /// Capacity of each viewer's delivery queue.
    pub receiver_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            grace_period: crate::subprocess::DEFAULT_GRACE_PERIOD,
            intake_capacity: 1024,
            receiver_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Lines matching any of these regexes are suppressed before storage
    /// and broadcast.
    pub patterns: Vec<String>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

/// Construct the configured durable tier.
pub async fn build_output_store(config: &StorageConfig) -> anyhow::Result<Arc<dyn OutputStore>> {
    match config.backend {
        BackendType::File => {
            tracing::info!("using file output store at {}", config.base_dir.display());
            Ok(Arc::new(FileOutputStore::new(config.base_dir.clone())))
        }
        BackendType::Noop => {
            tracing::info!("durable storage disabled, completed jobs are kept in memory only");
            Ok(Arc::new(NoopOutputStore::new()))
        }
        #[cfg(feature = "s3")]
        BackendType::S3 => {
            use crate::store::backends::{S3Config, S3OutputStore};
            let settings = config
                .s3
                .as_ref()
                .context("storage.s3 settings are required for the s3 backend")?;
            let store = S3OutputStore::new(S3Config {
                bucket: settings.bucket.clone(),
                prefix: settings.prefix.clone(),
                endpoint: settings.endpoint.clone(),
            })
            .await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "s3"))]
        BackendType::S3 => {
            anyhow::bail!("this build does not include the s3 storage backend (enable the `s3` feature)")
        }
    }
}
