//! File-based durable tier. Transcripts live under a base directory at
//! their key path, e.g. `<base>/output/<job_id>`.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

use crate::store::error::StoreResult;
use crate::store::traits::OutputStore;

pub struct FileOutputStore {
    base_dir: PathBuf,
}

impl FileOutputStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }
}

#[async_trait]
impl OutputStore for FileOutputStore {
    async fn read(&self, key: &str) -> StoreResult<Option<Vec<String>>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path).await {
            Ok(content) => {
                let lines = if content.is_empty() {
                    Vec::new()
                } else {
                    content.split('\n').map(str::to_string).collect()
                };
                Ok(Some(lines))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, lines: &[String]) -> StoreResult<bool> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, lines.join("\n")).await?;
        tracing::debug!("persisted {} lines to {}", lines.len(), path.display());
        Ok(true)
    }
}
