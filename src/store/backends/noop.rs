//! No-op durable tier for deployments without persistent storage. Nothing
//! is ever persisted, so completed jobs stay in the volatile tier until the
//! process restarts.

use async_trait::async_trait;

use crate::store::error::StoreResult;
use crate::store::traits::OutputStore;

#[derive(Default)]
pub struct NoopOutputStore;

impl NoopOutputStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OutputStore for NoopOutputStore {
    async fn read(&self, _key: &str) -> StoreResult<Option<Vec<String>>> {
        Ok(None)
    }

    async fn write(&self, _key: &str, _lines: &[String]) -> StoreResult<bool> {
        Ok(false)
    }
}
