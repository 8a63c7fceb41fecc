use std::sync::Arc;
use crate::core::error::Result;
use crate::index::stats::IndexStats;
use crate::storage::layout::{atomic_write, StorageLayout};

/// Committed stats snapshot per index. Persisted by the worker after a
/// successful commit; loaded at engine startup.
pub struct StatsStore {
    layout: Arc<StorageLayout>,
}

impl StatsStore {
    pub fn new(layout: Arc<StorageLayout>) -> Self {
        StatsStore { layout }
    }

    pub async fn save(&self, index: &str, stats: &IndexStats) -> Result<()> {
        let bytes = bincode::serialize(stats)?;
        tokio::fs::create_dir_all(self.layout.index_dir(index)).await?;
        atomic_write(&self.layout.stats_path(index), &bytes).await
    }

    pub async fn load(&self, index: &str) -> Result<Option<IndexStats>> {
        let bytes = match tokio::fs::read(self.layout.stats_path(index)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(bincode::deserialize(&bytes)?))
    }
}
