use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{ShardClass, ShardExecutor, ShardHandler, ShardInfo, ShardRoster};

struct Entry {
    class: ShardClass,
    handler: Arc<dyn ShardHandler>,
}

#[derive(Default)]
pub struct ShardRegistry {
    shards: HashMap<String, Entry>,
}

impl ShardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        class: ShardClass,
        handler: Arc<dyn ShardHandler>,
    ) {
        self.shards.insert(name.into(), Entry { class, handler });
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ShardHandler>> {
        self.shards.get(name).map(|e| Arc::clone(&e.handler))
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

impl ShardRoster for ShardRegistry {
    fn list_shards(&self) -> Vec<ShardInfo> {
        let mut list: Vec<_> = self
            .shards
            .iter()
            .map(|(name, entry)| ShardInfo::new(name.clone(), entry.class))
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}

#[async_trait]
impl ShardExecutor for ShardRegistry {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        shard_type: &str,
        task: &str,
    ) -> anyhow::Result<String> {
        let handler = self
            .get(shard_type)
            .ok_or_else(|| anyhow::anyhow!("No shard registered for type '{}'", shard_type))?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => anyhow::bail!("shard '{}' cancelled", shard_type),
            output = handler.run(cancel, task) => output,
        }
    }

    fn can_execute(&self, shard_type: &str) -> bool {
        self.shards.contains_key(shard_type)
    }
}
