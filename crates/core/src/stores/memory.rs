//! In-memory index store for tests and throwaway sessions.
//!
//! Generations are kept in a map behind an async lock, so publishing a generation and moving
//! the current pointer happen under one write guard.

use crate::error::SearchError;
use crate::index::VectorIndex;
use crate::traits::IndexStore;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Generations {
    current: Option<u64>,
    indexes: BTreeMap<u64, VectorIndex>,
}

#[derive(Default)]
pub struct MemoryIndexStore {
    state: RwLock<Generations>,
}

impl MemoryIndexStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn persist(&self, index: &VectorIndex) -> Result<u64, SearchError> {
        let mut state = self.state.write().await;
        let generation = state.current.unwrap_or(0) + 1;

        let mut snapshot = index.clone();
        snapshot.manifest.generation = generation;
        state.indexes.insert(generation, snapshot);
        state.current = Some(generation);

        debug!(generation, "stored index generation in memory");
        Ok(generation)
    }

    async fn load_current(&self) -> Result<VectorIndex, SearchError> {
        let state = self.state.read().await;
        let generation = state.current.ok_or(SearchError::IndexNotFound)?;
        state
            .indexes
            .get(&generation)
            .cloned()
            .ok_or(SearchError::GenerationNotFound(generation))
    }

    async fn load_generation(&self, generation: u64) -> Result<VectorIndex, SearchError> {
        self.state
            .read()
            .await
            .indexes
            .get(&generation)
            .cloned()
            .ok_or(SearchError::GenerationNotFound(generation))
    }

    async fn current_generation(&self) -> Result<Option<u64>, SearchError> {
        Ok(self.state.read().await.current)
    }
}
