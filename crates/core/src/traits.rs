use crate::error::{GenerationError, SearchError};
use crate::index::VectorIndex;
use async_trait::async_trait;

/// Durable home for index generations.
///
/// `persist` assigns the next generation number and makes it current in one step from a
/// reader's point of view: `load_current` returns either the previous generation or the new
/// one, never a partially written index.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn persist(&self, index: &VectorIndex) -> Result<u64, SearchError>;

    async fn load_current(&self) -> Result<VectorIndex, SearchError>;

    async fn load_generation(&self, generation: u64) -> Result<VectorIndex, SearchError>;

    async fn current_generation(&self) -> Result<Option<u64>, SearchError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 300,
            temperature: 0.2,
        }
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<String, GenerationError>;
}
