use crate::embeddings::Embedder;
use crate::error::{GenerationError, PipelineError};
use crate::index::VectorIndex;
use crate::models::ScoredChunk;
use crate::traits::{GenerationParams, TextGenerator};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_TOP_K: usize = 5;
const CONTEXT_SEPARATOR: &str = "\n\n";

pub fn build_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .map(|chunk| chunk.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

pub fn build_prompt(context: &str, query: &str) -> String {
    format!(
        r#"
You are a claim processing assistant. Use ONLY the provided context to answer.
If the answer is not in the context, say "Not specified in the document".

Context:
{context}

Query:
{query}

Respond in **valid JSON** with:
- Decision: Approval, Denial, Conditional, or Not specified
- Amount: Number or range, or null if not specified
- Justification: Short reason referencing the clause
"#
    )
}

/// Raw model output plus the chunks that were put in front of the model.
#[derive(Debug, Clone)]
pub struct RawAnswer {
    pub output: String,
    pub context: Vec<ScoredChunk>,
    pub generation: u64,
}

pub struct Answerer {
    generator: Arc<dyn TextGenerator>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
    params: GenerationParams,
}

impl Answerer {
    pub fn new(generator: Arc<dyn TextGenerator>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            generator,
            embedder,
            top_k: DEFAULT_TOP_K,
            params: GenerationParams::default(),
        }
    }

    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// Retrieves context from `index`, prompts the model once and returns its text verbatim.
    pub async fn answer(&self, query: &str, index: &VectorIndex) -> Result<RawAnswer, PipelineError> {
        let context = index.search(self.embedder.as_ref(), query, self.top_k)?;
        let prompt = build_prompt(&build_context(&context), query);

        debug!(
            generation = index.generation(),
            retrieved = context.len(),
            generator = self.generator.name(),
            "prompting model"
        );

        let output = self.generate(&prompt).await?;
        Ok(RawAnswer {
            output,
            context,
            generation: index.generation(),
        })
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.generator.generate(prompt, self.params).await
    }
}
