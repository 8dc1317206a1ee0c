pub mod answerer;
pub mod chunking;
pub mod decoder;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod stores;
pub mod traits;

pub use answerer::{build_context, build_prompt, Answerer, RawAnswer, DEFAULT_TOP_K};
pub use chunking::{chunk_text, ChunkingConfig, DEFAULT_STRIDE_CHARS, DEFAULT_WINDOW_CHARS};
pub use decoder::{decode, Amount, DecodedAnswer, Decision, StructuredAnswer};
pub use embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{GenerationError, IngestError, PipelineError, SearchError};
pub use extractor::{
    extract_format, extract_text, extractor_for, DocxExtractor, LopdfExtractor, PageText,
    TextExtractor,
};
pub use generation::{CohereGenerator, GenerationConfig, DEFAULT_COHERE_ENDPOINT, DEFAULT_COHERE_MODEL};
pub use index::{IndexManifest, IndexedChunk, VectorIndex};
pub use ingest::{
    document_from_upload, prepare_chunks, Downloader, DEFAULT_DOWNLOAD_TIMEOUT,
    DEFAULT_MAX_DOCUMENT_BYTES,
};
pub use models::{DocumentFormat, IngestionSummary, ScoredChunk, SourceDocument};
pub use orchestrator::{
    AnswerReport, BatchResult, QaCoordinator, QuestionOutcome, DEFAULT_QUESTION_CONCURRENCY,
};
pub use stores::{FsIndexStore, MemoryIndexStore, DEFAULT_RETAINED_GENERATIONS};
pub use traits::{GenerationParams, IndexStore, TextGenerator};
