use crate::answerer::Answerer;
use crate::chunking::ChunkingConfig;
use crate::decoder::{decode, DecodedAnswer};
use crate::embeddings::Embedder;
use crate::error::{IngestError, PipelineError, SearchError};
use crate::index::VectorIndex;
use crate::ingest::{
    prepare_chunks, Downloader, DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_MAX_DOCUMENT_BYTES,
};
use crate::models::{IngestionSummary, ScoredChunk, SourceDocument};
use crate::traits::{GenerationParams, IndexStore, TextGenerator};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

pub const DEFAULT_QUESTION_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct AnswerReport {
    pub question: String,
    pub answer: DecodedAnswer,
    pub raw_output: String,
    pub generation: u64,
    pub sources: Vec<ScoredChunk>,
}

#[derive(Debug)]
pub enum QuestionOutcome {
    Answered(AnswerReport),
    Failed {
        question: String,
        error: PipelineError,
    },
}

impl QuestionOutcome {
    pub fn question(&self) -> &str {
        match self {
            Self::Answered(report) => &report.question,
            Self::Failed { question, .. } => question,
        }
    }
}

#[derive(Debug)]
pub struct BatchResult {
    pub ingestion: IngestionSummary,
    pub outcomes: Vec<QuestionOutcome>,
}

/// Ingestion and query paths over one shared [`IndexStore`].
///
/// Every query works on an `Arc` snapshot of a single generation, so a concurrent ingestion
/// can replace the current generation without affecting answers already in flight.
pub struct QaCoordinator {
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn Embedder>,
    answerer: Answerer,
    downloader: Downloader,
    chunking: ChunkingConfig,
    question_concurrency: usize,
    current: RwLock<Option<Arc<VectorIndex>>>,
    publish_lock: Mutex<()>,
}

impl QaCoordinator {
    pub fn new(
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn TextGenerator>,
    ) -> Result<Self, IngestError> {
        Ok(Self {
            answerer: Answerer::new(generator, Arc::clone(&embedder)),
            store,
            embedder,
            downloader: Downloader::new(DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_MAX_DOCUMENT_BYTES)?,
            chunking: ChunkingConfig::default(),
            question_concurrency: DEFAULT_QUESTION_CONCURRENCY,
            current: RwLock::new(None),
            publish_lock: Mutex::new(()),
        })
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Result<Self, IngestError> {
        chunking.validate()?;
        self.chunking = chunking;
        Ok(self)
    }

    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.answerer = self.answerer.with_top_k(top_k);
        self
    }

    #[must_use]
    pub fn with_generation_params(mut self, params: GenerationParams) -> Self {
        self.answerer = self.answerer.with_params(params);
        self
    }

    #[must_use]
    pub fn with_question_concurrency(mut self, concurrency: usize) -> Self {
        self.question_concurrency = concurrency.max(1);
        self
    }

    pub fn with_download_limits(
        mut self,
        timeout: Duration,
        max_bytes: u64,
    ) -> Result<Self, IngestError> {
        self.downloader = Downloader::new(timeout, max_bytes)?;
        Ok(self)
    }

    pub async fn fetch(&self, url: &str) -> Result<SourceDocument, IngestError> {
        self.downloader.fetch(url).await
    }

    /// Extracts, chunks, embeds and publishes `document` as the next index generation.
    /// Nothing is published when any step fails.
    pub async fn ingest(
        &self,
        document: SourceDocument,
    ) -> Result<(IngestionSummary, Arc<VectorIndex>), PipelineError> {
        let chunking = self.chunking;
        let embedder = Arc::clone(&self.embedder);
        let name = document.name.clone();
        let format = document.format;

        let index = tokio::task::spawn_blocking(move || {
            let chunks = prepare_chunks(&document, chunking)?;
            Ok::<_, IngestError>(
                VectorIndex::build(&chunks, embedder.as_ref())?.with_document_name(&document.name),
            )
        })
        .await
        .map_err(|error| IngestError::Task(error.to_string()))??;

        let _guard = self.publish_lock.lock().await;
        let generation = self.store.persist(&index).await?;

        let mut published = index;
        published.manifest.generation = generation;
        let published = Arc::new(published);
        *self.current.write().await = Some(Arc::clone(&published));

        let summary = IngestionSummary {
            generation,
            document_name: name,
            format,
            chunk_count: published.len(),
            content_hash: published.manifest.content_hash.clone(),
            ingested_at: published.manifest.created_at,
        };
        info!(
            generation,
            document = %summary.document_name,
            chunks = summary.chunk_count,
            "document indexed"
        );

        Ok((summary, published))
    }

    /// The latest published generation, reloaded from the store when another writer has
    /// published since this coordinator last looked.
    pub async fn snapshot(&self) -> Result<Arc<VectorIndex>, PipelineError> {
        let latest = self
            .store
            .current_generation()
            .await?
            .ok_or(SearchError::IndexNotFound)?;

        if let Some(cached) = self.current.read().await.as_ref() {
            if cached.generation() == latest {
                return Ok(Arc::clone(cached));
            }
        }

        let loaded = Arc::new(self.store.load_current().await?);
        let mut current = self.current.write().await;
        let is_newer = current
            .as_ref()
            .map_or(true, |cached| cached.generation() < loaded.generation());
        if is_newer {
            *current = Some(Arc::clone(&loaded));
        }
        Ok(loaded)
    }

    pub async fn snapshot_at(&self, generation: u64) -> Result<Arc<VectorIndex>, PipelineError> {
        Ok(Arc::new(self.store.load_generation(generation).await?))
    }

    pub async fn current_generation(&self) -> Option<u64> {
        self.current.read().await.as_ref().map(|index| index.generation())
    }

    /// Generation the store currently points at, which may be newer than the cached one.
    pub async fn published_generation(&self) -> Result<Option<u64>, PipelineError> {
        Ok(self.store.current_generation().await?)
    }

    pub async fn answer_one(
        &self,
        index: &VectorIndex,
        question: &str,
    ) -> Result<AnswerReport, PipelineError> {
        let raw = self.answerer.answer(question, index).await?;
        let answer = decode(&raw.output);

        Ok(AnswerReport {
            question: question.to_string(),
            answer,
            raw_output: raw.output,
            generation: raw.generation,
            sources: raw.context,
        })
    }

    /// Answers against the current generation.
    pub async fn ask(&self, question: &str) -> Result<AnswerReport, PipelineError> {
        let index = self.snapshot().await?;
        self.answer_one(&index, question).await
    }

    /// Answers every question against the same snapshot, `question_concurrency` at a time.
    /// Outcomes keep input order and a failed question does not stop the others.
    pub async fn answer_all(
        &self,
        index: Arc<VectorIndex>,
        questions: &[String],
    ) -> Vec<QuestionOutcome> {
        stream::iter(questions.iter().cloned())
            .map(|question| {
                let index = Arc::clone(&index);
                async move {
                    match self.answer_one(&index, &question).await {
                        Ok(report) => QuestionOutcome::Answered(report),
                        Err(error) => {
                            warn!(question = %question, %error, "question failed");
                            QuestionOutcome::Failed { question, error }
                        }
                    }
                }
            })
            .buffered(self.question_concurrency)
            .collect()
            .await
    }

    /// Ingests `document` and answers `questions` against exactly the generation it produced.
    pub async fn ingest_and_answer(
        &self,
        document: SourceDocument,
        questions: &[String],
    ) -> Result<BatchResult, PipelineError> {
        let (ingestion, index) = self.ingest(document).await?;
        let outcomes = self.answer_all(index, questions).await;
        Ok(BatchResult {
            ingestion,
            outcomes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answerer::fakes::ScriptedGenerator;
    use crate::decoder::{Amount, Decision};
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::GenerationError;
    use crate::extractor::fixtures::docx_with_paragraphs;
    use crate::ingest::document_from_upload;
    use crate::stores::{FsIndexStore, MemoryIndexStore};
    use async_trait::async_trait;

    const APPROVAL: &str = r#"{"Decision":"Approval","Amount":500,"Justification":"Approved under policy clause 4.2."}"#;

    fn coordinator_with(generator: Arc<dyn TextGenerator>) -> QaCoordinator {
        QaCoordinator::new(
            Arc::new(MemoryIndexStore::new()),
            Arc::new(CharacterNgramEmbedder::default()),
            generator,
        )
        .expect("coordinator builds")
    }

    fn claim_docx() -> SourceDocument {
        let bytes = docx_with_paragraphs(&[
            "Claim approved for $500 due to policy clause 4.2.",
            "All other benefits follow the policy schedule.",
        ]);
        document_from_upload("claim.docx", bytes).expect("docx upload")
    }

    /// Fails on questions mentioning "fail", echoes a fixed answer otherwise.
    struct SelectiveGenerator;

    #[async_trait]
    impl TextGenerator for SelectiveGenerator {
        fn name(&self) -> &str {
            "selective"
        }

        async fn generate(
            &self,
            prompt: &str,
            _params: GenerationParams,
        ) -> Result<String, GenerationError> {
            if prompt.contains("Query:\nfail") {
                Err(GenerationError::EmptyResponse("selective".to_string()))
            } else {
                Ok(APPROVAL.to_string())
            }
        }
    }

    #[tokio::test]
    async fn ask_before_ingest_is_index_not_found() {
        let coordinator = coordinator_with(Arc::new(ScriptedGenerator::replying(APPROVAL)));
        let error = coordinator.ask("anything").await.expect_err("nothing indexed");
        assert!(matches!(
            error,
            PipelineError::Search(SearchError::IndexNotFound)
        ));
    }

    #[tokio::test]
    async fn docx_claim_is_answered_with_structured_decision() {
        let generator = Arc::new(ScriptedGenerator::replying(APPROVAL));
        let coordinator = coordinator_with(generator.clone());

        let (summary, _) = coordinator.ingest(claim_docx()).await.expect("ingest succeeds");
        assert_eq!(summary.generation, 1);
        assert_eq!(summary.chunk_count, 1);

        let report = coordinator
            .ask("What is the claim decision and amount?")
            .await
            .expect("answer succeeds");

        let answer = report.answer.structured().expect("structured answer");
        assert_eq!(answer.decision, Decision::Approval);
        assert_eq!(answer.amount, Some(Amount::Number(500.into())));
        assert!(answer
            .justification
            .as_deref()
            .is_some_and(|text| text.contains("clause 4.2")));
        assert!(report.sources[0].text.contains("Claim approved for $500"));

        let prompts = generator.prompts.lock().expect("prompt log");
        assert!(prompts[0].contains("policy clause 4.2"));
    }

    #[tokio::test]
    async fn empty_document_is_rejected_without_publishing() {
        let coordinator = coordinator_with(Arc::new(ScriptedGenerator::replying(APPROVAL)));
        let blank = document_from_upload("blank.docx", docx_with_paragraphs(&[])).expect("upload");

        let error = coordinator.ingest(blank).await.expect_err("empty corpus");
        assert!(matches!(
            error,
            PipelineError::Ingest(IngestError::EmptyCorpus)
        ));
        assert_eq!(coordinator.current_generation().await, None);
    }

    #[tokio::test]
    async fn malformed_document_is_a_parse_failure() {
        let coordinator = coordinator_with(Arc::new(ScriptedGenerator::replying(APPROVAL)));
        let broken = document_from_upload("broken.pdf", b"%PDF-1.4 nonsense".to_vec())
            .expect("upload");

        match coordinator.ingest(broken).await {
            Err(PipelineError::Ingest(error)) => assert!(error.is_parse_error()),
            other => panic!("expected parse failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn chunking_config_controls_chunk_count() {
        let coordinator = coordinator_with(Arc::new(ScriptedGenerator::replying(APPROVAL)))
            .with_chunking(ChunkingConfig {
                window: 40,
                stride: 30,
            })
            .expect("valid chunking");

        let (summary, index) = coordinator.ingest(claim_docx()).await.expect("ingest succeeds");
        assert!(summary.chunk_count > 1);
        assert!(index.entries.iter().all(|entry| entry.text.chars().count() <= 40));

        let rejected = coordinator_with(Arc::new(ScriptedGenerator::replying(APPROVAL)))
            .with_chunking(ChunkingConfig {
                window: 40,
                stride: 0,
            });
        assert!(matches!(rejected, Err(IngestError::InvalidChunkConfig(_))));
    }

    #[tokio::test]
    async fn batch_isolates_failures_and_keeps_order() {
        let coordinator =
            coordinator_with(Arc::new(SelectiveGenerator)).with_question_concurrency(2);
        let questions = vec![
            "What is the amount?".to_string(),
            "fail this one".to_string(),
            "Is it approved?".to_string(),
        ];

        let batch = coordinator
            .ingest_and_answer(claim_docx(), &questions)
            .await
            .expect("batch runs");

        assert_eq!(batch.outcomes.len(), 3);
        for (outcome, question) in batch.outcomes.iter().zip(&questions) {
            assert_eq!(outcome.question(), question);
        }
        assert!(matches!(batch.outcomes[0], QuestionOutcome::Answered(_)));
        assert!(matches!(
            batch.outcomes[1],
            QuestionOutcome::Failed {
                error: PipelineError::Generation(_),
                ..
            }
        ));
        assert!(matches!(batch.outcomes[2], QuestionOutcome::Answered(_)));
    }

    #[tokio::test]
    async fn in_flight_snapshot_survives_replacement() {
        let coordinator = coordinator_with(Arc::new(ScriptedGenerator::replying(APPROVAL)));
        let (_, first) = coordinator.ingest(claim_docx()).await.expect("first ingest");

        let replacement = document_from_upload(
            "other.docx",
            docx_with_paragraphs(&["A completely different policy about travel insurance."]),
        )
        .expect("upload");
        coordinator.ingest(replacement).await.expect("second ingest");

        let report = coordinator
            .answer_one(&first, "claim amount")
            .await
            .expect("answer succeeds");
        assert_eq!(report.generation, 1);
        assert!(report.sources[0].text.contains("$500"));

        let latest = coordinator.snapshot().await.expect("snapshot");
        assert_eq!(latest.generation(), 2);
        assert!(latest.entries[0].text.contains("travel insurance"));
    }

    #[tokio::test]
    async fn snapshot_follows_generations_published_by_another_coordinator(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let reader = QaCoordinator::new(
            Arc::new(FsIndexStore::new(dir.path())),
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(ScriptedGenerator::replying(APPROVAL)),
        )?;
        let writer = QaCoordinator::new(
            Arc::new(FsIndexStore::new(dir.path())),
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(ScriptedGenerator::replying(APPROVAL)),
        )?;

        writer.ingest(claim_docx()).await?;
        assert_eq!(reader.snapshot().await?.generation(), 1);

        writer.ingest(claim_docx()).await?;
        assert_eq!(reader.snapshot().await?.generation(), 2);
        assert_eq!(reader.snapshot_at(1).await?.generation(), 1);
        Ok(())
    }
}
