//! In-memory vector index over one document's chunks.
//!
//! An index is immutable once built. Replacing the document means building a new index and
//! publishing it as the next generation through an [`IndexStore`](crate::traits::IndexStore).

use crate::embeddings::{cosine_similarity, Embedder};
use crate::error::{IngestError, SearchError};
use crate::models::ScoredChunk;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    /// Zero until the index is persisted; stores assign monotonically increasing numbers.
    pub generation: u64,
    pub model_id: String,
    pub dimensions: usize,
    pub content_hash: String,
    pub document_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedChunk {
    pub position: usize,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorIndex {
    pub manifest: IndexManifest,
    pub entries: Vec<IndexedChunk>,
}

impl VectorIndex {
    /// Embeds every chunk in order. An empty chunk list is `EmptyCorpus`.
    pub fn build(chunks: &[String], embedder: &dyn Embedder) -> Result<Self, IngestError> {
        if chunks.is_empty() {
            return Err(IngestError::EmptyCorpus);
        }

        let entries = chunks
            .iter()
            .enumerate()
            .map(|(position, text)| IndexedChunk {
                position,
                text: text.clone(),
                embedding: embedder.embed(text),
            })
            .collect::<Vec<_>>();

        Ok(Self {
            manifest: IndexManifest {
                generation: 0,
                model_id: embedder.model_id(),
                dimensions: embedder.dimensions(),
                content_hash: content_hash(chunks),
                document_name: None,
                created_at: Utc::now(),
            },
            entries,
        })
    }

    #[must_use]
    pub fn with_document_name(mut self, name: impl Into<String>) -> Self {
        self.manifest.document_name = Some(name.into());
        self
    }

    pub fn generation(&self) -> u64 {
        self.manifest.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embeds `query` and returns up to `k` chunks, best first. Equal scores keep document order.
    pub fn search(
        &self,
        embedder: &dyn Embedder,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, SearchError> {
        self.check_embedder(embedder)?;
        let query_vector = embedder.embed(query);
        self.search_vector(&query_vector, k)
    }

    pub fn search_vector(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, SearchError> {
        if query_vector.len() != self.manifest.dimensions {
            return Err(SearchError::DimensionMismatch {
                expected: self.manifest.dimensions,
                actual: query_vector.len(),
            });
        }

        let mut scored = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity(query_vector, &entry.embedding), entry))
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| {
            right
                .0
                .partial_cmp(&left.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| left.1.position.cmp(&right.1.position))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, entry)| ScoredChunk {
                position: entry.position,
                text: entry.text.clone(),
                score,
            })
            .collect())
    }

    fn check_embedder(&self, embedder: &dyn Embedder) -> Result<(), SearchError> {
        let query_model = embedder.model_id();
        if query_model != self.manifest.model_id {
            return Err(SearchError::EmbedderMismatch {
                indexed: self.manifest.model_id.clone(),
                query: query_model,
            });
        }
        Ok(())
    }

    /// Structural checks run after deserialising a persisted index.
    pub fn verify(&self) -> Result<(), String> {
        if self.entries.is_empty() {
            return Err("index has no entries".to_string());
        }

        if let Some(entry) = self
            .entries
            .iter()
            .find(|entry| entry.embedding.len() != self.manifest.dimensions)
        {
            return Err(format!(
                "chunk {} has dimension {}, manifest says {}",
                entry.position,
                entry.embedding.len(),
                self.manifest.dimensions
            ));
        }

        let texts = self
            .entries
            .iter()
            .map(|entry| entry.text.clone())
            .collect::<Vec<_>>();
        if content_hash(&texts) != self.manifest.content_hash {
            return Err("content hash does not match chunk texts".to_string());
        }

        Ok(())
    }
}

pub fn content_hash(chunks: &[String]) -> String {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update((chunk.len() as u64).to_le_bytes());
        hasher.update(chunk.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;

    fn chunks() -> Vec<String> {
        vec![
            "Claim approved for $500 due to policy clause 4.2.".to_string(),
            "The grace period for premium payment is thirty days.".to_string(),
            "Pre-existing diseases are covered after a waiting period of 36 months.".to_string(),
        ]
    }

    #[test]
    fn build_rejects_empty_corpus() {
        let embedder = CharacterNgramEmbedder::default();
        let error = VectorIndex::build(&[], &embedder).expect_err("no chunks");
        assert!(matches!(error, IngestError::EmptyCorpus));
    }

    #[test]
    fn search_is_best_first_and_bounded_by_corpus_size() {
        let embedder = CharacterNgramEmbedder::default();
        let index = VectorIndex::build(&chunks(), &embedder).expect("index builds");

        let hits = index
            .search(&embedder, "grace period for premium payment", 5)
            .expect("search succeeds");

        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].position, 1);
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));

        let top_one = index
            .search(&embedder, "grace period", 1)
            .expect("search succeeds");
        assert_eq!(top_one.len(), 1);
    }

    #[test]
    fn repeated_queries_return_identical_ordering() {
        let embedder = CharacterNgramEmbedder::default();
        let index = VectorIndex::build(&chunks(), &embedder).expect("index builds");

        let first = index.search(&embedder, "claim amount", 3).expect("search");
        let second = index.search(&embedder, "claim amount", 3).expect("search");
        assert_eq!(first, second);
    }

    #[test]
    fn ties_keep_document_order() {
        let embedder = CharacterNgramEmbedder::default();
        let duplicated = vec!["same text".to_string(), "same text".to_string()];
        let index = VectorIndex::build(&duplicated, &embedder).expect("index builds");

        let hits = index.search(&embedder, "same text", 2).expect("search");
        assert_eq!(hits[0].position, 0);
        assert_eq!(hits[1].position, 1);
    }

    #[test]
    fn mismatched_embedder_is_rejected() {
        let index = VectorIndex::build(&chunks(), &CharacterNgramEmbedder::default())
            .expect("index builds");
        let other = CharacterNgramEmbedder { dimensions: 16 };

        assert!(matches!(
            index.search(&other, "claim", 3),
            Err(SearchError::EmbedderMismatch { .. })
        ));
        assert!(matches!(
            index.search_vector(&[0.0; 16], 3),
            Err(SearchError::DimensionMismatch { expected: 384, actual: 16 })
        ));
    }

    #[test]
    fn verify_detects_tampered_text() {
        let embedder = CharacterNgramEmbedder::default();
        let mut index = VectorIndex::build(&chunks(), &embedder).expect("index builds");
        assert!(index.verify().is_ok());

        index.entries[0].text.push_str(" (amended)");
        assert!(index.verify().is_err());
    }
}
