//! Document indexing: vector embeddings plus a BM25 keyword index over the
//! same chunk set.
//!
//! The keyword side is an in-RAM tantivy index; the vector side is a plain
//! embedding table queried by brute-force cosine similarity, which is fast
//! enough for the chunk counts a single document produces.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, INDEXED, STORED, Schema, TEXT, Value};
use tantivy::{Index, IndexReader, TantivyDocument, doc};

use crate::config::RetryConfig;
use crate::embedding::Embedder;
use crate::error::IndexError;
use crate::providers::with_retry;
use crate::types::{Chunk, ScoredChunk};

/// BM25 keyword index over chunk text.
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    id_field: Field,
    content_field: Field,
}

impl KeywordIndex {
    /// Build an in-RAM index over the given chunks.
    pub fn build(chunks: &[Chunk]) -> Result<Self, IndexError> {
        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_u64_field("id", INDEXED | STORED);
        let content_field = schema_builder.add_text_field("content", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let mut writer: tantivy::IndexWriter = index
            .writer(15_000_000)
            .map_err(|e| IndexError::Keyword {
                message: format!("Failed to create writer: {e}"),
            })?;

        for chunk in chunks {
            writer
                .add_document(doc!(
                    id_field => chunk.id as u64,
                    content_field => chunk.text.as_str(),
                ))
                .map_err(|e| IndexError::Keyword {
                    message: format!("Failed to add document: {e}"),
                })?;
        }
        writer.commit().map_err(|e| IndexError::Keyword {
            message: format!("Failed to commit: {e}"),
        })?;

        let reader = index.reader().map_err(|e| IndexError::Keyword {
            message: format!("Failed to create reader: {e}"),
        })?;

        Ok(Self {
            index,
            reader,
            id_field,
            content_field,
        })
    }

    /// Top-`k` BM25 matches for a free-text question.
    ///
    /// The question is reduced to its alphanumeric terms before parsing so
    /// arbitrary user text can never produce a query syntax error. "No
    /// matches" is an empty result, never an error.
    pub fn search(&self, question: &str, k: usize) -> Vec<ScoredChunk> {
        let sanitized = sanitize_query(question);
        if sanitized.is_empty() || k == 0 {
            return Vec::new();
        }

        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.content_field]);
        let query = match parser.parse_query(&sanitized) {
            Ok(q) => q,
            Err(e) => {
                tracing::warn!(error = %e, "Keyword query parse failed; returning no matches");
                return Vec::new();
            }
        };

        let top_docs = match searcher.search(&query, &TopDocs::with_limit(k)) {
            Ok(docs) => docs,
            Err(e) => {
                tracing::warn!(error = %e, "Keyword search failed; returning no matches");
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let Ok(stored) = searcher.doc::<TantivyDocument>(address) else {
                continue;
            };
            if let Some(id) = stored.get_first(self.id_field).and_then(|v| v.as_u64()) {
                results.push(ScoredChunk {
                    id: id as usize,
                    score,
                });
            }
        }
        results
    }
}

/// Strip everything but alphanumeric terms out of a question.
fn sanitize_query(question: &str) -> String {
    question
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// The built index for one document: chunks, their embeddings, and the
/// keyword index, all referencing the same deduplicated chunk set.
///
/// Immutable after construction; the engine shares it out behind an `Arc`.
pub struct DocumentIndex {
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
    keyword: KeywordIndex,
}

impl std::fmt::Debug for DocumentIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentIndex")
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

impl DocumentIndex {
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk(&self, id: usize) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Top-`k` chunks by cosine similarity to the query vector.
    pub fn vector_search(&self, query_vec: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<ScoredChunk> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(id, vec)| ScoredChunk {
                id,
                score: cosine_similarity(query_vec, vec),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        scored.truncate(k);
        scored
    }

    /// Top-`k` chunks by BM25 keyword score.
    pub fn keyword_search(&self, question: &str, k: usize) -> Vec<ScoredChunk> {
        self.keyword.search(question, k)
    }

    #[cfg(test)]
    pub(crate) fn empty() -> Self {
        Self {
            chunks: Vec::new(),
            vectors: Vec::new(),
            keyword: KeywordIndex::build(&[]).expect("empty keyword index"),
        }
    }
}

/// Builds a `DocumentIndex` from chunks: dedup, embed (with retries), and
/// keyword-index.
pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    retry: RetryConfig,
    batch_size: usize,
}

impl Indexer {
    pub fn new(embedder: Arc<dyn Embedder>, retry: RetryConfig, batch_size: usize) -> Self {
        Self {
            embedder,
            retry,
            batch_size: batch_size.max(1),
        }
    }

    /// Build the index for one document.
    ///
    /// Embedding-service errors are retried with backoff; exhausting the
    /// retries fails the whole document-processing step.
    pub async fn build(&self, chunks: Vec<Chunk>) -> Result<DocumentIndex, IndexError> {
        let deduped = dedupe_chunks(chunks);
        tracing::debug!(chunks = deduped.len(), "Building document index");

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(deduped.len());
        for batch in deduped.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = with_retry(&self.retry, || self.embedder.embed_batch(&texts))
                .await
                .map_err(|e| IndexError::Embedding {
                    message: e.to_string(),
                })?;
            if embeddings.len() != texts.len() {
                return Err(IndexError::Embedding {
                    message: format!(
                        "Embedder returned {} vectors for {} texts",
                        embeddings.len(),
                        texts.len()
                    ),
                });
            }
            vectors.extend(embeddings);
        }

        let keyword = KeywordIndex::build(&deduped)?;

        Ok(DocumentIndex {
            chunks: deduped,
            vectors,
            keyword,
        })
    }
}

/// Drop chunks with identical normalized content, keeping the first
/// occurrence, then renumber ids to match index positions.
fn dedupe_chunks(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<Chunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let normalized = chunk
            .text
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let digest: [u8; 32] = Sha256::digest(normalized.as_bytes()).into();
        if seen.insert(digest) {
            let id = out.len();
            out.push(Chunk { id, ..chunk });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;

    fn chunk(id: usize, text: &str) -> Chunk {
        Chunk {
            id,
            text: text.to_string(),
            start: 0,
            end: text.len(),
        }
    }

    fn indexer() -> Indexer {
        Indexer::new(
            Arc::new(HashEmbedder::new(64)),
            RetryConfig {
                jitter: false,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
                ..Default::default()
            },
            8,
        )
    }

    #[test]
    fn test_cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_dedupe_keeps_first_and_renumbers() {
        let chunks = vec![
            chunk(0, "The grace period is 30 days."),
            chunk(1, "the   GRACE period is 30 days."),
            chunk(2, "Something else entirely."),
        ];
        let deduped = dedupe_chunks(chunks);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].text, "The grace period is 30 days.");
        assert_eq!(deduped[0].id, 0);
        assert_eq!(deduped[1].id, 1);
        assert_eq!(deduped[1].text, "Something else entirely.");
    }

    #[tokio::test]
    async fn test_build_index_and_keyword_search() {
        let chunks = vec![
            chunk(0, "The grace period for premium payment is 30 days."),
            chunk(1, "Room rent is capped at one percent of the sum insured."),
            chunk(2, "Organ donor expenses are covered up to the policy limit."),
        ];
        let index = indexer().build(chunks).await.unwrap();
        assert_eq!(index.len(), 3);

        let hits = index.keyword_search("What is the grace period?", 5);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].id, 0);
    }

    #[tokio::test]
    async fn test_keyword_search_no_match_is_empty_not_error() {
        let chunks = vec![chunk(0, "The grace period is 30 days.")];
        let index = indexer().build(chunks).await.unwrap();
        let hits = index.keyword_search("zebra quantum syzygy", 5);
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_keyword_search_handles_query_syntax() {
        let chunks = vec![chunk(0, "Coverage includes accidental damage.")];
        let index = indexer().build(chunks).await.unwrap();
        // Characters that are operators in the query grammar must not error.
        let hits = index.keyword_search("coverage AND (damage:* OR \"unclosed", 5);
        assert!(!hits.is_empty());
    }

    #[tokio::test]
    async fn test_vector_search_ranks_similar_first() {
        let chunks = vec![
            chunk(0, "The grace period for premium payment is 30 days."),
            chunk(1, "Maternity benefits require 24 months of coverage."),
        ];
        let embedder = HashEmbedder::new(64);
        let index = indexer().build(chunks).await.unwrap();

        let q = embedder.embed("grace period premium payment");
        let hits = index.vector_search(&q, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 0);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_build_empty_chunks() {
        let index = indexer().build(Vec::new()).await.unwrap();
        assert!(index.is_empty());
        assert!(index.keyword_search("anything", 5).is_empty());
        assert!(index.vector_search(&[0.0; 64], 5).is_empty());
    }

    #[tokio::test]
    async fn test_build_fails_when_embedder_always_errors() {
        struct FailingEmbedder;

        #[async_trait::async_trait]
        impl Embedder for FailingEmbedder {
            async fn embed_batch(
                &self,
                _texts: &[String],
            ) -> Result<Vec<Vec<f32>>, crate::error::LlmError> {
                Err(crate::error::LlmError::Connection {
                    message: "embedding service down".to_string(),
                })
            }
            fn dimensions(&self) -> usize {
                64
            }
            fn provider_name(&self) -> &str {
                "failing"
            }
        }

        let indexer = Indexer::new(
            Arc::new(FailingEmbedder),
            RetryConfig {
                max_retries: 1,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
                jitter: false,
                ..Default::default()
            },
            8,
        );
        let result = indexer.build(vec![chunk(0, "some text")]).await;
        assert!(matches!(result, Err(IndexError::Embedding { .. })));
    }

    #[test]
    fn test_sanitize_query() {
        assert_eq!(
            sanitize_query("What is the \"grace period\" (in days)?"),
            "What is the grace period in days"
        );
        assert_eq!(sanitize_query("???"), "");
    }
}
