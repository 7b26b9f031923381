//! Hybrid retrieval: weighted merge of keyword (BM25) and vector results.
//!
//! Each sub-index contributes its top-k candidates; scores are normalized
//! per source and blended with configurable weights. This stage never
//! fails a request: no matches is an empty result, and a failed question
//! embedding degrades to keyword-only retrieval.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::index::DocumentIndex;
use crate::types::ScoredChunk;

/// Hybrid retriever over a built document index.
pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, config: RetrievalConfig) -> Self {
        Self { embedder, config }
    }

    /// Retrieve candidate chunks for a question, best first.
    ///
    /// Duplicates across the two sub-indexes are merged, keeping the
    /// combined weighted score; ties are broken by chunk insertion order.
    pub async fn retrieve(&self, index: &DocumentIndex, question: &str) -> Vec<ScoredChunk> {
        if index.is_empty() {
            return Vec::new();
        }

        let keyword_hits = index.keyword_search(question, self.config.keyword_k);

        let vector_hits = match self.embedder.embed_batch(&[question.to_string()]).await {
            Ok(mut vecs) if !vecs.is_empty() => {
                index.vector_search(&vecs.remove(0), self.config.vector_k)
            }
            Ok(_) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Question embedding failed; keyword-only retrieval");
                Vec::new()
            }
        };

        merge(
            &keyword_hits,
            &vector_hits,
            self.config.keyword_weight,
            self.config.vector_weight,
        )
    }
}

/// Blend two scored lists into one, normalizing each by its own maximum.
fn merge(
    keyword_hits: &[ScoredChunk],
    vector_hits: &[ScoredChunk],
    keyword_weight: f32,
    vector_weight: f32,
) -> Vec<ScoredChunk> {
    let mut combined: HashMap<usize, f32> = HashMap::new();

    let keyword_max = max_score(keyword_hits);
    for hit in keyword_hits {
        let normalized = if keyword_max > 0.0 {
            hit.score / keyword_max
        } else {
            0.0
        };
        *combined.entry(hit.id).or_insert(0.0) += keyword_weight * normalized;
    }

    let vector_max = max_score(vector_hits);
    for hit in vector_hits {
        let normalized = if vector_max > 0.0 {
            hit.score / vector_max
        } else {
            0.0
        };
        *combined.entry(hit.id).or_insert(0.0) += vector_weight * normalized;
    }

    let mut merged: Vec<ScoredChunk> = combined
        .into_iter()
        .map(|(id, score)| ScoredChunk { id, score })
        .collect();
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    merged
}

fn max_score(hits: &[ScoredChunk]) -> f32 {
    hits.iter().map(|h| h.score).fold(0.0, f32::max)
}
