//! Second-pass relevance scoring of retrieved candidates.
//!
//! An LLM judge assigns each candidate a 1-10 relevance score; the top-k
//! survive. The judge call is a single point of failure, so a
//! deterministic keyword-overlap fallback is mandatory: a malformed score
//! set, a wrong count, or any provider error degrades to the heuristic
//! instead of failing the request.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::RerankConfig;
use crate::providers::LlmProvider;
use crate::types::{ChatMessage, Chunk, CompletionRequest, TokenUsage};

/// LLM-backed reranker with a heuristic fallback.
pub struct LlmReranker {
    provider: Arc<dyn LlmProvider>,
    config: RerankConfig,
}

impl LlmReranker {
    pub fn new(provider: Arc<dyn LlmProvider>, config: RerankConfig) -> Self {
        Self { provider, config }
    }

    /// Re-score candidates against the question and keep the best `top_k`.
    ///
    /// Candidate sets already within `top_k` pass through unchanged.
    pub async fn rerank(&self, question: &str, candidates: Vec<Chunk>) -> (Vec<Chunk>, TokenUsage) {
        if candidates.len() <= self.config.top_k {
            return (candidates, TokenUsage::default());
        }

        let prompt = self.score_prompt(question, &candidates);
        let request = CompletionRequest {
            messages: vec![ChatMessage::user(prompt)],
            temperature: 0.0,
            max_tokens: Some(self.config.max_tokens),
            model: None,
        };

        match self.provider.complete(request).await {
            Ok(response) => {
                let usage = response.usage;
                match extract_scores(&response.text, candidates.len()) {
                    Some(scores) => (self.take_top(candidates, &scores), usage),
                    None => {
                        tracing::warn!(
                            "Could not extract a valid score set; using keyword-overlap fallback"
                        );
                        (
                            fallback_rerank(question, candidates, self.config.top_k),
                            usage,
                        )
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Rerank call failed; using keyword-overlap fallback");
                (
                    fallback_rerank(question, candidates, self.config.top_k),
                    TokenUsage::default(),
                )
            }
        }
    }

    fn score_prompt(&self, question: &str, candidates: &[Chunk]) -> String {
        let mut prompt = format!(
            "Rate the relevance of each text chunk to the query on a scale of 1-10 \
             (10 = most relevant).\n\nQuery: \"{question}\"\n\nChunks:\n"
        );
        for (i, chunk) in candidates.iter().enumerate() {
            let snippet: String = chunk.text.chars().take(self.config.snippet_len).collect();
            prompt.push_str(&format!("{}. {snippet}...\n", i + 1));
        }
        prompt.push_str("\nReturn ONLY a JSON array of scores: [score1,score2,...]");
        prompt
    }

    fn take_top(&self, candidates: Vec<Chunk>, scores: &[u32]) -> Vec<Chunk> {
        let mut pairs: Vec<(Chunk, u32)> = candidates.into_iter().zip(scores.iter().copied()).collect();
        // Stable sort: equal scores keep retrieval order.
        pairs.sort_by(|a, b| b.1.cmp(&a.1));
        pairs.truncate(self.config.top_k);
        pairs.into_iter().map(|(chunk, _)| chunk).collect()
    }
}

/// Extract an integer score list from the model's reply.
///
/// Tries a JSON array first, then a loose scan for standalone 1-10
/// numbers. Returns `None` unless exactly `expected` usable scores come
/// back; out-of-range JSON entries are clamped to a neutral 5.
fn extract_scores(response: &str, expected: usize) -> Option<Vec<u32>> {
    let array_re = regex::Regex::new(r"\[[\d,\s]+\]").expect("static regex");
    if let Some(m) = array_re.find(response)
        && let Ok(raw) = serde_json::from_str::<Vec<i64>>(m.as_str())
        && raw.len() == expected
    {
        return Some(
            raw.into_iter()
                .map(|s| if (1..=10).contains(&s) { s as u32 } else { 5 })
                .collect(),
        );
    }

    let number_re = regex::Regex::new(r"\b([1-9]|10)\b").expect("static regex");
    let numbers: Vec<u32> = number_re
        .find_iter(response)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    if numbers.len() >= expected {
        return Some(numbers.into_iter().take(expected).collect());
    }

    None
}

/// Deterministic keyword-overlap scoring, used when the LLM judge is
/// unavailable or returns garbage.
fn fallback_rerank(question: &str, candidates: Vec<Chunk>, top_k: usize) -> Vec<Chunk> {
    let query_terms: HashSet<String> = terms(question);
    if query_terms.is_empty() {
        let mut out = candidates;
        out.truncate(top_k);
        return out;
    }

    let mut scored: Vec<(Chunk, f32)> = candidates
        .into_iter()
        .map(|chunk| {
            let chunk_terms = terms(&chunk.text);
            let overlap = query_terms.intersection(&chunk_terms).count();
            let score = overlap as f32 / query_terms.len() as f32;
            (chunk, score)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    scored.into_iter().map(|(chunk, _)| chunk).collect()
}

fn terms(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}
