//! Answer generation from retrieved context.
//!
//! Builds a prompt from the top-k chunks and the question, calls the
//! chat-completion model at low temperature, and returns the answer with
//! its token usage. A failed call yields a fixed fallback answer and
//! zeroed usage; a single question's failure never aborts the batch.

use std::sync::Arc;

use tiktoken_rs::CoreBPE;

use crate::config::GenerationConfig;
use crate::providers::LlmProvider;
use crate::types::{ChatMessage, Chunk, CompletionRequest, QuestionKind, TokenUsage};

/// Returned when the context does not contain the answer, or when no
/// context was retrieved at all.
pub const NOT_AVAILABLE_ANSWER: &str =
    "The information is not available in the provided context.";

/// Returned for questions unrelated to the document.
pub const OUT_OF_DOMAIN_ANSWER: &str =
    "This question is not related to the provided document, so I cannot answer it.";

/// Returned when the model call itself fails.
pub const GENERATION_FAILED_ANSWER: &str =
    "Sorry, there was an error communicating with the language model.";

/// Separator between chunks in the context block.
const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

fn bpe() -> Option<&'static CoreBPE> {
    static BPE: std::sync::OnceLock<Option<CoreBPE>> = std::sync::OnceLock::new();
    BPE.get_or_init(|| tiktoken_rs::o200k_base().ok()).as_ref()
}

/// Estimate the token count of a text.
fn estimate_tokens(text: &str) -> usize {
    match bpe() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        // Rough character heuristic if the encoder failed to load.
        None => text.chars().count() / 4,
    }
}

/// Generates answers from context chunks.
pub struct AnswerGenerator {
    provider: Arc<dyn LlmProvider>,
    config: GenerationConfig,
}

impl AnswerGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, config: GenerationConfig) -> Self {
        Self { provider, config }
    }

    /// Generate an answer for `question` from `chunks`.
    ///
    /// Empty context short-circuits to the fixed not-available answer, and
    /// clearly out-of-domain questions to the fixed decline, without
    /// spending a model call.
    pub async fn generate(&self, question: &str, chunks: &[Chunk]) -> (String, TokenUsage) {
        if chunks.is_empty() {
            tracing::debug!("No context retrieved; returning not-available answer");
            return (NOT_AVAILABLE_ANSWER.to_string(), TokenUsage::default());
        }

        let kind = QuestionKind::classify(question);
        if kind == QuestionKind::OutOfDomain {
            tracing::debug!(question, "Question classified out of domain");
            return (OUT_OF_DOMAIN_ANSWER.to_string(), TokenUsage::default());
        }

        let context = self.build_context(chunks);
        let prompt = build_prompt(kind, &context, question);

        let request = CompletionRequest {
            messages: vec![ChatMessage::user(prompt)],
            temperature: self.config.temperature,
            max_tokens: Some(self.config.max_tokens),
            model: None,
        };

        match self.provider.complete(request).await {
            Ok(response) => {
                tracing::debug!(
                    prompt_tokens = response.usage.prompt_tokens,
                    completion_tokens = response.usage.completion_tokens,
                    "Received generated answer"
                );
                (response.text.trim().to_string(), response.usage)
            }
            Err(e) => {
                tracing::error!(error = %e, question, "Answer generation failed");
                (GENERATION_FAILED_ANSWER.to_string(), TokenUsage::default())
            }
        }
    }

    /// Join chunks into a single context block, stopping at the token
    /// budget.
    fn build_context(&self, chunks: &[Chunk]) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(chunks.len());
        let mut tokens = 0usize;
        for chunk in chunks {
            let cost = estimate_tokens(&chunk.text);
            if !parts.is_empty() && tokens + cost > self.config.max_context_tokens {
                tracing::debug!(
                    kept = parts.len(),
                    dropped = chunks.len() - parts.len(),
                    "Context token budget reached"
                );
                break;
            }
            tokens += cost;
            parts.push(&chunk.text);
        }
        parts.join(CHUNK_SEPARATOR)
    }
}

/// Build the instruction prompt for a question kind.
fn build_prompt(kind: QuestionKind, context: &str, question: &str) -> String {
    let guidance = match kind {
        QuestionKind::Scenario => {
            "This is a scenario question: check the scenario against the conditions in the \
             context before giving a direct verdict.\n\n"
        }
        QuestionKind::Quantitative => {
            "This is a quantitative question: state the exact number, duration, or percentage \
             from the context, including its units.\n\n"
        }
        QuestionKind::Exclusion => {
            "This is an exclusion question: state clearly whether the item is excluded and \
             quote the applicable exclusion wording.\n\n"
        }
        QuestionKind::Lookup | QuestionKind::OutOfDomain => "",
    };

    format!(
        "You are an assistant that answers questions strictly from the provided document \
         excerpts.\n\n\
         Rules:\n\
         1. Answer using ONLY the context below; never use outside knowledge.\n\
         2. If the context does not contain the answer, reply exactly: \
         \"{NOT_AVAILABLE_ANSWER}\"\n\
         3. If the question is unrelated to the document, reply exactly: \
         \"{OUT_OF_DOMAIN_ANSWER}\"\n\
         4. Be concise and quote exact figures, durations, and conditions from the context.\n\n\
         {guidance}\
         == CONTEXT ==\n{context}\n\n\
         == QUESTION ==\n{question}\n\n\
         == ANSWER =="
    )
}
