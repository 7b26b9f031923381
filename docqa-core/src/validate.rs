//! Answer validation against retrieved context.
//!
//! A second model call checks whether the generated answer is directly
//! supported by the context; unsupported answers are replaced with the
//! fixed not-available answer. The check fails open: a validator outage
//! must never block a correct answer from reaching the user.

use std::sync::Arc;

use crate::config::ValidationConfig;
use crate::generate::{GENERATION_FAILED_ANSWER, NOT_AVAILABLE_ANSWER, OUT_OF_DOMAIN_ANSWER};
use crate::providers::LlmProvider;
use crate::types::{ChatMessage, CompletionRequest, TokenUsage};

/// Outcome of validating one answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub supported: bool,
    pub answer: String,
    pub usage: TokenUsage,
}

/// LLM-backed answer validator.
pub struct AnswerValidator {
    provider: Arc<dyn LlmProvider>,
    config: ValidationConfig,
}

impl AnswerValidator {
    pub fn new(provider: Arc<dyn LlmProvider>, config: ValidationConfig) -> Self {
        Self { provider, config }
    }

    /// Check whether `answer` is supported by `context`.
    ///
    /// The fixed fallback answers pass through unchanged, which makes
    /// re-validation idempotent. Ambiguous verdicts and provider failures
    /// are treated as supported (fail-open).
    pub async fn validate(&self, context: &str, answer: &str, question: &str) -> Validation {
        if answer == NOT_AVAILABLE_ANSWER
            || answer == OUT_OF_DOMAIN_ANSWER
            || answer == GENERATION_FAILED_ANSWER
        {
            return Validation {
                supported: true,
                answer: answer.to_string(),
                usage: TokenUsage::default(),
            };
        }

        let prompt = verdict_prompt(context, answer, question);
        let request = CompletionRequest {
            messages: vec![ChatMessage::user(prompt)],
            temperature: 0.0,
            max_tokens: Some(self.config.max_tokens),
            model: None,
        };

        match self.provider.complete(request).await {
            Ok(response) => {
                let verdict = response.text.trim().to_uppercase();
                if verdict.starts_with("NO") {
                    tracing::warn!(question, "Answer not supported by context; substituting");
                    Validation {
                        supported: false,
                        answer: NOT_AVAILABLE_ANSWER.to_string(),
                        usage: response.usage,
                    }
                } else {
                    // "YES", or anything unexpected: keep the answer.
                    Validation {
                        supported: true,
                        answer: answer.to_string(),
                        usage: response.usage,
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Validation call failed; failing open");
                Validation {
                    supported: true,
                    answer: answer.to_string(),
                    usage: TokenUsage::default(),
                }
            }
        }
    }
}

fn verdict_prompt(context: &str, answer: &str, question: &str) -> String {
    format!(
        "You are a fact-checking assistant. Verify whether the given answer is directly \
         supported by the provided context.\n\n\
         Rules:\n\
         1. The answer must be directly derivable from the context.\n\
         2. The answer must not contain information absent from the context.\n\
         3. The answer must not contradict the context.\n\n\
         Context:\n{context}\n\n\
         Generated answer:\n{answer}\n\n\
         Question:\n{question}\n\n\
         Is this answer directly supported by the context? Respond only with YES or NO:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockLlmProvider;

    fn validator(provider: MockLlmProvider) -> AnswerValidator {
        AnswerValidator::new(Arc::new(provider), ValidationConfig::default())
    }

    const CONTEXT: &str = "The grace period for premium payment is 30 days.";

    #[tokio::test]
    async fn test_supported_answer_kept() {
        let v = validator(MockLlmProvider::with_response("YES"));
        let result = v
            .validate(CONTEXT, "The grace period is 30 days.", "What is the grace period?")
            .await;
        assert!(result.supported);
        assert_eq!(result.answer, "The grace period is 30 days.");
        assert!(result.usage.total() > 0);
    }

    #[tokio::test]
    async fn test_unsupported_answer_substituted() {
        let v = validator(MockLlmProvider::with_response("NO"));
        let result = v
            .validate(CONTEXT, "The grace period is 90 days.", "What is the grace period?")
            .await;
        assert!(!result.supported);
        assert_eq!(result.answer, NOT_AVAILABLE_ANSWER);
    }

    #[tokio::test]
    async fn test_provider_failure_fails_open() {
        // No queued responses: the call errors.
        let v = validator(MockLlmProvider::new());
        let result = v
            .validate(CONTEXT, "The grace period is 30 days.", "What is the grace period?")
            .await;
        assert!(result.supported);
        assert_eq!(result.answer, "The grace period is 30 days.");
        assert_eq!(result.usage, TokenUsage::default());
    }

    #[tokio::test]
    async fn test_ambiguous_verdict_fails_open() {
        let v = validator(MockLlmProvider::with_response("Probably fine I guess"));
        let result = v
            .validate(CONTEXT, "The grace period is 30 days.", "What is the grace period?")
            .await;
        assert!(result.supported);
        assert_eq!(result.answer, "The grace period is 30 days.");
    }

    #[tokio::test]
    async fn test_fixed_answers_pass_through_without_call() {
        let mock = Arc::new(MockLlmProvider::with_response("NO"));
        let v = AnswerValidator::new(mock.clone(), ValidationConfig::default());

        for fixed in [
            NOT_AVAILABLE_ANSWER,
            OUT_OF_DOMAIN_ANSWER,
            GENERATION_FAILED_ANSWER,
        ] {
            let result = v.validate(CONTEXT, fixed, "anything").await;
            assert!(result.supported);
            assert_eq!(result.answer, fixed);
        }
        assert!(mock.calls().is_empty(), "fixed answers must not hit the LLM");
    }

    #[tokio::test]
    async fn test_revalidation_is_idempotent() {
        let v = validator(MockLlmProvider::with_response("YES"));
        let first = v
            .validate(CONTEXT, "The grace period is 30 days.", "What is the grace period?")
            .await;
        let second = v
            .validate(CONTEXT, &first.answer, "What is the grace period?")
            .await;
        assert!(first.supported && second.supported);
        assert_eq!(first.answer, second.answer);
    }

    #[tokio::test]
    async fn test_lowercase_verdict_accepted() {
        let v = validator(MockLlmProvider::with_response("no"));
        let result = v
            .validate(CONTEXT, "Wrong answer.", "What is the grace period?")
            .await;
        assert!(!result.supported);
    }
}
