//! Fundamental types shared across the docqa pipeline.

use serde::{Deserialize, Serialize};
use url::Url;

/// A contiguous span of document text used as the unit of retrieval.
///
/// Chunks are created by the chunker, immutable thereafter, and owned by the
/// document index. `id` is the chunk's position in the index after
/// deduplication; `start`/`end` are byte offsets into the normalized
/// document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// A chunk id with a relevance score, as returned by retrieval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredChunk {
    pub id: usize,
    pub score: f32,
}

/// Token usage statistics from an LLM call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// The role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A request to the LLM for a chat completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    pub model: Option<String>,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            temperature: 0.0,
            max_tokens: None,
            model: None,
        }
    }
}

/// The result of an LLM completion request.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
}

/// Classification of a question, used to select a prompt template.
///
/// Classification is a pure function of the question text; it never
/// consults the document or the LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// A hypothetical or claim-style question ("If X happens, will Y be paid?").
    Scenario,
    /// Asks for an amount, limit, percentage, or duration.
    Quantitative,
    /// Asks what is excluded or not covered.
    Exclusion,
    /// A plain factual lookup (the default).
    Lookup,
    /// General-knowledge trivia unrelated to any document.
    OutOfDomain,
}

impl QuestionKind {
    /// Classify a question by keyword matching.
    ///
    /// Markers are checked most-specific first; anything unmatched is a
    /// `Lookup`. The `OutOfDomain` markers are deliberately conservative:
    /// a missed out-of-domain question still reaches the LLM, whose
    /// instructions tell it to decline.
    pub fn classify(question: &str) -> Self {
        let lower = question.to_lowercase();

        const OUT_OF_DOMAIN: &[&str] = &[
            "capital of",
            "president of",
            "prime minister of",
            "the weather",
            "tell me a joke",
            "write a poem",
            "write me a poem",
            "who won the",
            "recipe for",
        ];
        if OUT_OF_DOMAIN.iter().any(|m| lower.contains(m)) {
            return Self::OutOfDomain;
        }

        const EXCLUSION: &[&str] = &[
            "exclusion",
            "excluded",
            "not covered",
            "disallowed",
            "prohibited",
            "does not cover",
        ];
        if EXCLUSION.iter().any(|m| lower.contains(m)) {
            return Self::Exclusion;
        }

        const QUANTITATIVE: &[&str] = &[
            "how much",
            "how many",
            "how long",
            "amount",
            "percentage",
            "percent",
            "limit",
            "maximum",
            "minimum",
            "what is the grace period",
            "waiting period",
        ];
        if QUANTITATIVE.iter().any(|m| lower.contains(m)) {
            return Self::Quantitative;
        }

        const SCENARIO: &[&str] = &[
            "will the",
            "would the",
            "can i claim",
            "can he claim",
            "can she claim",
            "is it possible",
            "suppose",
            "underwent",
            "what happens if",
        ];
        if lower.starts_with("if ") || SCENARIO.iter().any(|m| lower.contains(m)) {
            return Self::Scenario;
        }

        Self::Lookup
    }
}

/// The unit of work submitted by a caller: a document URL plus an ordered
/// list of question strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaRequest {
    pub documents: Url,
    pub questions: Vec<String>,
}

impl QaRequest {
    /// Validate the request before any pipeline work begins.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self.documents.scheme() {
            "http" | "https" => {}
            other => return Err(format!("unsupported URL scheme '{other}'")),
        }
        if self.questions.is_empty() {
            return Err("questions must be a non-empty array".to_string());
        }
        if self.questions.iter().any(|q| q.trim().is_empty()) {
            return Err("questions must not contain empty strings".to_string());
        }
        Ok(())
    }
}

/// The response body: one answer per question, in request order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaResponse {
    pub answers: Vec<String>,
}
