//! # docqa Core
//!
//! Core library for the docqa question-answering service.
//! Provides the pipeline stages (fetch, chunk, index, retrieve, rerank,
//! generate, validate), the orchestrating query engine, the document
//! cache, configuration, and the HTTP router.

pub mod cache;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod generate;
pub mod index;
pub mod providers;
pub mod rerank;
pub mod retrieve;
pub mod server;
pub mod types;
pub mod validate;

// Re-export commonly used types at the crate root.
pub use cache::{Clock, DocumentCache, SystemClock};
pub use chunk::Chunker;
pub use config::{DocqaConfig, load_config};
pub use embedding::{Embedder, HashEmbedder, OpenAiEmbedder, create_embedder};
pub use engine::{QaOutcome, QueryEngine};
pub use error::{PipelineError, Result};
pub use fetch::{DocumentSource, HttpDocumentFetcher};
pub use generate::{
    AnswerGenerator, GENERATION_FAILED_ANSWER, NOT_AVAILABLE_ANSWER, OUT_OF_DOMAIN_ANSWER,
};
pub use index::{DocumentIndex, Indexer};
pub use providers::{LlmProvider, MockLlmProvider, OpenAiProvider};
pub use rerank::LlmReranker;
pub use retrieve::HybridRetriever;
pub use types::{Chunk, QaRequest, QaResponse, QuestionKind, ScoredChunk, TokenUsage};
pub use validate::AnswerValidator;
