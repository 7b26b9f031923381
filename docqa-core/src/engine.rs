//! The query engine: orchestrates the pipeline end to end.
//!
//! Document processing (fetch -> chunk -> index) runs once per URL and is
//! cached; question answering (retrieve -> rerank -> generate -> validate)
//! fans out concurrently, one task per question, with answers collected in
//! input order. Only document-level failures escalate; per-question
//! failures are absorbed by the stages into fallback answers.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;

use crate::cache::DocumentCache;
use crate::chunk::Chunker;
use crate::config::DocqaConfig;
use crate::embedding::Embedder;
use crate::error::{ConfigError, Result};
use crate::fetch::DocumentSource;
use crate::generate::AnswerGenerator;
use crate::index::{DocumentIndex, Indexer};
use crate::providers::LlmProvider;
use crate::rerank::LlmReranker;
use crate::retrieve::HybridRetriever;
use crate::types::{Chunk, QaRequest, TokenUsage};
use crate::validate::AnswerValidator;

/// The result of processing one request.
#[derive(Debug, Clone)]
pub struct QaOutcome {
    /// One answer per question, in request order.
    pub answers: Vec<String>,
    /// Token usage summed across all questions and stages.
    pub usage: TokenUsage,
}

/// Orchestrator owning the per-document cache and the pipeline stages.
pub struct QueryEngine {
    source: Arc<dyn DocumentSource>,
    chunker: Chunker,
    indexer: Indexer,
    retriever: HybridRetriever,
    reranker: Option<LlmReranker>,
    generator: AnswerGenerator,
    validator: Option<AnswerValidator>,
    context_k: usize,
    cache: Mutex<DocumentCache>,
    build_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl QueryEngine {
    /// Build an engine from configuration and injected collaborators.
    pub fn new(
        config: &DocqaConfig,
        source: Arc<dyn DocumentSource>,
        provider: Arc<dyn LlmProvider>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self::with_cache(
            config,
            source,
            provider,
            embedder,
            DocumentCache::new(&config.cache),
        )
    }

    /// Build an engine with an explicitly constructed cache (lets tests
    /// inject a fake clock).
    pub fn with_cache(
        config: &DocqaConfig,
        source: Arc<dyn DocumentSource>,
        provider: Arc<dyn LlmProvider>,
        embedder: Arc<dyn Embedder>,
        cache: DocumentCache,
    ) -> Self {
        let reranker = config
            .rerank
            .enabled
            .then(|| LlmReranker::new(provider.clone(), config.rerank.clone()));
        let validator = config
            .validation
            .enabled
            .then(|| AnswerValidator::new(provider.clone(), config.validation.clone()));

        Self {
            source,
            chunker: Chunker::new(config.chunking.clone()),
            indexer: Indexer::new(
                embedder.clone(),
                config.retry.clone(),
                config.embedding.batch_size,
            ),
            retriever: HybridRetriever::new(embedder, config.retrieval.clone()),
            reranker,
            generator: AnswerGenerator::new(provider, config.generation.clone()),
            validator,
            context_k: config.rerank.top_k,
            cache: Mutex::new(cache),
            build_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Process one request: ensure the document is indexed, then answer
    /// every question concurrently, preserving input order.
    pub async fn process(&self, request: &QaRequest) -> Result<QaOutcome> {
        if let Err(message) = request.validate() {
            return Err(ConfigError::Invalid { message }.into());
        }

        let index = self.document_index(&request.documents).await?;

        tracing::info!(
            questions = request.questions.len(),
            "Answering questions concurrently"
        );
        let results = futures::future::join_all(
            request
                .questions
                .iter()
                .map(|q| self.answer_question(&index, q)),
        )
        .await;

        let mut answers = Vec::with_capacity(results.len());
        let mut usage = TokenUsage::default();
        for (answer, question_usage) in results {
            answers.push(answer);
            usage.accumulate(&question_usage);
        }

        Ok(QaOutcome { answers, usage })
    }

    /// Clear the document cache.
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    /// Get or build the index for a document URL.
    ///
    /// Concurrent requests for the same uncached URL serialize on a
    /// per-URL lock so at most one build runs; losers find the winner's
    /// cache entry when they acquire the lock. A failed build leaves no
    /// entry behind.
    async fn document_index(&self, url: &Url) -> Result<Arc<DocumentIndex>> {
        let key = url.as_str().to_string();

        if let Some(index) = self.cache.lock().await.get(&key) {
            tracing::info!(url = %url, "Cache HIT for document");
            return Ok(index);
        }

        let build_lock = {
            let mut locks = self.build_locks.lock().await;
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = build_lock.lock().await;

        // Another request may have finished the build while we waited.
        if let Some(index) = self.cache.lock().await.get(&key) {
            tracing::info!(url = %url, "Cache HIT for document (built concurrently)");
            return Ok(index);
        }

        tracing::info!(url = %url, "Cache MISS for document; starting processing");
        let result = self.build_index(url).await;

        {
            let mut locks = self.build_locks.lock().await;
            locks.remove(&key);
        }

        let index = result?;
        self.cache.lock().await.put(&key, index.clone());
        tracing::info!(url = %url, chunks = index.len(), "Stored new index in cache");
        Ok(index)
    }

    async fn build_index(&self, url: &Url) -> Result<Arc<DocumentIndex>> {
        let text = self.source.fetch(url).await?;
        let chunks = self.chunker.chunk(&text);
        tracing::info!(chunks = chunks.len(), "Text split into chunks");
        let index = self.indexer.build(chunks).await?;
        Ok(Arc::new(index))
    }

    /// Run the per-question pipeline. Never fails: every error path inside
    /// the stages produces a fallback answer instead.
    async fn answer_question(&self, index: &DocumentIndex, question: &str) -> (String, TokenUsage) {
        tracing::debug!(question, "Processing question");
        let mut usage = TokenUsage::default();

        let candidates = self.retriever.retrieve(index, question).await;
        let chunks: Vec<Chunk> = candidates
            .iter()
            .filter_map(|hit| index.chunk(hit.id).cloned())
            .collect();

        let selected = match &self.reranker {
            Some(reranker) => {
                let (selected, rerank_usage) = reranker.rerank(question, chunks).await;
                usage.accumulate(&rerank_usage);
                selected
            }
            None => {
                let mut selected = chunks;
                selected.truncate(self.context_k);
                selected
            }
        };

        let (answer, generation_usage) = self.generator.generate(question, &selected).await;
        usage.accumulate(&generation_usage);

        let answer = match &self.validator {
            Some(validator) => {
                let context = join_texts(&selected);
                let validation = validator.validate(&context, &answer, question).await;
                usage.accumulate(&validation.usage);
                validation.answer
            }
            None => answer,
        };

        (answer, usage)
    }
}

/// Join chunk texts into the context string handed to the validator.
fn join_texts(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
