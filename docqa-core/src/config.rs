//! Configuration system for docqa.
//!
//! Uses `figment` for layered configuration: defaults -> config file ->
//! environment. Environment variables use the `DOCQA_` prefix with `__` as
//! the section separator (e.g. `DOCQA_RETRIEVAL__VECTOR_K=20`).
//!
//! Chunk sizes, retrieval counts, and ensemble weights are deployment
//! tunables, not fixed behavior; the defaults here are starting points.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Top-level configuration for the docqa service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocqaConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub fetch: FetchConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub rerank: RerankConfig,
    pub generation: GenerationConfig,
    pub validation: ValidationConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
}

impl DocqaConfig {
    /// Validate cross-field invariants.
    ///
    /// Returns the first violation found; a config that passes here is safe
    /// to hand to the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunking.target_size == 0 {
            return Err(ConfigError::Invalid {
                message: "chunking.target_size must be positive".to_string(),
            });
        }
        if self.chunking.overlap >= self.chunking.target_size {
            return Err(ConfigError::Invalid {
                message: format!(
                    "chunking.overlap ({}) must be smaller than chunking.target_size ({})",
                    self.chunking.overlap, self.chunking.target_size
                ),
            });
        }
        if self.retrieval.keyword_weight < 0.0 || self.retrieval.vector_weight < 0.0 {
            return Err(ConfigError::Invalid {
                message: "retrieval weights must be non-negative".to_string(),
            });
        }
        if self.retrieval.keyword_weight + self.retrieval.vector_weight == 0.0 {
            return Err(ConfigError::Invalid {
                message: "at least one retrieval weight must be positive".to_string(),
            });
        }
        if self.rerank.top_k == 0 {
            return Err(ConfigError::Invalid {
                message: "rerank.top_k must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind, e.g. "127.0.0.1:8000".
    pub bind: String,
    /// Accepted bearer tokens. An empty list (and unset env var) means open
    /// mode: all requests are accepted without authentication.
    #[serde(default)]
    pub auth_tokens: Vec<String>,
    /// Environment variable holding an additional accepted token.
    pub auth_token_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            auth_tokens: Vec::new(),
            auth_token_env: "DOCQA_API_TOKEN".to_string(),
        }
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "openai" or any OpenAI-compatible endpoint.
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider name: "openai" or "local" (deterministic hash embedder).
    pub provider: String,
    /// Provider-specific model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Embedding dimensions (auto-detected from the model if 0).
    pub dimensions: usize,
    /// Batch size for bulk embedding calls.
    pub batch_size: usize,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            dimensions: 0,
            batch_size: 32,
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            timeout_secs: 30,
        }
    }
}

/// Document download configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Download timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum document size in bytes.
    pub max_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_bytes: 25 * 1024 * 1024,
        }
    }
}

/// Text chunking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk length in characters.
    pub target_size: usize,
    /// Overlap carried from the previous chunk, in characters. Must be
    /// smaller than `target_size`.
    pub overlap: usize,
    /// Chunks shorter than this are merged into their neighbor.
    pub min_chunk_len: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_size: 800,
            overlap: 200,
            min_chunk_len: 50,
        }
    }
}

/// Hybrid retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Candidates requested from the keyword (BM25) index.
    pub keyword_k: usize,
    /// Candidates requested from the vector index.
    pub vector_k: usize,
    /// Weight for keyword scores in the combined score.
    pub keyword_weight: f32,
    /// Weight for vector scores in the combined score.
    pub vector_weight: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            keyword_k: 10,
            vector_k: 10,
            keyword_weight: 0.5,
            vector_weight: 0.5,
        }
    }
}

/// LLM reranking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    /// Whether the reranking stage runs at all.
    pub enabled: bool,
    /// Candidates kept after reranking; also the context size when
    /// reranking is disabled.
    pub top_k: usize,
    /// Characters of each chunk shown to the scoring model.
    pub snippet_len: usize,
    /// Max tokens for the scoring completion.
    pub max_tokens: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: 6,
            snippet_len: 150,
            max_tokens: 200,
        }
    }
}

/// Answer generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Sampling temperature; kept low for determinism.
    pub temperature: f32,
    /// Max tokens for the answer completion.
    pub max_tokens: usize,
    /// Token budget for the joined context block.
    pub max_context_tokens: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 700,
            max_context_tokens: 6000,
        }
    }
}

/// Answer validation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Whether the validation stage runs at all.
    pub enabled: bool,
    /// Max tokens for the YES/NO verdict completion.
    pub max_tokens: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tokens: 10,
        }
    }
}

/// Document cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Seconds a cached document index remains valid.
    pub ttl_secs: u64,
    /// Maximum number of cached documents; the oldest entry is evicted
    /// when full.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            max_entries: 100,
        }
    }
}

/// Retry policy for transient provider errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
            max_backoff_ms: 8_000,
            jitter: true,
        }
    }
}

/// Load configuration from defaults, an optional TOML file, and the
/// environment.
pub fn load_config(config_file: Option<&Path>) -> Result<DocqaConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(DocqaConfig::default()));

    if let Some(path) = config_file
        && path.exists()
    {
        figment = figment.merge(Toml::file(path));
    }

    // Environment variables (DOCQA_LLM__MODEL, DOCQA_CACHE__TTL_SECS, etc.)
    figment = figment.merge(Env::prefixed("DOCQA_").split("__"));

    figment.extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DocqaConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_tunables() {
        let config = DocqaConfig::default();
        assert_eq!(config.chunking.target_size, 800);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.retrieval.keyword_k, 10);
        assert_eq!(config.retrieval.vector_k, 10);
        assert_eq!(config.rerank.top_k, 6);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert!(config.rerank.enabled);
        assert!(config.validation.enabled);
    }

    #[test]
    fn test_validate_rejects_overlap_ge_target() {
        let mut config = DocqaConfig::default();
        config.chunking.overlap = config.chunking.target_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_weights() {
        let mut config = DocqaConfig::default();
        config.retrieval.keyword_weight = 0.0;
        config.retrieval.vector_weight = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_weight() {
        let mut config = DocqaConfig::default();
        config.retrieval.vector_weight = -0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = DocqaConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: DocqaConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.llm.model, config.llm.model);
        assert_eq!(deserialized.cache.ttl_secs, config.cache.ttl_secs);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docqa.toml");
        std::fs::write(
            &path,
            "[retrieval]\nkeyword_k = 30\nvector_k = 30\nkeyword_weight = 0.9\nvector_weight = 0.1\n",
        )
        .unwrap();

        let config = load_config(Some(path.as_path())).unwrap();
        assert_eq!(config.retrieval.keyword_k, 30);
        assert!((config.retrieval.keyword_weight - 0.9).abs() < f32::EPSILON);
        // Untouched sections keep their defaults.
        assert_eq!(config.chunking.target_size, 800);
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/docqa.toml"))).unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }
}
