//! Pluggable embedding providers for the vector index.
//!
//! Provides a trait-based abstraction over embedding models, with an
//! OpenAI API implementation and a deterministic local hash embedder that
//! needs no network access.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{ConfigError, LlmError};

/// Trait for embedding providers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embeddings for a batch of texts, one vector per input, in
    /// input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;

    /// Return the dimensionality of embeddings.
    fn dimensions(&self) -> usize;

    /// Return the provider name.
    fn provider_name(&self) -> &str;
}

/// Deterministic hash-TF embedder (always available, no external calls).
///
/// Each term is hashed to a dimension index and its term frequency
/// accumulated; the vector is L2-normalized. Coarse, but deterministic and
/// cheap, which makes it the offline fallback and the test double.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Embed a single text synchronously.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        if words.is_empty() {
            return vector;
        }

        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in &words {
            *tf.entry(word).or_insert(0) += 1;
        }

        for (term, count) in &tf {
            let idx = term_hash(term) % self.dimensions;
            vector[idx] += *count as f32;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        vector
    }
}

/// djb2 over the term bytes.
fn term_hash(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        "local"
    }
}

/// OpenAI API embedder (text-embedding-3-small by default).
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    base_url: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: String) -> Self {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| "text-embedding-3-small".to_string());
        let dims = if config.dimensions > 0 {
            config.dimensions
        } else {
            match model.as_str() {
                "text-embedding-3-large" => 3072,
                _ => 1536,
            }
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            model,
            dims,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout { timeout_secs: 0 }
                } else {
                    LlmError::Connection {
                        message: format!("Embedding request failed: {e}"),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => LlmError::AuthFailed {
                    provider: "openai-embeddings".to_string(),
                },
                429 => LlmError::RateLimited {
                    retry_after_secs: 1,
                },
                _ => LlmError::ApiRequest {
                    message: format!("Embedding API returned HTTP {status}"),
                },
            });
        }

        let parsed: EmbeddingResponse =
            response.json().await.map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid embedding response: {e}"),
            })?;

        if parsed.data.len() != texts.len() {
            return Err(LlmError::ResponseParse {
                message: format!(
                    "Embedding count mismatch: sent {} texts, got {} vectors",
                    texts.len(),
                    parsed.data.len()
                ),
            });
        }

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}

/// Create an embedder from configuration.
///
/// The "openai" provider requires its API key env var to be set; "local"
/// (or anything else) is the deterministic hash embedder.
pub fn create_embedder(
    config: &EmbeddingConfig,
) -> Result<Box<dyn Embedder>, ConfigError> {
    match config.provider.as_str() {
        "openai" => {
            let api_key =
                std::env::var(&config.api_key_env).map_err(|_| ConfigError::EnvVarMissing {
                    var: config.api_key_env.clone(),
                })?;
            Ok(Box::new(OpenAiEmbedder::new(config, api_key)))
        }
        _ => {
            let dims = if config.dimensions > 0 {
                config.dimensions
            } else {
                256
            };
            Ok(Box::new(HashEmbedder::new(dims)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_embedder_dimensions() {
        let embedder = HashEmbedder::new(128);
        assert_eq!(embedder.dimensions(), 128);
        let v = embedder.embed("hello world");
        assert_eq!(v.len(), 128);
    }

    #[test]
    fn test_hash_embedder_normalized() {
        let embedder = HashEmbedder::new(128);
        let v = embedder.embed("test input text for normalization");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!(
            (norm - 1.0).abs() < 0.01,
            "Expected normalized vector, got norm={norm}"
        );
    }

    #[test]
    fn test_hash_embedder_empty_text() {
        let embedder = HashEmbedder::new(128);
        let v = embedder.embed("");
        assert_eq!(v.len(), 128);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::new(128);
        assert_eq!(embedder.embed("same text"), embedder.embed("same text"));
    }

    #[test]
    fn test_hash_embedder_different_texts_differ() {
        let embedder = HashEmbedder::new(128);
        assert_ne!(
            embedder.embed("hello world"),
            embedder.embed("goodbye universe")
        );
    }

    #[tokio::test]
    async fn test_hash_embedder_batch() {
        let embedder = HashEmbedder::new(64);
        let texts = vec!["hello".to_string(), "world".to_string()];
        let embeddings = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert!(embeddings.iter().all(|e| e.len() == 64));
    }

    #[test]
    fn test_openai_embedder_default_dimensions() {
        let config = EmbeddingConfig::default();
        let embedder = OpenAiEmbedder::new(&config, "test-key".into());
        assert_eq!(embedder.dimensions(), 1536);
        assert_eq!(embedder.provider_name(), "openai");
    }

    #[test]
    fn test_openai_embedder_large_model_dimensions() {
        let config = EmbeddingConfig {
            model: Some("text-embedding-3-large".to_string()),
            ..Default::default()
        };
        let embedder = OpenAiEmbedder::new(&config, "test-key".into());
        assert_eq!(embedder.dimensions(), 3072);
    }

    #[test]
    fn test_create_embedder_local() {
        let config = EmbeddingConfig {
            provider: "local".to_string(),
            ..Default::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.provider_name(), "local");
        assert_eq!(embedder.dimensions(), 256);
    }

    #[test]
    fn test_create_embedder_openai_requires_key() {
        let config = EmbeddingConfig {
            api_key_env: "DOCQA_TEST_MISSING_KEY".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            create_embedder(&config),
            Err(ConfigError::EnvVarMissing { .. })
        ));
    }
}
