//! Error types for the docqa pipeline.
//!
//! Uses `thiserror` for public API error types with structured error variants
//! covering fetch, parse, index, LLM, and configuration domains.
//!
//! Only document-level failures (fetch/parse/index) escalate to the caller as
//! a batch failure; LLM failures during reranking, generation, and validation
//! are contained inside their stages and converted to safe fallback answers.

/// Top-level error type for the docqa core library.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors downloading a document. Fatal for the whole batch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Download timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Server returned HTTP {status}")]
    Status { status: u16 },

    #[error("Document too large: {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },
}

/// Errors extracting text from a downloaded document. Fatal for the batch;
/// no partial or garbage text is ever returned.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Unsupported document type: {detected}")]
    UnsupportedType { detected: String },

    #[error("PDF parse failed: {message}")]
    Pdf { message: String },

    #[error("DOCX parse failed: {message}")]
    Docx { message: String },

    #[error("Document contains no extractable text")]
    EmptyDocument,
}

/// Errors building the document index. Fatal for the batch: a document
/// whose index cannot be built cannot be queried.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Embedding failed after retries: {message}")]
    Embedding { message: String },

    #[error("Keyword index build failed: {message}")]
    Keyword { message: String },
}

/// Errors from LLM provider interactions.
///
/// These never escalate to a batch failure on their own: reranking falls
/// back to a heuristic, generation substitutes a fallback answer, and
/// validation fails open.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },
}

/// A type alias for results using the top-level `PipelineError`.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_fetch() {
        let err = PipelineError::Fetch(FetchError::Timeout { timeout_secs: 30 });
        assert_eq!(err.to_string(), "Fetch error: Download timed out after 30s");
    }

    #[test]
    fn test_error_display_parse() {
        let err = PipelineError::Parse(ParseError::UnsupportedType {
            detected: "text/html".into(),
        });
        assert_eq!(
            err.to_string(),
            "Parse error: Unsupported document type: text/html"
        );
    }

    #[test]
    fn test_error_display_index() {
        let err = PipelineError::Index(IndexError::Embedding {
            message: "connection refused".into(),
        });
        assert_eq!(
            err.to_string(),
            "Index error: Embedding failed after retries: connection refused"
        );
    }

    #[test]
    fn test_error_display_llm() {
        let err = LlmError::RateLimited {
            retry_after_secs: 60,
        };
        assert_eq!(err.to_string(), "Rate limited by provider, retry after 60s");
    }

    #[test]
    fn test_error_display_config() {
        let err = PipelineError::Config(ConfigError::EnvVarMissing {
            var: "OPENAI_API_KEY".into(),
        });
        assert_eq!(
            err.to_string(),
            "Configuration error: Environment variable not set: OPENAI_API_KEY"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PipelineError = io_err.into();
        assert!(matches!(err, PipelineError::Io(_)));
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: PipelineError = serde_err.into();
        assert!(matches!(err, PipelineError::Serialization(_)));
    }

    #[test]
    fn test_fetch_error_too_large() {
        let err = FetchError::TooLarge {
            size: 30_000_000,
            limit: 26_214_400,
        };
        assert_eq!(
            err.to_string(),
            "Document too large: 30000000 bytes exceeds limit of 26214400"
        );
    }
}
