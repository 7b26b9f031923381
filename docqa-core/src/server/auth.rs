//! Bearer-token authentication.

use crate::config::ServerConfig;

/// Token-based authentication for API requests.
#[derive(Debug, Clone)]
pub struct ApiAuth {
    valid_tokens: Vec<String>,
}

impl ApiAuth {
    /// Create an auth validator from the server config, appending the
    /// token from the configured environment variable if set.
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut tokens = config.auth_tokens.clone();
        if let Ok(token) = std::env::var(&config.auth_token_env)
            && !token.is_empty()
        {
            tokens.push(token);
        }
        Self {
            valid_tokens: tokens,
        }
    }

    /// Create an auth validator with the given tokens.
    pub fn new(tokens: Vec<String>) -> Self {
        Self {
            valid_tokens: tokens,
        }
    }

    /// Validate a token. Returns `true` if the token is accepted.
    ///
    /// If no tokens are configured, all requests are accepted (open mode).
    pub fn validate(&self, token: &str) -> bool {
        if self.valid_tokens.is_empty() {
            return true;
        }
        self.valid_tokens.iter().any(|t| t == token)
    }

    /// Whether the server is in open mode (no auth required).
    pub fn is_open_mode(&self) -> bool {
        self.valid_tokens.is_empty()
    }
}
