//! docqa server binary.
//!
//! Loads layered configuration, wires up the providers and the query
//! engine, and serves the HTTP API until interrupted.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use docqa_core::config::{DocqaConfig, load_config};
use docqa_core::embedding::create_embedder;
use docqa_core::engine::QueryEngine;
use docqa_core::fetch::HttpDocumentFetcher;
use docqa_core::providers::OpenAiProvider;
use docqa_core::server::{ApiAuth, AppState, router};

/// docqa: retrieval-augmented question answering over PDF and DOCX documents.
#[derive(Parser, Debug)]
#[command(name = "docqa", version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket address to bind (overrides the config file)
    #[arg(short, long)]
    bind: Option<String>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,
}

fn init_tracing(verbose: u8, quiet: bool) {
    let default_level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "docqa_core={default_level},docqa_cli={default_level}"
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let mut config: DocqaConfig = load_config(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    config
        .validate()
        .context("configuration failed validation")?;

    let provider =
        Arc::new(OpenAiProvider::new(&config.llm).context("failed to create LLM provider")?);
    let embedder: Arc<dyn docqa_core::embedding::Embedder> =
        Arc::from(create_embedder(&config.embedding).context("failed to create embedder")?);
    let fetcher = Arc::new(HttpDocumentFetcher::new(config.fetch.clone()));

    let engine = Arc::new(QueryEngine::new(&config, fetcher, provider, embedder));
    let auth = ApiAuth::from_config(&config.server);
    if auth.is_open_mode() {
        tracing::warn!(
            "No auth tokens configured; the API is open. Set {} to require a bearer token.",
            config.server.auth_token_env
        );
    }

    let app = router(AppState { engine, auth });
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    tracing::info!(bind = %config.server.bind, model = %config.llm.model, "docqa listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("Failed to install ctrl-c handler; shutting down immediately");
        return;
    }
    tracing::info!("Shutdown signal received");
}
