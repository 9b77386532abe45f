//! Ingestion engine binary
//!
//! Run with: cargo run -p docchat-ingest -- watch

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use docchat_ingest::{
    config::{BackendProvider, IngestConfig},
    ingestion::LocalExtractor,
    processing::{Collaborators, FileProcessor, QueueScanner, StatusStore},
    providers::{
        EmbeddingProvider, InMemoryVectorStore, MetadataAnnotator, NoopAnnotator,
        OpenAiAnnotator, OpenAiClient, OpenAiEmbedder, PineconeStore, VectorStoreProvider,
    },
    server::{state::AppState, IngestServer},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Folder-driven document ingestion into a vector index
#[derive(Parser)]
#[command(name = "docchat-ingest", version, about)]
struct Cli {
    /// TOML configuration file (environment variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch the intake folder and process files continuously
    Watch,
    /// Process every eligible file once, then exit
    Once,
    /// Serve the upload and status API alongside the folder watcher
    Serve,
    /// Print the status document, or one file's entry
    Status {
        /// File to show
        filename: Option<String>,
    },
    /// Re-queue a file for processing
    Reset {
        /// File to re-queue
        filename: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docchat_ingest=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = IngestConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Status { filename } => show_status(&config, filename.as_deref()),
        Command::Reset { filename } => reset(&config, &filename),
        Command::Once => {
            let scanner = build_scanner(&config)?;
            let report = scanner.run(false).await?;
            println!(
                "Processed {} files: {} completed, {} warnings, {} failed, {} skipped",
                report.discovered, report.completed, report.warnings, report.failed, report.skipped
            );
            if !report.is_clean() {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Watch => {
            let scanner = build_scanner(&config)?;
            tokio::select! {
                result = scanner.run(true) => { result?; }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down folder processor");
                }
            }
            Ok(())
        }
        Command::Serve => {
            let scanner = Arc::new(build_scanner(&config)?);
            let processor = Arc::clone(scanner.processor());
            let server = IngestServer::new(AppState::new(
                config.clone(),
                processor,
                Arc::clone(&scanner),
            ));

            tokio::select! {
                result = server.start() => { result?; }
                result = scanner.run(true) => { result?; }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down");
                }
            }
            Ok(())
        }
    }
}

/// Validate configuration, prepare folders and wire the collaborators
fn build_scanner(config: &IngestConfig) -> anyhow::Result<QueueScanner> {
    config.validate()?;

    std::fs::create_dir_all(&config.paths.intake_dir)
        .with_context(|| format!("creating {}", config.paths.intake_dir.display()))?;
    std::fs::create_dir_all(&config.paths.processed_dir)
        .with_context(|| format!("creating {}", config.paths.processed_dir.display()))?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Intake folder: {}", config.paths.intake_dir.display());
    tracing::info!("  - Processed folder: {}", config.paths.processed_dir.display());
    tracing::info!("  - Embedding model: {}", config.openai.embedding_model);
    tracing::info!("  - Chunk size: {} tokens", config.chunking.max_tokens);
    tracing::info!("  - Batch size: {}", config.upload.batch_size);

    let client = OpenAiClient::new(&config.openai)?;
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OpenAiEmbedder::new(
        client.clone(),
        &config.openai,
        config.pinecone.dimension,
    ));
    let annotator: Arc<dyn MetadataAnnotator> = if config.metadata.enabled {
        Arc::new(OpenAiAnnotator::new(
            client,
            &config.openai,
            config.metadata.sample_chars,
        ))
    } else {
        Arc::new(NoopAnnotator)
    };
    let vector_store: Arc<dyn VectorStoreProvider> = match config.backend {
        BackendProvider::Remote => Arc::new(PineconeStore::new(&config.pinecone)?),
        BackendProvider::Memory => {
            tracing::warn!("Using the in-memory vector store; vectors are lost on exit");
            Arc::new(InMemoryVectorStore::new())
        }
    };

    let status = Arc::new(StatusStore::new(config.paths.status_file.clone()));
    let collaborators = Collaborators {
        extractor: Arc::new(LocalExtractor::new()),
        annotator,
        embedder,
        vector_store,
    };
    let processor = Arc::new(FileProcessor::new(config, collaborators, status));

    Ok(QueueScanner::new(processor, config.scheduler.clone()))
}

fn show_status(config: &IngestConfig, filename: Option<&str>) -> anyhow::Result<()> {
    let store = StatusStore::new(config.paths.status_file.clone());
    let output = match filename {
        Some(filename) => match store.get(filename) {
            Some(task) => serde_json::to_string_pretty(&task)?,
            None => bail!("No status entry for {}", filename),
        },
        None => serde_json::to_string_pretty(&store.load())?,
    };
    println!("{}", output);
    Ok(())
}

fn reset(config: &IngestConfig, filename: &str) -> anyhow::Result<()> {
    let store = StatusStore::new(config.paths.status_file.clone());
    match store.reset(filename, "Re-queued for processing by operator") {
        Some(task) => {
            println!("{} is now {}", filename, task.status);
            Ok(())
        }
        None => bail!("No status entry for {}", filename),
    }
}
