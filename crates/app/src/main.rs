mod server;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use doc_qa_core::{
    document_from_upload, CharacterNgramEmbedder, ChunkingConfig, CohereGenerator, DecodedAnswer,
    FsIndexStore, GenerationConfig, GenerationParams, QaCoordinator, DEFAULT_COHERE_ENDPOINT,
    DEFAULT_COHERE_MODEL, DEFAULT_MAX_DOCUMENT_BYTES, DEFAULT_STRIDE_CHARS, DEFAULT_WINDOW_CHARS,
};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "doc-qa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the persisted vector index generations
    #[arg(long, env = "DOC_QA_INDEX_DIR", default_value = "vector_index")]
    index_dir: PathBuf,

    /// Number of index generations kept on disk
    #[arg(long, env = "DOC_QA_RETAIN_GENERATIONS", default_value = "3")]
    retain_generations: usize,

    /// Cohere API key used for answer generation
    #[arg(long, env = "COHERE_API_KEY", hide_env_values = true)]
    cohere_api_key: Option<String>,

    /// Cohere generate endpoint
    #[arg(long, env = "COHERE_API_URL", default_value = DEFAULT_COHERE_ENDPOINT)]
    cohere_url: String,

    /// Generation model name
    #[arg(long, env = "DOC_QA_MODEL", default_value = DEFAULT_COHERE_MODEL)]
    model: String,

    /// Chunks retrieved as context per question
    #[arg(long, default_value = "5")]
    top_k: usize,

    /// Maximum tokens generated per answer
    #[arg(long, default_value = "300")]
    max_tokens: u32,

    /// Sampling temperature for generation
    #[arg(long, default_value = "0.2")]
    temperature: f32,

    /// Upper bound on one generation call, in seconds
    #[arg(long, env = "DOC_QA_GENERATION_TIMEOUT_SECS", default_value = "60")]
    generation_timeout_secs: u64,

    /// Upper bound on one document download, in seconds
    #[arg(long, env = "DOC_QA_DOWNLOAD_TIMEOUT_SECS", default_value = "30")]
    download_timeout_secs: u64,

    /// Largest document accepted from a download, in bytes
    #[arg(long, env = "DOC_QA_MAX_DOCUMENT_BYTES", default_value_t = DEFAULT_MAX_DOCUMENT_BYTES)]
    max_document_bytes: u64,

    /// Characters per chunk
    #[arg(long, default_value_t = DEFAULT_WINDOW_CHARS)]
    chunk_window: usize,

    /// Characters between the starts of consecutive chunks
    #[arg(long, default_value_t = DEFAULT_STRIDE_CHARS)]
    chunk_stride: usize,

    /// Questions of one batch answered concurrently
    #[arg(long, default_value = "4")]
    question_concurrency: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the ingest-and-answer HTTP endpoint.
    Serve {
        /// Address to bind
        #[arg(long, env = "DOC_QA_BIND", default_value = "0.0.0.0")]
        bind: IpAddr,
        /// Port to listen on
        #[arg(long, env = "DOC_QA_PORT", default_value = "8000")]
        port: u16,
        /// Maximum accepted request body, in bytes
        #[arg(long, default_value_t = server::DEFAULT_MAX_BODY_SIZE)]
        max_body_size: usize,
    },
    /// Index a PDF or DOCX, replacing the current document.
    Ingest {
        /// Local file to index
        #[arg(long, conflicts_with = "url", required_unless_present = "url")]
        file: Option<PathBuf>,
        /// Remote document to download and index
        #[arg(long)]
        url: Option<String>,
    },
    /// Ask one question against the current document.
    Ask {
        /// Question text
        #[arg(long)]
        query: String,
    },
}

fn build_coordinator(cli: &Cli) -> anyhow::Result<QaCoordinator> {
    let store = FsIndexStore::new(&cli.index_dir).with_retention(cli.retain_generations);
    let generator = CohereGenerator::new(GenerationConfig {
        endpoint: cli.cohere_url.clone(),
        model: cli.model.clone(),
        api_key: cli.cohere_api_key.clone(),
        timeout: Duration::from_secs(cli.generation_timeout_secs),
        ..GenerationConfig::default()
    })
    .context("failed to build generation client")?;

    let coordinator = QaCoordinator::new(
        Arc::new(store),
        Arc::new(CharacterNgramEmbedder::default()),
        Arc::new(generator),
    )?
    .with_top_k(cli.top_k)
    .with_generation_params(GenerationParams {
        max_tokens: cli.max_tokens,
        temperature: cli.temperature,
    })
    .with_question_concurrency(cli.question_concurrency)
    .with_download_limits(
        Duration::from_secs(cli.download_timeout_secs),
        cli.max_document_bytes,
    )?
    .with_chunking(ChunkingConfig {
        window: cli.chunk_window,
        stride: cli.chunk_stride,
    })
    .context("invalid chunking options")?;

    Ok(coordinator)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    if cli.cohere_api_key.is_none() {
        warn!("COHERE_API_KEY is not set; questions will fail until it is configured");
    }

    let coordinator = build_coordinator(&cli)?;
    info!(
        version = app_version,
        index_dir = %cli.index_dir.display(),
        started_at = %Utc::now().to_rfc3339(),
        "doc-qa boot"
    );

    match cli.command {
        Command::Serve {
            bind,
            port,
            max_body_size,
        } => {
            let addr = SocketAddr::new(bind, port);
            server::serve(addr, Arc::new(coordinator), max_body_size)
                .await
                .with_context(|| format!("server on {addr} failed"))?;
        }
        Command::Ingest { file, url } => {
            let document = match (file, url) {
                (Some(path), _) => {
                    let bytes = tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    let name = path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .with_context(|| format!("path has no file name: {}", path.display()))?;
                    document_from_upload(name, bytes)?
                }
                (None, Some(url)) => coordinator.fetch(&url).await?,
                (None, None) => anyhow::bail!("either --file or --url is required"),
            };

            let (summary, _) = coordinator.ingest(document).await?;
            println!(
                "{} indexed: {} chunks, generation {}, at {}",
                summary.document_name,
                summary.chunk_count,
                summary.generation,
                summary.ingested_at.to_rfc3339()
            );
        }
        Command::Ask { query } => {
            let report = coordinator.ask(&query).await?;
            match &report.answer {
                DecodedAnswer::Parsed(answer) => {
                    println!("{}", serde_json::to_string_pretty(answer)?);
                }
                DecodedAnswer::Unparsed { raw_response } => {
                    println!("could not parse as JSON, raw model output:");
                    println!("{raw_response}");
                }
            }
            for source in &report.sources {
                info!(
                    generation = report.generation,
                    position = source.position,
                    score = source.score,
                    "context chunk"
                );
            }
        }
    }

    Ok(())
}
