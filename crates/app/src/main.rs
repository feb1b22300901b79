mod server;

use chrono::Utc;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use pdf_rag_core::{
    run_ingestion, run_ingestion_worker, wait_until_ready, ChromaStore, ChunkerConfig, Embedder,
    IndexGuard, IngestCoordinator, IngestionQueue, LopdfExtractor, OllamaEmbedder,
    OllamaGenerator, QueryService, TextGenerator, DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory scanned for PDF documents.
    #[arg(long, env = "PDF_RAG_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Chroma base URL
    #[arg(long, env = "PDF_RAG_CHROMA_URL", default_value = "http://localhost:8000")]
    chroma_url: String,

    /// Chroma collection name
    #[arg(long, default_value = "pdf_chunks")]
    chroma_collection: String,

    /// Ollama base URL, used for both embeddings and generation.
    #[arg(long, env = "PDF_RAG_OLLAMA_URL", default_value = "http://localhost:11434")]
    ollama_url: String,

    /// Embedding model name
    #[arg(long, default_value = "nomic-embed-text")]
    embedding_model: String,

    /// Embedding vector size
    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,

    /// Generation model name
    #[arg(long, default_value = "gemma3")]
    generation_model: String,

    /// Chunk window size in characters
    #[arg(long, default_value = "2000")]
    chunk_window: usize,

    /// Chunk overlap in characters
    #[arg(long, default_value = "500")]
    chunk_overlap: usize,

    /// Ingestion worker pool size; defaults to available parallelism.
    #[arg(long)]
    ingest_workers: Option<usize>,

    /// Retrieved chunks per query
    #[arg(long, default_value = "3")]
    top_k: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server: streamed /query plus upload-triggered ingestion.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        listen: SocketAddr,

        /// Probe attempts for the generation service before starting degraded.
        #[arg(long, default_value = "10")]
        generation_probe_attempts: usize,

        /// Fixed delay between startup probes, in seconds.
        #[arg(long, default_value = "3")]
        generation_probe_delay_secs: u64,

        /// Pending ingestion jobs the upload queue will hold.
        #[arg(long, default_value = "16")]
        ingest_queue_depth: usize,
    },
    /// Run one ingestion pass over the data directory and exit.
    Ingest,
    /// Ask a single question and print the streamed answer.
    Query {
        /// The question text.
        #[arg(long)]
        question: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(
        &cli.ollama_url,
        &cli.embedding_model,
        cli.embedding_dimensions,
    )?);
    let store = ChromaStore::new(&cli.chroma_url, &cli.chroma_collection, embedder)?;
    let guard = Arc::new(IndexGuard::with_handle(Box::new(store)));

    let generator: Arc<dyn TextGenerator> =
        Arc::new(OllamaGenerator::new(&cli.ollama_url, &cli.generation_model)?);

    let chunker = ChunkerConfig {
        window_chars: cli.chunk_window,
        overlap_chars: cli.chunk_overlap,
    };
    let coordinator = match cli.ingest_workers {
        Some(workers) => IngestCoordinator::new(LopdfExtractor, chunker, workers)?,
        None => IngestCoordinator::with_default_workers(LopdfExtractor, chunker)?,
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "pdf-rag boot"
    );

    match cli.command {
        Command::Serve {
            listen,
            generation_probe_attempts,
            generation_probe_delay_secs,
            ingest_queue_depth,
        } => {
            if let Err(probe_error) = wait_until_ready(
                generator.as_ref(),
                generation_probe_attempts,
                Duration::from_secs(generation_probe_delay_secs),
            )
            .await
            {
                error!(
                    attempts = generation_probe_attempts,
                    error = %probe_error,
                    "generation service unreachable at startup; continuing degraded"
                );
            }

            let query = Arc::new(QueryService::new(guard.clone(), generator, cli.top_k));
            let (queue, jobs) = IngestionQueue::new(ingest_queue_depth);
            tokio::spawn(run_ingestion_worker(
                jobs,
                cli.data_dir.clone(),
                coordinator,
                guard,
            ));

            let state = server::AppState {
                query,
                queue,
                data_dir: cli.data_dir,
            };
            server::serve(listen, state).await?;
        }
        Command::Ingest => {
            let summary = run_ingestion(&cli.data_dir, &coordinator, &guard).await?;

            for failed in &summary.failures {
                println!("failed: {} ({})", failed.source, failed.reason);
            }
            for evicted in &summary.evicted {
                println!(
                    "deferred to next run: {} ({} chunks)",
                    evicted.source, evicted.chunk_count
                );
            }
            println!(
                "{} chunks ingested from {} documents at {} (run {})",
                summary.admitted_chunks,
                summary.documents_seen,
                summary.finished_at.to_rfc3339(),
                summary.run_id
            );
        }
        Command::Query { question } => {
            let query = QueryService::new(guard, generator, cli.top_k);
            let mut fragments = query.stream_answer("cli", &question).await?;

            while let Some(fragment) = fragments.next().await {
                match fragment {
                    Ok(text) => {
                        print!("{text}");
                        std::io::stdout().flush().ok();
                    }
                    Err(stream_error) => {
                        eprintln!("stream error: {stream_error}");
                        break;
                    }
                }
            }
            println!();
        }
    }

    Ok(())
}
