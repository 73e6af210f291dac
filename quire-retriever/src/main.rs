use clap::{Parser, Subcommand};
use quire_embed::EmbeddingProvider;
use quire_retriever::{
    answer::{Answer, AnswerService, generator::GeneratorChain},
    config::QuireConfig,
    ingest::{EmbeddingMode, IngestRequest, IngestionPipeline},
    retrieval::{
        indexing_coordinator::{IndexingCoordinator, StartupReport},
        retriever::{Hit, Retriever},
        selector::AdaptiveSelector,
    },
    status::StatusReport,
    storage::{PaperStore, SqlitePaperStore},
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE: &str = "quire.toml";

/// Question answering over a document corpus.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to quire.toml in the base directory, if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory that relative paths in the configuration are resolved against
    #[arg(short, long, default_value = ".")]
    base_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the index, or load it if it is up to date
    Index {
        /// Rebuild even if the fingerprint matches
        #[arg(long)]
        force: bool,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show the passages nearest to a query
    Search {
        query: String,
        /// Number of results
        #[arg(short)]
        k: Option<usize>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Answer a question from the corpus
    Ask {
        query: String,
        /// Number of results to retrieve
        #[arg(short)]
        k: Option<usize>,
        /// Retrieve from the local index or the paper store
        #[arg(long, default_value = "local")]
        backend: Backend,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Load a record file into the paper store
    Ingest {
        path: PathBuf,
        /// Records per transaction
        #[arg(long)]
        batch_size: Option<usize>,
        /// How records are embedded
        #[arg(long, value_enum)]
        embedding_mode: Option<EmbeddingMode>,
        /// Do not record the corpus fingerprint
        #[arg(long)]
        no_fingerprint: bool,
        /// Corpus name for the fingerprint record (defaults to the file name)
        #[arg(long)]
        corpus_name: Option<String>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show index, fingerprint and store status
    Status {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Full,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "full" => Ok(OutputFormat::Full),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Backend {
    Local,
    Store,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Backend::Local),
            "store" => Ok(Backend::Store),
            _ => Err(format!("Invalid backend: {s}")),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_config(args: &Args) -> anyhow::Result<QuireConfig> {
    let default_path = args.base_dir.join(DEFAULT_CONFIG_FILE);
    let path = match &args.config {
        Some(path) => Some(path.as_path()),
        None if default_path.exists() => Some(default_path.as_path()),
        None => None,
    };
    Ok(QuireConfig::load(path)?.resolve_paths(&args.base_dir))
}

async fn open_store(config: &QuireConfig) -> anyhow::Result<Arc<SqlitePaperStore>> {
    Ok(Arc::new(
        SqlitePaperStore::open(&config.paths.database_path, config.embedding.dimension).await?,
    ))
}

async fn local_coordinator(
    config: &QuireConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    force: bool,
) -> anyhow::Result<(IndexingCoordinator, StartupReport)> {
    let coordinator = IndexingCoordinator::new(config.coordinator_config(), embedder)?;
    let report = if force {
        coordinator.rebuild().await?
    } else {
        coordinator.startup().await?
    };
    if report.skipped > 0 {
        eprintln!(
            "Warning: {} passages could not be embedded and were left out of the index",
            report.skipped
        );
    }
    Ok((coordinator, report))
}

fn print_hits(hits: &[Hit], format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(hits)?),
        OutputFormat::Summary => {
            println!("Found {} results:", hits.len());
            for (rank, hit) in hits.iter().enumerate() {
                println!(
                    "  {}. [{:.3}] {} | {}",
                    rank + 1,
                    hit.score,
                    hit.doc_id,
                    hit.title
                );
            }
        }
        OutputFormat::Full => {
            for hit in hits {
                println!("Document: {} ({})", hit.doc_id, hit.title);
                println!("Score: {:.4}", hit.score);
                println!("---");
                println!("{}", hit.chunk);
                println!();
            }
        }
    }
    Ok(())
}

fn print_answer(answer: &Answer, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(answer)?),
        OutputFormat::Summary | OutputFormat::Full => {
            println!("{}", answer.text);
            if !answer.citations.is_empty() {
                println!();
                println!("Sources:");
                for citation in &answer.citations {
                    println!("  - {} | {}", citation.doc_id, citation.title);
                }
            }
            if *format == OutputFormat::Full {
                println!();
                println!("Status: {:?}", answer.status);
                for (i, context) in answer.contexts.iter().enumerate() {
                    println!("Context {}:", i + 1);
                    println!("{context}");
                    println!();
                }
            }
        }
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command {
        Commands::Index { force, format } => {
            let embedder = config.embedding.build_provider().await?;
            let (_, report) = local_coordinator(&config, embedder, force).await?;

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Summary | OutputFormat::Full => {
                    println!(
                        "{} index at {}",
                        if report.rebuilt { "Rebuilt" } else { "Loaded" },
                        config.paths.index_dir.display()
                    );
                    println!("Documents: {}", report.documents);
                    if report.rebuilt {
                        println!("Rows indexed: {}", report.count);
                        println!("Passages skipped: {}", report.skipped);
                    }
                    println!("Fingerprint: {}", report.fingerprint);
                }
            }
            Ok(())
        }
        Commands::Search { query, k, format } => {
            let k = k.unwrap_or(config.retrieval.top_k);
            let embedder = config.embedding.build_provider().await?;
            let (coordinator, _) = local_coordinator(&config, embedder.clone(), false).await?;
            let retriever = Retriever::new(coordinator.handle(), embedder, config.retrieval.clone())
                .with_embed_timeout(config.embedding.timeout());

            let mut hits = retriever.retrieve(&query, k).await?.into_hits();
            hits.truncate(k);
            print_hits(&hits, &format)
        }
        Commands::Ask {
            query,
            k,
            backend,
            format,
        } => {
            let k = k.unwrap_or(config.retrieval.top_k);
            let embedder = config.embedding.build_provider().await?;
            let retriever = match backend {
                Backend::Local => {
                    let (coordinator, _) = local_coordinator(&config, embedder.clone(), false).await?;
                    Retriever::new(coordinator.handle(), embedder, config.retrieval.clone())
                }
                Backend::Store => {
                    let store: Arc<dyn PaperStore> = open_store(&config).await?;
                    Retriever::from_store(store, embedder, config.retrieval.clone())
                }
            }
            .with_embed_timeout(config.embedding.timeout());

            let service = AnswerService::new(
                retriever,
                AdaptiveSelector::new(config.retrieval.selector),
                GeneratorChain::extractive(
                    config.generation.max_sentences,
                    config.generation.timeout(),
                ),
            );
            let answer = service.answer(&query, k).await;
            print_answer(&answer, &format)
        }
        Commands::Ingest {
            path,
            batch_size,
            embedding_mode,
            no_fingerprint,
            corpus_name,
            format,
        } => {
            let store = open_store(&config).await?;
            let mode = embedding_mode.unwrap_or(config.ingest.embedding_mode);

            let mut pipeline = IngestionPipeline::new(store)
                .with_retry_policy(config.ingest.retry_policy())
                .with_embed_timeout(config.embedding.timeout())
                .with_sub_batch_size(config.embedding.sub_batch_size);
            if mode == EmbeddingMode::Provider {
                pipeline = pipeline.with_embedder(config.embedding.build_provider().await?);
            }

            let mut request = IngestRequest::new(path)
                .with_batch_size(batch_size.unwrap_or(config.ingest.batch_size))
                .with_embedding_mode(mode)
                .with_update_fingerprint(config.ingest.update_fingerprint && !no_fingerprint);
            if let Some(name) = corpus_name {
                request = request.with_corpus_name(name);
            }

            let report = pipeline.ingest(&request).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Summary | OutputFormat::Full => {
                    println!("Ingested {} into corpus {}", report.file.display(), report.corpus_name);
                    println!("  Processed: {}", report.rows_processed);
                    println!("  Inserted:  {}", report.rows_inserted);
                    println!("  Updated:   {}", report.rows_updated);
                    println!(
                        "  Skipped:   {} ({} malformed, {} missing fields)",
                        report.rows_skipped, report.malformed_records, report.missing_fields
                    );
                    println!("  Duplicates in file: {}", report.duplicates_found);
                    if format == OutputFormat::Full {
                        println!("  Hash fallbacks: {}", report.embedding_fallbacks);
                        println!("  Attempts: {}", report.attempts);
                        println!("  Duration: {} ms", report.duration_ms);
                        if let Some(fingerprint) = &report.fingerprint {
                            println!("  Fingerprint: {fingerprint}");
                        }
                    }
                }
            }
            Ok(())
        }
        Commands::Status { format } => {
            let embedder = config.embedding.build_provider().await?;
            let store = if config.paths.database_path.exists() {
                Some(open_store(&config).await?)
            } else {
                None
            };
            let report = StatusReport::collect(
                &config.coordinator_config(),
                embedder.as_ref(),
                store.as_deref().map(|s| s as &dyn PaperStore),
            )
            .await;

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Summary | OutputFormat::Full => println!("{}", report.summary()),
            }
            Ok(())
        }
    }
}

