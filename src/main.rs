//! Main module for the Awful RAG CLI application (rag).
//!
//! Loads the configuration, opens the persisted index, builds the configured
//! embedding provider and dispatches the parsed subcommand.
//!
//! # Examples
//!
//! ```sh
//! rag init
//! rag ingest
//! rag search "how do lifetimes work?" -k 3
//! rag context "how do lifetimes work?"
//! ```

use awful_rag::{
    commands::{Cli, Commands},
    config::{self, RagConfig},
    config_dir,
    knowledge::KnowledgeBase,
    metadata::{self, Metadata},
    pretty,
    retrieval::{IndexOutcome, RetrievalService},
    vector_index::{SharedIndex, VectorIndex},
};
use clap::Parser;
use once_cell::sync::OnceCell;
use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> ExitCode {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    });

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(run()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Main asynchronous function of the Awful RAG CLI application.
///
/// Each arm opens only what it needs: `init` touches no index, and the
/// maintenance commands never load an embedding model.
async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => config_dir()?.join("config.yaml"),
    };

    match cli.command {
        Commands::Init => init(&config_path)?,
        Commands::Add { texts, meta } => {
            let (rag_config, index) = open_index(&config_path)?;
            let rag = retrieval_service(&rag_config, index).await?;
            let mut shared = Metadata::new();
            for pair in &meta {
                let (k, v) = metadata::parse_pair(pair)?;
                shared.insert(k, v);
            }
            let metadata = vec![shared; texts.len()];
            match rag.try_add_knowledge(texts, Some(metadata)).await? {
                IndexOutcome::Indexed(rows) => println!("indexed rows {rows:?}"),
                IndexOutcome::Skipped { reason } => {
                    return Err(format!("not indexed: {reason}").into());
                }
            }
        }
        Commands::Ingest { dir } => {
            let (rag_config, index) = open_index(&config_path)?;
            let dir = dir.unwrap_or_else(|| rag_config.knowledge_dir.clone());
            let rag = retrieval_service(&rag_config, index).await?;
            let mut kb = KnowledgeBase::new(rag, dir)?.with_chunk_size(rag_config.chunk_size);
            let report = kb.load_knowledge_files().await?;
            println!(
                "loaded {} files ({} chunks) from {}",
                report.loaded.len(),
                report.chunks,
                kb.dir().display()
            );
            for (path, reason) in &report.failed {
                println!("skipped {}: {reason}", path.display());
            }
        }
        Commands::Search { query, k } => {
            let (rag_config, index) = open_index(&config_path)?;
            let rag = retrieval_service(&rag_config, index).await?;
            let hits = rag.retrieve(&query, k.unwrap_or(rag_config.default_k)).await?;
            pretty::print_hits(&hits)?;
        }
        Commands::Context { query, k } => {
            let (rag_config, index) = open_index(&config_path)?;
            let rag = retrieval_service(&rag_config, index).await?;
            let context = rag.get_context(&query, k.unwrap_or(rag_config.default_k)).await?;
            pretty::print_context(&context)?;
        }
        Commands::Delete { row } => {
            let (_, index) = open_index(&config_path)?;
            if index.tombstone(row).await? {
                println!("deleted row {row}");
            } else {
                println!("row {row} does not exist or was already deleted");
            }
        }
        Commands::Compact => {
            let (_, index) = open_index(&config_path)?;
            let mapping = index.compact().await?;
            let moved = mapping.iter().filter(|(old, new)| old != new).count();
            println!("compacted; {moved} rows renumbered");
        }
        Commands::Stats => {
            let (_, index) = open_index(&config_path)?;
            println!("live documents: {}", index.size().await);
            println!("physical rows:  {}", index.row_count().await);
            println!("dimension:      {}", index.dimension().await);
        }
        Commands::Clear => {
            let (_, index) = open_index(&config_path)?;
            index.clear().await?;
            println!("index cleared");
        }
    }

    Ok(())
}

/// Load the config and open (or start) the index it names.
fn open_index(config_path: &Path) -> Result<(RagConfig, SharedIndex), Box<dyn Error>> {
    let rag_config = config::load_config(config_path)?;
    debug!("Config loaded: {:?}", rag_config);
    let index = SharedIndex::new(VectorIndex::open(&rag_config.index_path, rag_config.dimension)?);
    Ok((rag_config, index))
}

/// Build the configured provider and wire it to `index`.
async fn retrieval_service(
    rag_config: &RagConfig,
    index: SharedIndex,
) -> Result<RetrievalService, Box<dyn Error>> {
    let provider = rag_config.embedding_provider().await?;
    Ok(RetrievalService::new(index, provider)
        .await?
        .with_options(rag_config.context_options()))
}

/// Writes a default configuration and creates the knowledge directory.
///
/// An existing config file is left untouched.
fn init(config_path: &Path) -> Result<(), Box<dyn Error>> {
    let base = match config_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&base)?;

    if config_path.exists() {
        println!("config already exists at {}", config_path.display());
        return Ok(());
    }

    let rag_config = RagConfig::default_for(&base);
    info!("Creating knowledge directory: {}", rag_config.knowledge_dir.display());
    fs::create_dir_all(&rag_config.knowledge_dir)?;

    info!("Creating config file: {}", config_path.display());
    fs::write(config_path, serde_yaml::to_string(&rag_config)?)?;
    println!("wrote {}", config_path.display());
    Ok(())
}
