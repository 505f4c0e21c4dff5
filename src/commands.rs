//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a `Cli` struct that represents the parsed command-line arguments,
//! and a `Commands` enum that represents the available subcommands and their
//! options.
//!
//! # Examples
//!
//! ```no_run
//! use clap::Parser;
//! use awful_rag::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! if let Commands::Search { query, .. } = cli.command {
//!     println!("searching for {query}");
//! }
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Path to config.yaml. Defaults to the per-platform config directory.
    #[arg(long, short = 'c', env = "AWFUL_RAG_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a default config.yaml and create the knowledge directory.
    Init,

    /// Embed and index one or more text snippets.
    #[clap(name = "add", alias = "a")]
    Add {
        /// The texts to index; each becomes one document.
        #[arg(required = true)]
        texts: Vec<String>,

        /// Metadata applied to every text, as key=value. Repeatable.
        #[arg(long = "meta", short = 'm')]
        meta: Vec<String>,
    },

    /// Index every *.md and *.txt file in the knowledge directory.
    #[clap(name = "ingest")]
    Ingest {
        /// Directory to ingest instead of the configured one.
        dir: Option<PathBuf>,
    },

    /// Show the nearest documents for a query.
    #[clap(name = "search", alias = "s")]
    Search {
        query: String,

        #[arg(short = 'k')]
        k: Option<usize>,
    },

    /// Print the numbered context block a language model would receive.
    #[clap(name = "context")]
    Context {
        query: String,

        #[arg(short = 'k')]
        k: Option<usize>,
    },

    /// Tombstone a document by row index.
    #[clap(name = "delete", alias = "rm")]
    Delete { row: u64 },

    /// Rebuild the index without tombstoned rows.
    Compact,

    /// Print live and physical row counts.
    Stats,

    /// Remove every document from the index.
    Clear,
}
