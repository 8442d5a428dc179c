//! CLI entry point for the semantic document index.
//!
//! Provides commands for initializing configuration, ingesting JSON Lines
//! documents, rebuilding the index and searching it.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use serde::Serialize;
use tracing::Level;

use semdex::display::{
    create_matches_table, create_progress_bar, create_stats_table, create_upload_table,
    with_spinner,
};
use semdex::vector::{FastEmbedGenerator, parse_embedding_model};
use semdex::{Collection, SemdexError, Settings, UploadRow, UploadSummary};

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Semantic document index
#[derive(Parser)]
#[command(
    name = "semdex",
    version = env!("CARGO_PKG_VERSION"),
    about = "Semantic document index",
    long_about = "Store short documents, index them by meaning and answer nearest-neighbor queries.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Initialize project
    #[command(about = "Set up .semdex directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings from .semdex/settings.toml")]
    Config,

    /// Ingest documents from a JSON Lines file
    #[command(
        about = "Embed and store documents from a JSON Lines file",
        after_help = "Each line is an object with \"title\" and \"content\" fields:\n  {\"title\": \"Borrowing\", \"content\": \"References must not outlive their owner\"}"
    )]
    Ingest {
        /// JSON Lines file to read
        file: PathBuf,

        /// Rows embedded per call to the model
        #[arg(long, default_value = "64")]
        batch_size: usize,

        /// Rebuild the index after ingesting
        #[arg(long)]
        build: bool,
    },

    /// Rebuild the index from every stored document
    #[command(about = "Rebuild the partition index synchronously")]
    Build {
        /// Number of build threads (overrides config)
        #[arg(short, long)]
        threads: Option<usize>,
    },

    /// Search stored documents
    #[command(
        about = "Find the documents closest in meaning to a text",
        after_help = "Examples:\n  semdex search \"how do lifetimes work\"\n  semdex search \"ownership\" --top-k 3 --nprobe 32 --json"
    )]
    Search {
        /// Query text
        text: String,

        /// Number of results
        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,

        /// Clusters to scan (overrides config)
        #[arg(long)]
        nprobe: Option<usize>,

        /// Output JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show collection statistics
    #[command(about = "Show document and index statistics")]
    Stats {
        /// Output JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
struct MatchOutput<'a> {
    id: u64,
    distance: f32,
    title: &'a str,
    content: &'a str,
}

fn main() {
    let cli = Cli::parse();

    let settings = match load_settings(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let level = if cli.verbose || settings.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run(cli.command, settings) {
        eprintln!("Error: {e:#}");
        if let Some(err) = e.downcast_ref::<SemdexError>() {
            for suggestion in err.recovery_suggestions() {
                eprintln!("  - {suggestion}");
            }
        }
        std::process::exit(1);
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings, Box<figment::Error>> {
    match path {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
}

fn run(command: Commands, mut settings: Settings) -> Result<()> {
    match command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(force)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("Created configuration file at: {}", path.display());
            println!("Edit this file to customize your settings.");
            Ok(())
        }

        Commands::Config => {
            println!("Current Configuration:");
            println!("{}", "=".repeat(50));
            println!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }

        Commands::Ingest {
            file,
            batch_size,
            build,
        } => {
            let collection = open_collection(&settings)?;
            let result = ingest_file(&collection, &file, batch_size.max(1));
            if result.is_ok() && build {
                let generation = with_spinner("Building index...", || collection.rebuild())?;
                println!(
                    "Published generation {} ({} documents, {} clusters)",
                    generation.version(),
                    generation.indexed_count(),
                    generation.nlist()
                );
            }
            collection.shutdown();
            result
        }

        Commands::Build { threads } => {
            if let Some(threads) = threads {
                settings.index.parallel_threads = threads;
            }
            let collection = open_collection(&settings)?;
            let started = Instant::now();
            let generation = with_spinner("Building index...", || collection.rebuild())?;
            println!(
                "Published generation {} in {:?}: {} documents, {} clusters, {} iterations",
                generation.version(),
                started.elapsed(),
                generation.indexed_count(),
                generation.nlist(),
                generation.iterations()
            );
            collection.shutdown();
            Ok(())
        }

        Commands::Search {
            text,
            top_k,
            nprobe,
            json,
        } => {
            let collection = open_collection(&settings)?;
            let stats = collection.stats();
            if stats.pending > 0 && !stats.search_pending {
                tracing::warn!(
                    "{} of {} documents are not indexed yet; run 'semdex build' or set index.search_pending = true",
                    stats.pending,
                    stats.documents
                );
            }
            let nprobe = nprobe.unwrap_or(settings.index.nprobe);
            let matches = collection.query_with_nprobe(&text, top_k, nprobe)?;

            if json {
                let output: Vec<MatchOutput> = matches
                    .iter()
                    .map(|m| MatchOutput {
                        id: m.document.id.get(),
                        distance: m.distance,
                        title: &m.document.title,
                        content: &m.document.content,
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else if matches.is_empty() {
                println!("No matching documents.");
            } else {
                println!("{}", create_matches_table(&matches));
            }
            collection.shutdown();
            Ok(())
        }

        Commands::Stats { json } => {
            let collection = open_collection(&settings)?;
            let stats = collection.stats();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{}", create_stats_table(&stats));
            }
            collection.shutdown();
            Ok(())
        }
    }
}

fn open_collection(settings: &Settings) -> Result<Collection> {
    let model = parse_embedding_model(&settings.embedding.model).map_err(SemdexError::from)?;
    let cache_dir = Settings::resolve_path(&settings.embedding.cache_dir);
    let embedder = FastEmbedGenerator::new(
        model,
        cache_dir,
        settings.embedding.show_download_progress,
    )
    .map_err(SemdexError::from)?;
    Ok(Collection::open(settings, Arc::new(embedder))?)
}

/// Reads `path` as JSON Lines and uploads it in batches.
///
/// Lines that are not valid rows are reported and skipped.
fn ingest_file(collection: &Collection, path: &Path, batch_size: usize) -> Result<()> {
    let file = File::open(path).map_err(|source| SemdexError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let mut rows = Vec::new();
    let mut lines = Vec::new();
    let mut malformed = 0usize;
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<UploadRow>(&line) {
            Ok(row) => {
                rows.push(row);
                lines.push(number + 1);
            }
            Err(e) => {
                malformed += 1;
                tracing::warn!("line {}: not a document row: {e}", number + 1);
            }
        }
    }
    if rows.is_empty() {
        bail!("{} contains no document rows", path.display());
    }

    let progress = create_progress_bar(rows.len() as u64, "embedding");
    let mut summary = UploadSummary::default();
    let mut offset = 0;
    let mut remaining = rows.into_iter().peekable();
    while remaining.peek().is_some() {
        let batch: Vec<UploadRow> = remaining.by_ref().take(batch_size).collect();
        let len = batch.len();
        let result = collection.upload(batch);
        summary.inserted.extend(result.inserted);
        summary.errors.extend(result.errors.into_iter().map(|mut failure| {
            failure.index += offset;
            failure
        }));
        offset += len;
        progress.inc(len as u64);
    }
    progress.finish_and_clear();

    println!("{}", create_upload_table(&summary, &lines));
    if malformed > 0 {
        println!("Skipped {malformed} malformed lines");
    }
    Ok(())
}
