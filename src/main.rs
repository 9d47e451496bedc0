//! # Lawdex CLI (`lawdex`)
//!
//! ```bash
//! lawdex --config ./config/lawdex.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lawdex init` | Create the SQLite database and run schema migrations |
//! | `lawdex build` | Scan, parse, vectorize and reindex the corpus |
//! | `lawdex retrieve "<query>"` | Hybrid retrieval over the built indices |
//! | `lawdex parse <file>` | Print the chunks of one file |
//! | `lawdex stats` | Counts, vectorize checkpoint, index state |
//! | `lawdex get <id>` | Print a document and its chunks |
//!
//! `lawdex build` exits with status 0 when nothing is left to do and 3 when
//! a `--limit` or Ctrl-C stopped it with work remaining, so a supervising
//! loop can restart it without parsing output. Any error exits with 1.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use lawdex::config;
use lawdex::ingest::{self, BuildOutcome, BuildReport};
use lawdex::progress::ProgressMode;
use lawdex::{get, logging, migrate, parse_cmd, search, stats};

/// Exit status for a bounded build that stopped with work remaining.
const EXIT_MORE_WORK: u8 = 3;

/// Lawdex: offline legal corpus indexing and hybrid retrieval.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lawdex.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lawdex",
    about = "Lawdex: offline legal corpus indexing and hybrid retrieval",
    version,
    long_about = "Lawdex splits Chinese legal texts into structure-aware chunks, stores them in \
    SQLite, embeds them, and answers queries by reciprocal rank fusion of semantic and lexical \
    search."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lawdex.toml")]
    config: PathBuf,

    /// Debug-level logging (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Bring storage and indices up to date with the corpus.
    ///
    /// Only new and modified files are parsed; deleted files are archived.
    /// Chunks without vectors are embedded in batches and the indices are
    /// rebuilt when anything changed.
    Build {
        /// Maximum number of chunks to vectorize in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config (texts per embedding call).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Print the build report as JSON.
        #[arg(long)]
        json: bool,

        /// Progress on stderr. Defaults to `human` on a terminal, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Retrieve the chunks most relevant to a query.
    Retrieve {
        query: String,

        /// Number of results (defaults to `retrieval.final_limit`).
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Chunk a single file and print the result. Does not touch the database.
    Parse {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Show stored counts and index state.
    Stats,

    /// Print a document and its chunks.
    Get {
        /// Document id.
        id: String,

        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    // Parsing one file works without a config; chunking settings are taken
    // from it when present.
    if let Commands::Parse { file, json } = &cli.command {
        let chunker = match config::load_config(&cli.config) {
            Ok(cfg) => cfg.chunking.chunker(),
            Err(_) => Default::default(),
        };
        parse_cmd::run_parse(file, &chunker, *json)?;
        return Ok(ExitCode::SUCCESS);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Build {
            limit,
            batch_size,
            json,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let reporter = mode.reporter();
            let report = ingest::run_build(&cfg, limit, batch_size, reporter.as_ref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report, cfg.embedding.is_enabled());
            }
            if report.outcome == BuildOutcome::MoreWorkRemains {
                return Ok(ExitCode::from(EXIT_MORE_WORK));
            }
        }
        Commands::Retrieve { query, limit, json } => {
            search::run_retrieve(&cfg, &query, limit, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Get { id, json } => {
            get::run_get(&cfg, &id, json).await?;
        }
        Commands::Parse { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &BuildReport, embeddings_enabled: bool) {
    println!("build");
    println!(
        "  scanned: {} files ({} new, {} modified, {} deleted, {} unchanged)",
        report.files_scanned, report.new, report.modified, report.deleted, report.unchanged
    );
    println!("  parsed: {} files", report.files_parsed);
    println!("  chunks written: {}", report.chunks_written);
    for failure in &report.parse_failures {
        println!("  skipped {}: {}", failure.path, failure.reason);
    }
    if embeddings_enabled {
        println!("  vectors written: {}", report.vectors_written);
    }
    println!("  vectors pending: {}", report.vectors_pending);
    println!("  reindexed: {}", if report.reindexed { "yes" } else { "no" });
    if report.interrupted {
        println!("  interrupted");
    }
    match report.outcome {
        BuildOutcome::Complete => println!("ok"),
        BuildOutcome::MoreWorkRemains => println!("more work remains"),
    }
}
