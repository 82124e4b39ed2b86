//! CIG CLI - code intelligence graph from the command line.
//!
//! Ingests parser output, runs indexing passes, and answers impact, flow and
//! dependency queries against the configured store.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

mod cli;

/// CIG: code intelligence graph engine.
#[derive(Parser)]
#[command(name = "cig")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (defaults to .cig/config.yaml in the current directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Tenant owning the repository
    #[arg(long, global = true, default_value = "default")]
    tenant: String,

    /// Repository within the tenant
    #[arg(long, global = true, default_value = "default")]
    repo: String,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Traversal direction argument.
#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Out,
    In,
    Both,
}

impl From<DirectionArg> for cig::Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Out => cig::Direction::Out,
            DirectionArg::In => cig::Direction::In,
            DirectionArg::Both => cig::Direction::Both,
        }
    }
}

/// Indexing pass mode argument.
#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Full,
    Incremental,
}

impl From<ModeArg> for cig::IndexMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Full => cig::IndexMode::Full,
            ModeArg::Incremental => cig::IndexMode::Incremental,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a JSONL file of `{type, data}` records as one atomic batch
    Ingest {
        /// JSONL file produced by the parser
        file: PathBuf,
    },

    /// Run a full indexing pass: prune, ingest, impact, mismatches, flows
    Pass {
        /// Commit being indexed
        #[arg(long)]
        sha: String,

        /// Full reindex or incremental update
        #[arg(long, value_enum, default_value = "incremental")]
        mode: ModeArg,

        /// Files added or modified by the push
        #[arg(long, value_delimiter = ',')]
        changed: Vec<String>,

        /// Files deleted by the push
        #[arg(long, value_delimiter = ',')]
        removed: Vec<String>,

        /// JSONL records for the changed files
        #[arg(long)]
        records: Option<PathBuf>,
    },

    /// Show symbols impacted by changes to files
    Impact {
        /// Changed files
        #[arg(required = true)]
        files: Vec<String>,

        /// Blast-radius depth (defaults to impact.depth from config)
        #[arg(short, long)]
        depth: Option<u32>,
    },

    /// Show symbols within N hops of a symbol
    BlastRadius {
        /// Symbol uid to start from
        symbol: String,

        /// Maximum hops
        #[arg(short, long, default_value = "1")]
        depth: u32,

        /// Edge direction to follow
        #[arg(long, value_enum, default_value = "both")]
        direction: DirectionArg,
    },

    /// Materialize flow graphs for entrypoints
    Flow {
        /// Entrypoint key (omit with --all)
        entrypoint: Option<String>,

        /// Commit the graph is cached under
        #[arg(long)]
        sha: String,

        /// Traversal depth (defaults to flow.depth from config)
        #[arg(short, long)]
        depth: Option<u32>,

        /// Materialize every entrypoint
        #[arg(long, conflicts_with = "entrypoint")]
        all: bool,
    },

    /// List dependency mismatches
    Mismatches {
        /// Only mismatches for this commit
        #[arg(long)]
        sha: Option<String>,

        /// Recompute from the dependency tables before listing (requires --sha)
        #[arg(long, requires = "sha")]
        recompute: bool,
    },

    /// Semantic search over node embeddings
    Search {
        /// Natural-language query
        query: String,

        /// Maximum number of results
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Remove all graph state derived from files
    Prune {
        /// Deleted files
        #[arg(required = true)]
        files: Vec<String>,
    },

    /// Show store statistics for the repository
    Stats,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let workspace = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!(
                "{}: failed to get current directory: {e}",
                "error".red().bold()
            );
            return ExitCode::FAILURE;
        }
    };

    let ctx = match cli::Context::load(workspace, cli.config, &cli.tenant, &cli.repo).await {
        Ok(ctx) => ctx,
        Err(e) => return report_error(&e),
    };

    let result = match cli.command {
        Commands::Ingest { file } => cli::ingest::run(&ctx, &file).await,
        Commands::Pass {
            sha,
            mode,
            changed,
            removed,
            records,
        } => cli::pass::run(&ctx, sha, mode.into(), changed, removed, records.as_deref()).await,
        Commands::Impact { files, depth } => cli::impact::run(&ctx, &files, depth),
        Commands::BlastRadius {
            symbol,
            depth,
            direction,
        } => cli::impact::run_blast_radius(&ctx, &symbol, depth, direction.into()),
        Commands::Flow {
            entrypoint,
            sha,
            depth,
            all,
        } => cli::flow::run(&ctx, entrypoint.as_deref(), &sha, depth, all),
        Commands::Mismatches { sha, recompute } => {
            cli::mismatches::run(&ctx, sha.as_deref(), recompute)
        }
        Commands::Search { query, limit } => cli::search::run(&ctx, &query, limit).await,
        Commands::Prune { files } => cli::prune::run(&ctx, &files),
        Commands::Stats => cli::stats::run(&ctx),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_error(&e),
    }
}

fn report_error(e: &cig::Error) -> ExitCode {
    eprintln!("{}: {e}", "error".red().bold());
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        eprintln!("  {}: {cause}", "caused by".dimmed());
        source = std::error::Error::source(cause);
    }
    if e.is_input_error() {
        eprintln!(
            "  {}: the batch was rejected and nothing was written",
            "hint".dimmed()
        );
    }
    ExitCode::FAILURE
}
