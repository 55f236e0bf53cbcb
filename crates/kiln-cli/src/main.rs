//! Kiln CLI - Command-line interface for the kiln 3D generation pipeline

mod character;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{check, generate, job};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Turn character descriptions and concept art into 3D models", long_about = None)]
#[command(version)]
struct Cli {
    /// Log every poll and retry
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a 3D model from a prompt, character spec or image
    Generate(generate::GenerateArgs),

    /// Inspect tracked generation jobs
    #[command(subcommand)]
    Job(job::JobCommands),

    /// Report missing credentials and storage settings
    Check {
        /// Also require object storage (needed for local images)
        #[arg(long)]
        storage: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Generate(args) => generate::run(args),
        Commands::Job(cmd) => job::run(cmd),
        Commands::Check { storage } => check::run(storage),
    }
}
