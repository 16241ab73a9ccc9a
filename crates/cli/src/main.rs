//! AVS CLI — the main entry point.
//!
//! Commands:
//! - `validate` — Check a value story against the schema and invariants
//! - `assemble` — Resolve the context manifest and write the briefcase
//! - `doctor`   — Diagnose runtimes and credentials

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "avs",
    about = "AVS — assemble Value Stories into context-complete briefcases",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a value story document
    Validate {
        /// Path to the story (YAML or Markdown with a ```yaml block)
        path: PathBuf,
    },

    /// Resolve every context asset and write `<story_id>-assembled.yaml`
    Assemble {
        /// Path to the story (YAML or Markdown with a ```yaml block)
        path: PathBuf,
    },

    /// Check runtimes, research credentials and a story's MCP servers
    Doctor {
        /// Also launch the MCP servers this story declares and list their tools
        #[arg(long)]
        story: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Validate { path } => commands::validate::run(&path).await?,
        Commands::Assemble { path } => commands::assemble::run(&path).await?,
        Commands::Doctor { story } => commands::doctor::run(story.as_deref()).await?,
    }

    Ok(())
}
