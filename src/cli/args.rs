//! CLI argument definitions using clap derive

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::cli::commands::{
    completions::CompletionsArgs, delete::DeleteArgs, init::InitArgs, list::ListArgs,
    preview::PreviewArgs, status::StatusArgs, sync::SyncArgs,
};

#[derive(Parser)]
#[command(name = "formsync")]
#[command(author, version, about = "Local form catalog mirror")]
#[command(long_about = "Keeps a local mirror of a remote form catalog and its media up to date, downloading only what changed.")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalOpts,
}

#[derive(clap::Args, Clone, Debug)]
pub struct GlobalOpts {
    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "auto")]
    pub format: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Enable verbose output (debug logging)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Project root (default: auto-detect by finding .formsync/)
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new formsync project
    Init(InitArgs),

    /// Download everything the catalog has that the mirror lacks
    Sync(SyncArgs),

    /// Show what a sync would download, without downloading
    Preview(PreviewArgs),

    /// List downloaded form versions
    List(ListArgs),

    /// Soft-delete a form (all versions, or one)
    Delete(DeleteArgs),

    /// Show catalog statistics
    Status(StatusArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable tables
    #[default]
    Auto,
    /// Tab-separated values (for piping)
    Tsv,
    /// JSON format (for programming)
    Json,
    /// CSV format (for spreadsheets)
    Csv,
    /// Markdown tables
    Md,
    /// Just form IDs, one per line
    Id,
}
