use clap::{Args, Parser, Subcommand};
use photo_organizer::{Criterion, MediaKind, Operation, OverwritePolicy};
use std::path::PathBuf;

pub mod commands;
pub mod interrupt;
pub mod logging;
pub mod progress;

#[derive(Debug, Parser)]
#[command(name = "photo-organizer")]
#[command(about = "Organize photos and videos by date, device and location", long_about = None)]
pub struct Cli {
    /// Configuration file to read instead of ./Config.toml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Extract metadata and print collection statistics
    Analyze(AnalyzeArgs),
    /// Copy or move files into a date/device/location tree
    Organize(OrganizeArgs),
    /// Find exact duplicates, optionally setting extra copies aside
    Dupes(DupesArgs),
    /// Undo a batch from its journal
    Rollback(RollbackArgs),
    /// List, inspect or prune batch journals
    Journals(JournalsArgs),
    /// Print the effective configuration as TOML
    PrintConfig,
    /// Display metadata cache statistics
    CacheStats(CacheStatsArgs),
}

/// Source selection shared by every scanning command.
#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Directories to scan (defaults to `root_paths` from the configuration)
    pub paths: Vec<PathBuf>,

    /// Only scan the top level of each directory
    #[arg(long)]
    pub no_recursive: bool,

    /// Media kinds to include, comma separated (image, raw-image, video)
    #[arg(long, value_delimiter = ',')]
    pub kinds: Vec<MediaKind>,
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Write one row per file to this CSV file
    #[arg(long)]
    pub csv: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct OrganizeArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Destination root (defaults to `destination` from the configuration)
    #[arg(short, long)]
    pub destination: Option<PathBuf>,

    /// Criteria, outermost first, e.g. `date:year,device,location:cluster:5`
    #[arg(long, value_delimiter = ',')]
    pub criteria: Vec<Criterion>,

    /// copy or move
    #[arg(long)]
    pub mode: Option<Operation>,

    /// skip, rename or overwrite
    #[arg(long)]
    pub policy: Option<OverwritePolicy>,

    /// Print the plan without touching any file
    #[arg(long)]
    pub dry_run: bool,

    /// Write failed entries to this CSV file
    #[arg(long)]
    pub failures_csv: Option<PathBuf>,

    /// Do not ask before moving files
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Debug, Args)]
pub struct DupesArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Restrict grouping to one media kind
    #[arg(long)]
    pub kind: Option<MediaKind>,

    /// Move every non-primary copy under this directory
    #[arg(long)]
    pub quarantine: Option<PathBuf>,

    /// Do not ask before quarantining
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Debug, Args)]
pub struct RollbackArgs {
    /// Batch id from `journals`, or a journal file path
    pub journal: String,
}

#[derive(Debug, Args)]
pub struct JournalsArgs {
    /// Print every entry of one batch
    #[arg(long, value_name = "BATCH_ID")]
    pub show: Option<String>,

    /// Delete the journal of one batch
    #[arg(long, value_name = "BATCH_ID")]
    pub delete: Option<String>,

    /// Delete journals of batches older than this many days
    #[arg(long, value_name = "DAYS")]
    pub prune_older_than: Option<u32>,
}

#[derive(Debug, Args)]
pub struct CacheStatsArgs {
    /// Empty the metadata cache afterwards
    #[arg(long)]
    pub clear: bool,
}
